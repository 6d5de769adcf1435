//! sps-config
//!
//! Layered YAML configuration for the entitlement engine.
//!
//! - Layers merge in order: earlier docs are base, later docs override.
//! - The merged tree is canonicalised to JSON and hashed (SHA-256) so the
//!   effective config can be identified in logs.
//! - Unknown keys are an error, not a warning: a typo in a tick or history
//!   setting must not silently fall back to the default.

use std::fs;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sps_entitlement::{EntitlementPolicy, MS_PER_DAY};

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub countdown: CountdownConfig,
    pub history: HistoryConfig,
    pub grants: GrantConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CountdownConfig {
    /// Countdown tick period.
    pub tick_period_ms: u64,
    /// Persist the remaining-time display cache every N ticks.
    pub checkpoint_every_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HistoryConfig {
    pub points_history_cap: usize,
    pub watch_history_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GrantConfig {
    /// Restored expiries further out than this are treated as clock skew.
    pub clock_skew_horizon_days: i64,
    pub days_per_month: i64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1_000,
            checkpoint_every_ticks: 30,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            points_history_cap: 20,
            watch_history_cap: 10,
        }
    }
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            clock_skew_horizon_days: 365,
            days_per_month: 30,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.countdown.tick_period_ms == 0 {
            bail!("CONFIG_INVALID: countdown.tick_period_ms must be > 0");
        }
        if self.countdown.checkpoint_every_ticks == 0 {
            bail!("CONFIG_INVALID: countdown.checkpoint_every_ticks must be > 0");
        }
        if self.grants.clock_skew_horizon_days <= 0 {
            bail!("CONFIG_INVALID: grants.clock_skew_horizon_days must be > 0");
        }
        if self.grants.days_per_month <= 0 {
            bail!("CONFIG_INVALID: grants.days_per_month must be > 0");
        }
        Ok(())
    }

    /// The subset the pure core consumes.
    pub fn policy(&self) -> EntitlementPolicy {
        EntitlementPolicy {
            points_history_cap: self.history.points_history_cap,
            watch_history_cap: self.history.watch_history_cap,
            days_per_month: self.grants.days_per_month,
            clock_skew_horizon_ms: self.grants.clock_skew_horizon_days.saturating_mul(MS_PER_DAY),
            checkpoint_every_ticks: self.countdown.checkpoint_every_ticks,
        }
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.countdown.tick_period_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config: EngineConfig,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = match serde_json::to_value(v_yaml).context("yaml->json conversion failed")? {
            // An empty document is an empty layer.
            Value::Null => serde_json::json!({}),
            v => v,
        };
        merged = deep_merge(merged, v_json);
    }

    let config: EngineConfig =
        serde_json::from_value(merged.clone()).context("CONFIG_INVALID: schema mismatch")?;
    config.validate()?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// Serialize with object keys sorted recursively, so key order in the YAML
/// source never changes the hash.
fn canonicalize_json(v: &Value) -> Result<String> {
    fn sorted(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let ordered: std::collections::BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                serde_json::to_value(ordered).unwrap_or(Value::Null)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sorted(v)).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.countdown.tick_period_ms, 1_000);
        assert_eq!(cfg.countdown.checkpoint_every_ticks, 30);
        assert_eq!(cfg.policy(), EntitlementPolicy::default());
    }

    #[test]
    fn empty_input_yields_defaults() {
        let loaded = load_layered_yaml_from_strings(&[""]).unwrap();
        assert_eq!(loaded.config, EngineConfig::default());
    }

    #[test]
    fn later_layer_overrides_earlier() {
        let base = "countdown:\n  tick_period_ms: 1000\n  checkpoint_every_ticks: 30\n";
        let overlay = "countdown:\n  checkpoint_every_ticks: 10\n";
        let loaded = load_layered_yaml_from_strings(&[base, overlay]).unwrap();
        assert_eq!(loaded.config.countdown.checkpoint_every_ticks, 10);
        assert_eq!(loaded.config.countdown.tick_period_ms, 1_000);
    }

    #[test]
    fn zero_tick_period_is_rejected() {
        let err = load_layered_yaml_from_strings(&["countdown:\n  tick_period_ms: 0\n"])
            .unwrap_err();
        assert!(err.to_string().contains("tick_period_ms"));
    }
}
