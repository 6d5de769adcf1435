//! Inbound real-time events and their normalisation.
//!
//! Three independently-named grant events carry the same semantic payload.
//! They collapse into one [`GrantEvent::Grant`] here so the reconciler has a
//! single code path. Duration payloads are resolved to an absolute expiry
//! against the `now_ms` of receipt.

use serde::{Deserialize, Deserializer, Serialize};

use crate::MS_PER_MINUTE;

/// Event names the engine subscribes to on the real-time channel.
pub const SUBSCRIBED_EVENTS: &[&str] = &[
    "subscription-granted",
    "access-granted",
    "account-activated",
    "subscription-expired",
];

/// Access level recorded on admin grants that do not name one.
const DEFAULT_ACCESS_LEVEL: &str = "premium";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A named event as delivered by the real-time transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Grant payload: `{ endAt?, duration?, unit?, accessLevel?, grantedBy? }`.
///
/// `endAt` and `duration` accept either JSON numbers or numeric strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantPayload {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub access_level: Option<String>,
    #[serde(default)]
    pub granted_by: Option<String>,
}

fn lenient_i64<'de, D>(d: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Normalised event
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantKind {
    SubscriptionGranted,
    AccountActivated,
    AccessGranted,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::SubscriptionGranted => "subscription-granted",
            GrantKind::AccountActivated => "account-activated",
            GrantKind::AccessGranted => "access-granted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
    Months,
}

impl DurationUnit {
    /// `None` for strings outside the known set.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Some(DurationUnit::Minutes),
            "hour" | "hours" => Some(DurationUnit::Hours),
            "day" | "days" => Some(DurationUnit::Days),
            "month" | "months" => Some(DurationUnit::Months),
            _ => None,
        }
    }

    pub fn minutes_per_unit(&self, days_per_month: i64) -> i64 {
        match self {
            DurationUnit::Minutes => 1,
            DurationUnit::Hours => 60,
            DurationUnit::Days => 24 * 60,
            DurationUnit::Months => days_per_month * 24 * 60,
        }
    }
}

/// Admin attribution carried by grants that name a `grantedBy`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminAttribution {
    pub access_level: String,
    pub granted_by: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantEvent {
    Grant {
        kind: GrantKind,
        /// Absolute expiry, epoch ms.
        end_at: i64,
        /// Length of the grant as seen at receipt, for notices and the admin record.
        duration_minutes: i64,
        admin: Option<AdminAttribution>,
    },
    Expire,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A recognised event whose payload cannot be turned into a state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedEvent {
    pub event: String,
    pub reason: String,
}

impl std::fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed event '{}': {}", self.event, self.reason)
    }
}

impl std::error::Error for MalformedEvent {}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl GrantEvent {
    /// Normalise a raw event.
    ///
    /// - `Ok(None)`: unknown event name, ignored for forward compatibility.
    /// - `Err(MalformedEvent)`: known name, unusable payload.
    /// - `endAt` wins over `duration` when both are present.
    /// - Missing or unknown `unit` falls back to days.
    pub fn parse(
        ev: &RealtimeEvent,
        now_ms: i64,
        days_per_month: i64,
    ) -> Result<Option<GrantEvent>, MalformedEvent> {
        let kind = match ev.name.as_str() {
            "subscription-granted" => GrantKind::SubscriptionGranted,
            "account-activated" => GrantKind::AccountActivated,
            "access-granted" => GrantKind::AccessGranted,
            "subscription-expired" => return Ok(Some(GrantEvent::Expire)),
            _ => return Ok(None),
        };

        let malformed = |reason: &str| MalformedEvent {
            event: ev.name.clone(),
            reason: reason.to_string(),
        };

        if !ev.payload.is_object() {
            return Err(malformed("payload is not an object"));
        }
        let payload: GrantPayload = serde_json::from_value(ev.payload.clone())
            .map_err(|e| malformed(&format!("payload decode failed: {e}")))?;

        let (end_at, duration_minutes) = match (payload.end_at, payload.duration) {
            (Some(end_at), _) => {
                let minutes = ((end_at - now_ms) / MS_PER_MINUTE).max(0);
                (end_at, minutes)
            }
            (None, Some(duration)) => {
                if duration <= 0 {
                    return Err(malformed("duration must be positive"));
                }
                let unit = payload
                    .unit
                    .as_deref()
                    .and_then(DurationUnit::from_wire)
                    .unwrap_or(DurationUnit::Days);
                let minutes = duration
                    .checked_mul(unit.minutes_per_unit(days_per_month))
                    .ok_or_else(|| malformed("duration overflows"))?;
                let end_at = minutes
                    .checked_mul(MS_PER_MINUTE)
                    .and_then(|ms| now_ms.checked_add(ms))
                    .ok_or_else(|| malformed("duration overflows"))?;
                (end_at, minutes)
            }
            (None, None) => return Err(malformed("neither endAt nor duration present")),
        };

        let admin = payload.granted_by.map(|granted_by| AdminAttribution {
            access_level: payload
                .access_level
                .unwrap_or_else(|| DEFAULT_ACCESS_LEVEL.to_string()),
            granted_by,
        });

        Ok(Some(GrantEvent::Grant {
            kind,
            end_at,
            duration_minutes,
            admin,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn parse(name: &str, payload: serde_json::Value) -> Result<Option<GrantEvent>, MalformedEvent> {
        GrantEvent::parse(&RealtimeEvent::new(name, payload), NOW, 30)
    }

    fn end_at(ev: GrantEvent) -> i64 {
        match ev {
            GrantEvent::Grant { end_at, .. } => end_at,
            GrantEvent::Expire => panic!("expected grant"),
        }
    }

    #[test]
    fn duration_units_normalise_against_receipt_time() {
        let cases = [
            ("minutes", 30, 30 * MS_PER_MINUTE),
            ("hours", 2, 120 * MS_PER_MINUTE),
            ("days", 1, 1_440 * MS_PER_MINUTE),
            ("months", 1, 30 * 1_440 * MS_PER_MINUTE),
        ];
        for (unit, n, ms) in cases {
            let ev = parse("access-granted", json!({"duration": n, "unit": unit}))
                .unwrap()
                .unwrap();
            assert_eq!(end_at(ev), NOW + ms, "unit {unit}");
        }
    }

    #[test]
    fn unknown_or_missing_unit_defaults_to_days() {
        let a = parse("access-granted", json!({"duration": 2, "unit": "fortnights"}))
            .unwrap()
            .unwrap();
        let b = parse("access-granted", json!({"duration": "2"})).unwrap().unwrap();
        assert_eq!(end_at(a), NOW + 2 * 1_440 * MS_PER_MINUTE);
        assert_eq!(end_at(b), NOW + 2 * 1_440 * MS_PER_MINUTE);
    }

    #[test]
    fn end_at_wins_over_duration() {
        let ev = parse(
            "subscription-granted",
            json!({"endAt": NOW + 5_000, "duration": 3, "unit": "days"}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(end_at(ev), NOW + 5_000);
    }

    #[test]
    fn admin_attribution_only_with_granted_by() {
        let ev = parse(
            "account-activated",
            json!({"endAt": NOW + 60_000, "grantedBy": "admin@ops"}),
        )
        .unwrap()
        .unwrap();
        match ev {
            GrantEvent::Grant { admin, kind, .. } => {
                assert_eq!(kind, GrantKind::AccountActivated);
                let admin = admin.unwrap();
                assert_eq!(admin.granted_by, "admin@ops");
                assert_eq!(admin.access_level, "premium");
            }
            GrantEvent::Expire => panic!("expected grant"),
        }
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(parse("access-granted", json!({})).is_err());
        assert!(parse("access-granted", json!({"duration": 0, "unit": "days"})).is_err());
        assert!(parse("access-granted", json!("30 minutes")).is_err());
        assert!(parse("access-granted", json!({"duration": i64::MAX, "unit": "months"})).is_err());
    }

    #[test]
    fn expire_needs_no_payload_and_unknown_is_ignored() {
        assert_eq!(
            parse("subscription-expired", serde_json::Value::Null).unwrap(),
            Some(GrantEvent::Expire)
        );
        assert_eq!(parse("channels-updated", json!({})).unwrap(), None);
    }
}
