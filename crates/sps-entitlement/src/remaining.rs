use serde::{Deserialize, Serialize};

/// Session remaining time broken down for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingTime {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl RemainingTime {
    /// Negative input clamps to zero.
    pub fn from_ms(remaining_ms: i64) -> Self {
        let total_secs = remaining_ms.max(0) / 1_000;
        Self {
            days: total_secs / 86_400,
            hours: (total_secs % 86_400) / 3_600,
            minutes: (total_secs % 3_600) / 60,
            seconds: total_secs % 60,
        }
    }

    /// `"Nd Nh Nm"`, `"Nh Nm"` or `"Nm Ns"`, by the largest non-zero unit.
    pub fn render(&self) -> String {
        if self.days > 0 {
            format!("{}d {}h {}m", self.days, self.hours, self.minutes)
        } else if self.hours > 0 {
            format!("{}h {}m", self.hours, self.minutes)
        } else {
            format!("{}m {}s", self.minutes, self.seconds)
        }
    }
}
