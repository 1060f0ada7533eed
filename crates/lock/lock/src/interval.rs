use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unit of an [`Interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// A `(value, unit)` pair as it appears in configuration files.
///
/// ```toml
/// expiration = { value = 10 }
/// retry = { value = 50, unit = "milliseconds" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub value: u64,
    #[serde(default)]
    pub unit: TimeUnit,
}

impl Interval {
    pub const fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub const fn seconds(value: u64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    pub const fn millis(value: u64) -> Self {
        Self::new(value, TimeUnit::Milliseconds)
    }

    /// Convert to a [`Duration`], saturating on overflow.
    pub fn as_duration(&self) -> Duration {
        let v = self.value;
        match self.unit {
            TimeUnit::Nanoseconds => Duration::from_nanos(v),
            TimeUnit::Microseconds => Duration::from_micros(v),
            TimeUnit::Milliseconds => Duration::from_millis(v),
            TimeUnit::Seconds => Duration::from_secs(v),
            TimeUnit::Minutes => Duration::from_secs(v.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(v.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(v.saturating_mul(86_400)),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }
}

impl From<Interval> for Duration {
    fn from(interval: Interval) -> Self {
        interval.as_duration()
    }
}
