use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// How the pause between contended attempts grows.
///
/// The base interval always comes from the request's retry interval; the
/// backoff only shapes how it evolves across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Wait the retry interval between every attempt.
    #[default]
    Constant,
    /// `interval * multiplier^attempt`, clamped to `max`, optionally with
    /// deterministic jitter.
    Exponential {
        /// Upper bound on a single pause.
        max: Interval,
        /// Factor applied on each successive attempt.
        multiplier: f64,
        /// When `true`, pauses are stretched by 0–40% depending on the
        /// attempt number so contenders drift apart.
        #[serde(default)]
        jitter: bool,
    },
}

impl Backoff {
    /// Check that every pause this backoff produces is positive and
    /// non-decreasing.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for a zero `max`, or a
    /// `multiplier` that is not a finite number of at least `1.0`.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Constant => Ok(()),
            Self::Exponential {
                max, multiplier, ..
            } => {
                if max.is_zero() {
                    return Err("exponential backoff max must be positive".into());
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!(
                        "exponential backoff multiplier must be a finite number >= 1.0, got {multiplier}"
                    ));
                }
                Ok(())
            }
        }
    }

    /// Compute the pause after the given zero-based failed `attempt`.
    ///
    /// Never shorter than `interval`, even when `max` is smaller.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use tollgate_lock::Backoff;
    ///
    /// let interval = Duration::from_millis(50);
    /// assert_eq!(Backoff::Constant.delay_for(interval, 7), interval);
    /// ```
    pub fn delay_for(&self, interval: Duration, attempt: u32) -> Duration {
        match self {
            Self::Constant => interval,
            Self::Exponential {
                max,
                multiplier,
                jitter,
            } => {
                // Retry counts stay far below i32::MAX within any sane timeout.
                #[allow(clippy::cast_possible_wrap)]
                let raw = interval.as_secs_f64() * multiplier.powi(attempt.min(64) as i32);

                let adjusted = if *jitter {
                    raw * (1.0 + 0.1 * f64::from(attempt % 5))
                } else {
                    raw
                };

                let max = max.as_duration();
                let pause = if adjusted.is_nan() || adjusted >= max.as_secs_f64() {
                    max
                } else {
                    Duration::try_from_secs_f64(adjusted).unwrap_or(max)
                };
                pause.max(interval)
            }
        }
    }
}
