use std::{num::NonZeroU32, time::Duration};

use bma_ts::Monotonic;

use crate::{Error, Result};

/// Host scheduler tick rate (ticks per second)
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub struct TickRate(f64);

/// The classic 100 Hz system tick
impl Default for TickRate {
    fn default() -> Self {
        Self(100.0)
    }
}

impl TryFrom<f64> for TickRate {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TickRate> for f64 {
    fn from(rate: TickRate) -> Self {
        rate.0
    }
}

impl TickRate {
    /// Creates a new tick rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if the rate is not a finite positive number
    pub fn new(ticks_per_second: f64) -> Result<Self> {
        if ticks_per_second.is_finite() && ticks_per_second > 0.0 {
            Ok(Self(ticks_per_second))
        } else {
            Err(Error::InvalidData(format!(
                "invalid tick rate: {}",
                ticks_per_second
            )))
        }
    }
    /// Returns the number of ticks per second
    pub fn ticks_per_second(&self) -> f64 {
        self.0
    }
    /// Converts seconds into ticks. Returns `None` for non-positive (or NaN) timeouts. A positive
    /// timeout shorter than a single tick is rounded up to one tick.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ticks(&self, seconds: f64) -> Option<NonZeroU32> {
        if seconds.is_nan() || seconds <= 0.0 {
            return None;
        }
        let ticks = seconds * self.0;
        // float-to-int casts truncate and saturate
        let ticks = ticks as u32;
        Some(NonZeroU32::new(ticks).unwrap_or(NonZeroU32::MIN))
    }
    /// Converts a caller timeout in seconds into a host wait mode
    pub fn wait_for(&self, seconds: f64) -> Wait {
        self.ticks(seconds).map_or(Wait::NoWait, Wait::Ticks)
    }
    /// Wall-clock duration of the given number of ticks
    pub fn duration_of(&self, ticks: u32) -> Duration {
        Duration::from_secs_f64(f64::from(ticks) / self.0)
    }
}

/// How long a transfer operation may suspend the calling task
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Wait {
    /// Fail immediately if the operation can not be completed
    NoWait,
    /// Wait up to the given number of host ticks
    Ticks(NonZeroU32),
    /// Wait until the operation is completed
    Forever,
}

impl Wait {
    /// Returns true if the mode never suspends the caller
    pub fn is_no_wait(&self) -> bool {
        *self == Wait::NoWait
    }
}

/// A time-limited wait, tracked across wakeups
pub struct Deadline {
    t: Monotonic,
    timeout: Duration,
}

impl Deadline {
    /// Starts a new deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            t: Monotonic::now(),
            timeout,
        }
    }
    /// Returns the remaining duration or `None` if the deadline has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .checked_sub(self.t.elapsed())
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod test {
    use std::{num::NonZeroU32, time::Duration};

    use super::{Deadline, TickRate, Wait};
    use crate::Error;

    #[test]
    fn test_conversion() {
        let rate = TickRate::new(100.0).unwrap();
        assert_eq!(rate.ticks(1.0), NonZeroU32::new(100));
        assert_eq!(rate.ticks(0.255), NonZeroU32::new(25));
        assert_eq!(rate.wait_for(2.5), Wait::Ticks(NonZeroU32::new(250).unwrap()));
    }

    #[test]
    fn test_small_timeout_rounds_up() {
        let rate = TickRate::new(100.0).unwrap();
        assert_eq!(rate.ticks(0.000_000_1), Some(NonZeroU32::MIN));
        assert_eq!(rate.ticks(f64::MIN_POSITIVE), Some(NonZeroU32::MIN));
    }

    #[test]
    fn test_non_positive_is_no_wait() {
        let rate = TickRate::new(1000.0).unwrap();
        assert_eq!(rate.wait_for(0.0), Wait::NoWait);
        assert_eq!(rate.wait_for(-0.0), Wait::NoWait);
        assert_eq!(rate.wait_for(-5.0), Wait::NoWait);
        assert_eq!(rate.wait_for(f64::NAN), Wait::NoWait);
        assert!(rate.wait_for(-1.0).is_no_wait());
    }

    #[test]
    fn test_saturation() {
        let rate = TickRate::new(1000.0).unwrap();
        assert_eq!(rate.ticks(f64::INFINITY), NonZeroU32::new(u32::MAX));
        assert_eq!(rate.ticks(1e12), NonZeroU32::new(u32::MAX));
    }

    #[test]
    fn test_invalid_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(TickRate::new(rate), Err(Error::InvalidData(_))));
        }
    }

    #[test]
    fn test_duration_of() {
        let rate = TickRate::new(100.0).unwrap();
        assert_eq!(rate.duration_of(1), Duration::from_millis(10));
        assert_eq!(rate.duration_of(250), Duration::from_millis(2500));
    }

    #[test]
    fn test_deadline() {
        let deadline = Deadline::new(Duration::from_millis(50));
        assert!(deadline.remaining().is_some());
        std::thread::sleep(Duration::from_millis(60));
        assert!(deadline.remaining().is_none());
        let expired = Deadline::new(Duration::ZERO);
        assert!(expired.remaining().is_none());
    }
}
