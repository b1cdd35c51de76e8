use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono_tz::Tz;
use thiserror::Error;

use crate::types::WallClockTime;

/// Anything earlier than 2001-09-09 is treated as "never synchronized".
pub const MIN_VALID_EPOCH: i64 = 1_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("epoch {0} is outside the accepted range")]
    EpochOutOfRange(i64),
    #[error("platform clock rejected update: {0}")]
    Platform(String),
}

/// Wall clock that keeps ticking through deep sleep.
pub trait ClockSource {
    fn epoch_seconds(&self) -> i64;
    fn set_from_epoch(&mut self, epoch_seconds: i64) -> Result<(), ClockError>;
    fn timezone(&self) -> Tz;

    fn now(&self) -> WallClockTime {
        WallClockTime::from_epoch(self.epoch_seconds(), self.timezone())
    }
}

pub fn check_epoch(epoch_seconds: i64) -> Result<(), ClockError> {
    // Upper bound keeps chrono decomposition in range.
    if !(MIN_VALID_EPOCH..=253_402_300_799).contains(&epoch_seconds) {
        return Err(ClockError::EpochOutOfRange(epoch_seconds));
    }
    Ok(())
}

/// Clock backed by a shared counter. Cloning shares the same time base, so a
/// simulation can hand one handle to the device and advance another.
#[derive(Debug, Clone)]
pub struct SharedClock {
    epoch: Arc<AtomicI64>,
    tz: Tz,
}

impl SharedClock {
    pub fn new(epoch_seconds: i64, tz: Tz) -> Self {
        Self {
            epoch: Arc::new(AtomicI64::new(epoch_seconds)),
            tz,
        }
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.epoch.fetch_add(seconds, Ordering::Relaxed);
    }
}

impl ClockSource for SharedClock {
    fn epoch_seconds(&self) -> i64 {
        self.epoch.load(Ordering::Relaxed)
    }

    fn set_from_epoch(&mut self, epoch_seconds: i64) -> Result<(), ClockError> {
        check_epoch(epoch_seconds)?;
        self.epoch.store(epoch_seconds, Ordering::Relaxed);
        Ok(())
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}
