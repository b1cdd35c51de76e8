use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::{
    clock::{ClockError, ClockSource},
    delay::Delay,
    indicator::{Indicator, IndicatorChannel, IndicatorMode},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("could not associate with the network")]
    ConnectivityFailure,
    #[error("connected but no valid epoch was received")]
    TimeSyncTimeout,
    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Network time source. On success the clock has been set and the applied epoch is returned.
pub trait TimeSynchronizer {
    fn sync(&mut self, clock: &mut dyn ClockSource) -> Result<i64, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    pub succeeded: bool,
    pub attempts: u8,
    pub last_error: Option<SyncError>,
}

/// Bounded retry around a synchronizer, with the Sync indicator reflecting progress.
pub fn sync_with_retries(
    synchronizer: &mut dyn TimeSynchronizer,
    clock: &mut dyn ClockSource,
    delay: &mut dyn Delay,
    indicator: &dyn Indicator,
    attempts: u8,
    retry_wait: Duration,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    for attempt in 1..=attempts {
        outcome.attempts = attempt;
        indicator.set_mode(IndicatorChannel::Sync, IndicatorMode::BlinkFast);
        info!("time sync attempt {attempt}/{attempts}");

        match synchronizer.sync(clock) {
            Ok(epoch) => {
                info!("time synchronized on attempt {attempt}: epoch={epoch} local={}", clock.now());
                outcome.succeeded = true;
                outcome.last_error = None;
                break;
            }
            Err(err) => {
                warn!("time sync attempt {attempt} failed: {err}");
                outcome.last_error = Some(err);
            }
        }

        if attempt < attempts {
            indicator.set_mode(IndicatorChannel::Sync, IndicatorMode::BlinkSlow);
            delay.delay(retry_wait);
        }
    }

    indicator.set_mode(IndicatorChannel::Sync, IndicatorMode::Off);
    outcome
}
