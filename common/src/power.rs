use std::time::Duration;

use log::warn;
use thiserror::Error;

/// Floor for the fallback sleep.
const MIN_FALLBACK_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowerError {
    #[error("invalid sleep duration: {0}")]
    InvalidDuration(String),
}

/// Suspends the system. On hardware `sleep_for` does not return; execution
/// restarts at the entry point with only retained memory and the clock intact.
pub trait PowerController {
    fn sleep_for(&mut self, interval: Duration) -> Result<(), PowerError>;
}

/// Converts an interval to the microsecond count the wake timer takes.
pub fn sleep_micros(interval: Duration) -> Result<u64, PowerError> {
    if interval.is_zero() {
        return Err(PowerError::InvalidDuration(
            "sleep duration must be greater than 0".to_string(),
        ));
    }

    u64::try_from(interval.as_micros())
        .map_err(|_| PowerError::InvalidDuration(format!("{interval:?} overflows the wake timer")))
}

/// Sleep so the next wake lands one interval after this one started, but never
/// less than `min_sleep`.
pub fn plan_sleep(interval: Duration, awake_for: Duration, min_sleep: Duration) -> Duration {
    interval.saturating_sub(awake_for).max(min_sleep)
}

/// Sleeps for `planned`, or for `fallback` when the controller rejects the
/// plan. Returns the interval that was accepted.
pub fn suspend(
    power: &mut dyn PowerController,
    planned: Duration,
    fallback: Duration,
) -> Result<Duration, PowerError> {
    match power.sleep_for(planned) {
        Ok(()) => Ok(planned),
        Err(err) => {
            let fallback = fallback.max(MIN_FALLBACK_SLEEP);
            warn!("sleep of {planned:?} rejected ({err}); sleeping {fallback:?} instead");
            power.sleep_for(fallback)?;
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPower {
        slept: Vec<Duration>,
    }

    impl PowerController for RecordingPower {
        fn sleep_for(&mut self, interval: Duration) -> Result<(), PowerError> {
            sleep_micros(interval)?;
            self.slept.push(interval);
            Ok(())
        }
    }

    #[test]
    fn suspend_uses_the_plan_when_accepted() {
        let mut power = RecordingPower::default();

        let slept = suspend(&mut power, Duration::from_secs(580), Duration::from_secs(30));

        assert_eq!(slept, Ok(Duration::from_secs(580)));
        assert_eq!(power.slept, vec![Duration::from_secs(580)]);
    }

    #[test]
    fn rejected_plan_falls_back_instead_of_staying_awake() {
        let mut power = RecordingPower::default();

        let slept = suspend(&mut power, Duration::ZERO, Duration::from_secs(30));
        assert_eq!(slept, Ok(Duration::from_secs(30)));

        let floored = suspend(&mut power, Duration::ZERO, Duration::ZERO);
        assert_eq!(floored, Ok(MIN_FALLBACK_SLEEP));
        assert_eq!(
            power.slept,
            vec![Duration::from_secs(30), MIN_FALLBACK_SLEEP]
        );
    }

    #[test]
    fn subtracts_awake_time() {
        assert_eq!(
            plan_sleep(
                Duration::from_secs(600),
                Duration::from_secs(45),
                Duration::from_secs(30)
            ),
            Duration::from_secs(555)
        );
    }

    #[test]
    fn long_cycles_fall_back_to_minimum() {
        assert_eq!(
            plan_sleep(
                Duration::from_secs(600),
                Duration::from_secs(900),
                Duration::from_secs(30)
            ),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn zero_sleep_is_rejected() {
        assert!(matches!(
            sleep_micros(Duration::ZERO),
            Err(PowerError::InvalidDuration(_))
        ));
        assert_eq!(sleep_micros(Duration::from_secs(2)), Ok(2_000_000));
    }

    #[test]
    fn overflowing_sleep_is_rejected() {
        assert!(sleep_micros(Duration::MAX).is_err());
    }
}
