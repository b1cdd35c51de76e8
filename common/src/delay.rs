use std::{
    thread,
    time::{Duration, Instant},
};

/// Blocking wait. The host simulation implements it by advancing simulated time.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Time spent awake since the entry point ran.
pub trait Uptime {
    fn uptime(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct InstantUptime {
    started: Instant,
}

impl InstantUptime {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Uptime for InstantUptime {
    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Polls `ready` up to `attempts` times, waiting `interval` after each miss.
/// Returns the 1-based attempt that succeeded.
pub fn poll_bounded<F>(
    attempts: u32,
    interval: Duration,
    delay: &mut dyn Delay,
    mut ready: F,
) -> Option<u32>
where
    F: FnMut() -> bool,
{
    for attempt in 1..=attempts {
        if ready() {
            return Some(attempt);
        }
        delay.delay(interval);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDelay;

    #[test]
    fn stops_at_first_success() {
        let mut delay = RecordingDelay::default();
        let mut calls = 0;

        let hit = poll_bounded(20, Duration::from_millis(500), &mut delay, || {
            calls += 1;
            calls == 3
        });

        assert_eq!(hit, Some(3));
        assert_eq!(delay.total(), Duration::from_millis(1_000));
    }

    #[test]
    fn gives_up_after_bound() {
        let mut delay = RecordingDelay::default();

        let hit = poll_bounded(10, Duration::from_secs(1), &mut delay, || false);

        assert_eq!(hit, None);
        assert_eq!(delay.waits.len(), 10);
    }
}
