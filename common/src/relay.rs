use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{info, warn};
use thiserror::Error;

use crate::delay::Delay;

/// Longest uninterrupted wait while a stop signal is armed.
pub const STOP_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay output write failed: {0}")]
    Output(String),
}

/// The raw relay pin.
pub trait RelayOutput {
    fn set(&mut self, on: bool) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub requested: Duration,
    pub held: Duration,
    pub interrupted: bool,
    pub fault: Option<RelayError>,
}

/// Blocking, bounded relay activation.
pub trait Actuator {
    fn activate(&mut self, duration: Duration) -> ActivationReport;
}

/// Emergency stop raised from another context while the relay is held.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Commands the relay off when dropped, whatever path leaves the hold.
struct Engaged<'a, O: RelayOutput> {
    output: &'a mut O,
}

impl<O: RelayOutput> Drop for Engaged<'_, O> {
    fn drop(&mut self) {
        if let Err(err) = self.output.set(false) {
            warn!("relay off command failed: {err}");
        }
    }
}

pub struct Relay<O: RelayOutput, D: Delay> {
    output: O,
    delay: D,
    stop: Option<StopSignal>,
}

impl<O: RelayOutput, D: Delay> Relay<O, D> {
    /// Drives the output low immediately so a reset never leaves it on.
    pub fn new(mut output: O, delay: D) -> Self {
        if let Err(err) = output.set(false) {
            warn!("relay initial off command failed: {err}");
        }
        Self {
            output,
            delay,
            stop: None,
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

impl<O: RelayOutput, D: Delay> Actuator for Relay<O, D> {
    fn activate(&mut self, duration: Duration) -> ActivationReport {
        let mut report = ActivationReport {
            requested: duration,
            held: Duration::ZERO,
            interrupted: false,
            fault: None,
        };

        if let Some(stop) = &self.stop {
            stop.clear();
        }

        let engaged = Engaged {
            output: &mut self.output,
        };

        if let Err(err) = engaged.output.set(true) {
            warn!("relay on command failed: {err}");
            report.fault = Some(err);
            return report;
        }
        info!("relay on for {}s", duration.as_secs());

        match &self.stop {
            None => {
                self.delay.delay(duration);
                report.held = duration;
            }
            Some(stop) => {
                while report.held < duration {
                    if stop.is_raised() {
                        warn!(
                            "relay hold interrupted by stop signal after {}s",
                            report.held.as_secs()
                        );
                        report.interrupted = true;
                        break;
                    }
                    let step = (duration - report.held).min(STOP_POLL);
                    self.delay.delay(step);
                    report.held += step;
                }
            }
        }

        drop(engaged);
        info!("relay off after {}s", report.held.as_secs());
        report
    }
}
