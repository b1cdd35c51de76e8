//! Fakes shared by the unit tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    clock::ClockSource,
    delay::{Delay, Uptime},
    relay::{ActivationReport, Actuator, RelayError, RelayOutput, StopSignal},
    retained::{RetainedBlock, RetainedRegion, RetainedState, RETAINED_LEN},
    sync::{SyncError, TimeSynchronizer},
};

#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub waits: Vec<Duration>,
    raise: Option<(Duration, StopSignal)>,
    panics: bool,
}

impl RecordingDelay {
    pub fn raise_after(mut self, after: Duration, stop: StopSignal) -> Self {
        self.raise = Some((after, stop));
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn total(&self) -> Duration {
        self.waits.iter().sum()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        if self.panics {
            panic!("delay interrupted");
        }
        self.waits.push(duration);
        if let Some((after, stop)) = &self.raise {
            if self.total() >= *after {
                stop.raise();
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    writes: Arc<Mutex<Vec<bool>>>,
    fail_on: bool,
}

impl RecordingOutput {
    pub fn failing_on(mut self) -> Self {
        self.fail_on = true;
        self
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_on(&self) -> bool {
        self.writes().last().copied().unwrap_or(false)
    }
}

impl RelayOutput for RecordingOutput {
    fn set(&mut self, on: bool) -> Result<(), RelayError> {
        self.writes.lock().unwrap().push(on);
        if on && self.fail_on {
            return Err(RelayError::Output("stuck driver".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingActuator {
    pub durations: Vec<Duration>,
    pub seen_at_activation: Vec<RetainedState>,
    watched: Option<SharedRegion>,
}

impl RecordingActuator {
    /// Captures the retained state as it stands when each activation starts.
    pub fn watch(&mut self, region: SharedRegion) {
        self.watched = Some(region);
    }
}

impl Actuator for RecordingActuator {
    fn activate(&mut self, duration: Duration) -> ActivationReport {
        if let Some(region) = &self.watched {
            self.seen_at_activation.push(RetainedState::load(region));
        }
        self.durations.push(duration);
        ActivationReport {
            requested: duration,
            held: duration,
            interrupted: false,
            fault: None,
        }
    }
}

#[derive(Debug)]
pub struct ScriptedSync {
    pub calls: u32,
    failures_left: Option<u32>,
    error: SyncError,
    epoch: i64,
}

impl ScriptedSync {
    pub fn always(error: SyncError) -> Self {
        Self {
            calls: 0,
            failures_left: None,
            error,
            epoch: 0,
        }
    }

    pub fn failing_then_ok(failures: u32, epoch: i64) -> Self {
        Self {
            calls: 0,
            failures_left: Some(failures),
            error: SyncError::ConnectivityFailure,
            epoch,
        }
    }
}

impl TimeSynchronizer for ScriptedSync {
    fn sync(&mut self, clock: &mut dyn ClockSource) -> Result<i64, SyncError> {
        self.calls += 1;
        match &mut self.failures_left {
            None => Err(self.error.clone()),
            Some(0) => {
                clock.set_from_epoch(self.epoch)?;
                Ok(self.epoch)
            }
            Some(left) => {
                *left -= 1;
                Err(self.error.clone())
            }
        }
    }
}

/// Retained region whose clones share one block.
#[derive(Debug, Clone, Default)]
pub struct SharedRegion(Arc<Mutex<RetainedBlock>>);

impl SharedRegion {
    pub fn clear(&self) {
        *self.0.lock().unwrap() = [0; RETAINED_LEN];
    }
}

impl RetainedRegion for SharedRegion {
    fn read(&self) -> RetainedBlock {
        *self.0.lock().unwrap()
    }

    fn write(&mut self, block: &RetainedBlock) {
        *self.0.lock().unwrap() = *block;
    }
}

pub struct FixedUptime(pub Duration);

impl Uptime for FixedUptime {
    fn uptime(&self) -> Duration {
        self.0
    }
}
