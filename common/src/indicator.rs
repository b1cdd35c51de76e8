use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub const STEADY_POLL: Duration = Duration::from_millis(100);
pub const SLOW_BLINK_HALF_PERIOD: Duration = Duration::from_millis(1_000);
pub const FAST_BLINK_HALF_PERIOD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorMode {
    Off,
    On,
    BlinkSlow,
    BlinkFast,
}

impl IndicatorMode {
    fn to_raw(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::BlinkSlow => 2,
            Self::BlinkFast => 3,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::On,
            2 => Self::BlinkSlow,
            3 => Self::BlinkFast,
            _ => Self::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorChannel {
    Status,
    Relay,
    Boot,
    Sync,
}

impl IndicatorChannel {
    pub const ALL: [IndicatorChannel; 4] = [Self::Status, Self::Relay, Self::Boot, Self::Sync];

    pub fn index(self) -> usize {
        match self {
            Self::Status => 0,
            Self::Relay => 1,
            Self::Boot => 2,
            Self::Sync => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Relay => "relay",
            Self::Boot => "boot",
            Self::Sync => "sync",
        }
    }
}

/// Fire-and-forget mode sink.
pub trait Indicator {
    fn set_mode(&self, channel: IndicatorChannel, mode: IndicatorMode);

    fn all_off(&self) {
        for channel in IndicatorChannel::ALL {
            self.set_mode(channel, IndicatorMode::Off);
        }
    }
}

/// One atomic mode register per channel. Written by the wake cycle, polled by
/// the indicator tasks.
#[derive(Debug, Clone, Default)]
pub struct ModeRegister {
    modes: Arc<[AtomicU8; 4]>,
}

impl ModeRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self, channel: IndicatorChannel) -> IndicatorMode {
        IndicatorMode::from_raw(self.modes[channel.index()].load(Ordering::Relaxed))
    }
}

impl Indicator for ModeRegister {
    fn set_mode(&self, channel: IndicatorChannel, mode: IndicatorMode) {
        self.modes[channel.index()].store(mode.to_raw(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkStep {
    pub lit: bool,
    pub changed: bool,
    pub hold: Duration,
}

/// Per-channel LED state machine shared by every indicator task.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blinker {
    lit: bool,
}

impl Blinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, mode: IndicatorMode) -> BlinkStep {
        let (lit, hold) = match mode {
            IndicatorMode::Off => (false, STEADY_POLL),
            IndicatorMode::On => (true, STEADY_POLL),
            IndicatorMode::BlinkSlow => (!self.lit, SLOW_BLINK_HALF_PERIOD),
            IndicatorMode::BlinkFast => (!self.lit, FAST_BLINK_HALF_PERIOD),
        };

        let changed = lit != self.lit;
        self.lit = lit;
        BlinkStep { lit, changed, hold }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_tracks_each_channel_independently() {
        let register = ModeRegister::new();
        let reader = register.clone();

        register.set_mode(IndicatorChannel::Relay, IndicatorMode::On);
        register.set_mode(IndicatorChannel::Sync, IndicatorMode::BlinkFast);

        assert_eq!(reader.mode(IndicatorChannel::Relay), IndicatorMode::On);
        assert_eq!(reader.mode(IndicatorChannel::Sync), IndicatorMode::BlinkFast);
        assert_eq!(reader.mode(IndicatorChannel::Status), IndicatorMode::Off);

        register.all_off();
        assert_eq!(reader.mode(IndicatorChannel::Relay), IndicatorMode::Off);
    }

    #[test]
    fn steady_modes_only_change_once() {
        let mut blinker = Blinker::new();

        let first = blinker.step(IndicatorMode::On);
        let second = blinker.step(IndicatorMode::On);

        assert!(first.changed && first.lit);
        assert!(!second.changed && second.lit);
        assert_eq!(second.hold, STEADY_POLL);
    }

    #[test]
    fn blink_modes_toggle_at_their_period() {
        let mut blinker = Blinker::new();

        let a = blinker.step(IndicatorMode::BlinkFast);
        let b = blinker.step(IndicatorMode::BlinkFast);
        let c = blinker.step(IndicatorMode::BlinkSlow);

        assert_eq!((a.lit, b.lit, c.lit), (true, false, true));
        assert_eq!(a.hold, FAST_BLINK_HALF_PERIOD);
        assert_eq!(c.hold, SLOW_BLINK_HALF_PERIOD);
    }
}
