use serde::{Deserialize, Serialize};

use crate::types::{CycleAction, WallClockTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowKind {
    Morning,
    Evening,
}

impl WindowKind {
    pub fn action(self) -> CycleAction {
        match self {
            Self::Morning => CycleAction::MorningActivation,
            Self::Evening => CycleAction::EveningActivation,
        }
    }
}

/// A daily `[start_hour:00, start_hour:end_minute)` interval in which the relay may fire once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationWindow {
    pub kind: WindowKind,
    pub start_hour: u8,
    pub end_minute: u8,
}

impl ActivationWindow {
    pub fn new(kind: WindowKind, start_hour: u8, end_minute: u8) -> Self {
        Self {
            kind,
            start_hour,
            end_minute,
        }
    }

    pub fn contains(&self, now: &WallClockTime) -> bool {
        now.hour == self.start_hour && now.minute < self.end_minute
    }

    pub fn width_minutes(&self) -> u8 {
        self.end_minute
    }
}
