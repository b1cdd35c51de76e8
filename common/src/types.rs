use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Local wall-clock reading in the configured time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClockTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub date: NaiveDate,
}

impl WallClockTime {
    pub fn new(date: NaiveDate, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
            date,
        }
    }

    /// Decomposes a unix epoch in `tz`. Out-of-range epochs read as 1970-01-01 UTC.
    pub fn from_epoch(epoch_seconds: i64, tz: Tz) -> Self {
        let utc = DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_default();
        Self::from_datetime(&utc.with_timezone(&tz))
    }

    pub fn from_datetime<Z: TimeZone>(local: &DateTime<Z>) -> Self {
        Self {
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
            date: local.date_naive(),
        }
    }
}

impl core::fmt::Display for WallClockTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hour,
            self.minute,
            self.second
        )
    }
}

/// Raw wake source as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    Button,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WakeReason {
    Timer,
    Manual,
    ColdBoot,
}

impl WakeReason {
    /// Lost retained state wins over whatever the platform reports.
    pub fn classify(cause: WakeCause, wake_count_before: u32) -> Self {
        if wake_count_before == 0 {
            return Self::ColdBoot;
        }

        match cause {
            WakeCause::Timer => Self::Timer,
            WakeCause::Button => Self::Manual,
            WakeCause::Undefined => {
                log::warn!("wake cause undefined with valid retained state; treating as timer");
                Self::Timer
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "TIMER",
            Self::Manual => "MANUAL",
            Self::ColdBoot => "COLD_BOOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleAction {
    MorningActivation,
    EveningActivation,
    DailyReset,
    Idle,
    ManualActivation,
}

impl CycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MorningActivation => "MORNING_ACTIVATION",
            Self::EveningActivation => "EVENING_ACTIVATION",
            Self::DailyReset => "DAILY_RESET",
            Self::Idle => "IDLE",
            Self::ManualActivation => "MANUAL_ACTIVATION",
        }
    }
}

/// One line per wake cycle, emitted as JSON before sleeping.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    #[serde(rename = "wakeCount")]
    pub wake_count: u32,
    #[serde(rename = "wakeReason")]
    pub wake_reason: &'static str,
    pub action: &'static str,
    pub now: String,
    #[serde(rename = "morningFired")]
    pub morning_fired: bool,
    #[serde(rename = "eveningFired")]
    pub evening_fired: bool,
    #[serde(rename = "timeTrusted")]
    pub time_trusted: bool,
    #[serde(rename = "syncAttempts")]
    pub sync_attempts: u8,
    #[serde(rename = "relayHeldSec")]
    pub relay_held_sec: u64,
    #[serde(rename = "sleepSec")]
    pub sleep_sec: u64,
}
