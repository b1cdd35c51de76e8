use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    indicator::IndicatorChannel,
    window::{ActivationWindow, WindowKind},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0:?} window start hour {1} is not a valid hour")]
    WindowHour(WindowKind, u8),
    #[error("{0:?} window end minute {1} must be within 1..=60")]
    WindowEnd(WindowKind, u8),
    #[error("morning and evening windows share hour {0}")]
    WindowsOverlap(u8),
    #[error("sleep interval {sleep_secs}s must be shorter than the narrowest window ({window_secs}s)")]
    SleepExceedsWindow { sleep_secs: u64, window_secs: u64 },
    #[error("minimum sleep {min_sleep_secs}s exceeds sleep interval {sleep_secs}s")]
    MinSleepExceedsInterval { min_sleep_secs: u64, sleep_secs: u64 },
    #[error("activation duration must be non-zero")]
    ZeroActivation,
    #[error("activation of {activation_secs}s does not fit in a {window_secs}s window")]
    ActivationExceedsWindow {
        activation_secs: u64,
        window_secs: u64,
    },
    #[error("reset minute {reset} falls inside the evening window ending at minute {window_end}")]
    ResetInsideWindow { reset: u8, window_end: u8 },
    #[error("reset minute {0} leaves no later minute in the hour for the daily reset")]
    ResetUnreachable(u8),
    #[error("minimum sleep must be non-zero")]
    ZeroMinSleep,
    #[error("sync attempts must be at least 1")]
    ZeroSyncAttempts,
    #[error("worst-case resync of {resync_secs}s does not fit in a {window_secs}s window")]
    ResyncExceedsWindow { resync_secs: u64, window_secs: u64 },
    #[error("unknown time zone `{0}`")]
    UnknownTimezone(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start_hour: u8,
    pub end_minute: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub morning: WindowConfig,
    pub evening: WindowConfig,
    pub activation_secs: u64,
    pub sleep_secs: u64,
    pub min_sleep_secs: u64,
    pub reset_after_minute: u8,
    pub sync_attempts: u8,
    pub sync_retry_wait_secs: u64,
    pub sync_on_cold_boot: bool,
    pub require_trusted_time: bool,
    #[serde(default)]
    pub debug_activation_secs: Option<u64>,
    pub cold_boot_epoch: i64,
    pub boot_pulses: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning: WindowConfig {
                start_hour: 5,
                end_minute: 30,
            },
            evening: WindowConfig {
                start_hour: 22,
                end_minute: 30,
            },
            activation_secs: 300,
            sleep_secs: 600,
            min_sleep_secs: 30,
            reset_after_minute: 35,
            sync_attempts: 5,
            sync_retry_wait_secs: 60,
            sync_on_cold_boot: true,
            require_trusted_time: false,
            debug_activation_secs: None,
            // 2025-06-13T00:00:00Z
            cold_boot_epoch: 1_749_772_800,
            boot_pulses: 5,
        }
    }
}

impl ScheduleConfig {
    pub fn morning_window(&self) -> ActivationWindow {
        ActivationWindow::new(
            WindowKind::Morning,
            self.morning.start_hour,
            self.morning.end_minute,
        )
    }

    pub fn evening_window(&self) -> ActivationWindow {
        ActivationWindow::new(
            WindowKind::Evening,
            self.evening.start_hour,
            self.evening.end_minute,
        )
    }

    pub fn activation(&self) -> Duration {
        Duration::from_secs(self.activation_secs)
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_secs(self.min_sleep_secs)
    }

    pub fn sync_retry_wait(&self) -> Duration {
        Duration::from_secs(self.sync_retry_wait_secs)
    }

    pub fn debug_activation(&self) -> Option<Duration> {
        self.debug_activation_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, window) in [
            (WindowKind::Morning, self.morning),
            (WindowKind::Evening, self.evening),
        ] {
            if window.start_hour > 23 {
                return Err(ConfigError::WindowHour(kind, window.start_hour));
            }
            if !(1..=60).contains(&window.end_minute) {
                return Err(ConfigError::WindowEnd(kind, window.end_minute));
            }
        }

        // Windows never leave their start hour, so distinct hours means disjoint windows.
        if self.morning.start_hour == self.evening.start_hour {
            return Err(ConfigError::WindowsOverlap(self.morning.start_hour));
        }

        let window_secs = self.narrowest_window_secs();
        if self.sleep_secs >= window_secs {
            return Err(ConfigError::SleepExceedsWindow {
                sleep_secs: self.sleep_secs,
                window_secs,
            });
        }
        if self.min_sleep_secs == 0 {
            return Err(ConfigError::ZeroMinSleep);
        }
        if self.min_sleep_secs > self.sleep_secs {
            return Err(ConfigError::MinSleepExceedsInterval {
                min_sleep_secs: self.min_sleep_secs,
                sleep_secs: self.sleep_secs,
            });
        }

        if self.activation_secs == 0 {
            return Err(ConfigError::ZeroActivation);
        }
        if self.activation_secs > window_secs {
            return Err(ConfigError::ActivationExceedsWindow {
                activation_secs: self.activation_secs,
                window_secs,
            });
        }

        if self.reset_after_minute < self.evening.end_minute {
            return Err(ConfigError::ResetInsideWindow {
                reset: self.reset_after_minute,
                window_end: self.evening.end_minute,
            });
        }
        if self.reset_after_minute >= 59 {
            return Err(ConfigError::ResetUnreachable(self.reset_after_minute));
        }

        if self.sync_attempts == 0 {
            return Err(ConfigError::ZeroSyncAttempts);
        }
        self.check_resync(Duration::ZERO)
    }

    /// Rejects retry schedules whose worst case, with `per_attempt` spent inside
    /// each attempt, would keep the device awake past a whole window.
    pub fn check_resync(&self, per_attempt: Duration) -> Result<(), ConfigError> {
        let attempts = u32::from(self.sync_attempts);
        let worst = per_attempt
            .saturating_mul(attempts)
            .saturating_add(self.sync_retry_wait().saturating_mul(attempts.saturating_sub(1)));
        let window_secs = self.narrowest_window_secs();
        if worst.as_secs() >= window_secs {
            return Err(ConfigError::ResyncExceedsWindow {
                resync_secs: worst.as_secs(),
                window_secs,
            });
        }
        Ok(())
    }

    fn narrowest_window_secs(&self) -> u64 {
        let minutes = self
            .morning_window()
            .width_minutes()
            .min(self.evening_window().width_minutes());
        u64::from(minutes) * 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub ntp_servers: Vec<String>,
    pub connect_attempts: u32,
    pub connect_poll_ms: u64,
    pub epoch_attempts: u32,
    pub epoch_poll_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            ntp_servers: vec!["pool.ntp.org".to_string(), "time.nist.gov".to_string()],
            connect_attempts: 20,
            connect_poll_ms: 500,
            epoch_attempts: 10,
            epoch_poll_ms: 1_000,
        }
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        self.connect_attempts = self.connect_attempts.clamp(1, 120);
        self.connect_poll_ms = self.connect_poll_ms.clamp(100, 5_000);
        self.epoch_attempts = self.epoch_attempts.clamp(1, 60);
        self.epoch_poll_ms = self.epoch_poll_ms.clamp(100, 5_000);
        self.ntp_servers.retain(|server| !server.trim().is_empty());
        if self.ntp_servers.is_empty() {
            self.ntp_servers = NetworkConfig::default().ntp_servers;
        }
    }

    /// Longest a single sync attempt can poll before giving up.
    pub fn worst_case_attempt(&self) -> Duration {
        let connect = u64::from(self.connect_attempts).saturating_mul(self.connect_poll_ms);
        let epoch = u64::from(self.epoch_attempts).saturating_mul(self.epoch_poll_ms);
        Duration::from_millis(connect.saturating_add(epoch))
    }

    pub fn has_station_credentials(&self) -> bool {
        !self.wifi_ssid.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareConfig {
    pub relay_pin: i32,
    pub button_pin: i32,
    pub status_led_pin: i32,
    pub relay_led_pin: i32,
    pub boot_led_pin: i32,
    pub sync_led_pin: i32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            relay_pin: 8,
            button_pin: 0,
            status_led_pin: 2,
            relay_led_pin: 3,
            boot_led_pin: 4,
            sync_led_pin: 5,
        }
    }
}

impl HardwareConfig {
    pub fn indicator_pin(&self, channel: IndicatorChannel) -> i32 {
        match channel {
            IndicatorChannel::Status => self.status_led_pin,
            IndicatorChannel::Relay => self.relay_led_pin,
            IndicatorChannel::Boot => self.boot_led_pin,
            IndicatorChannel::Sync => self.sync_led_pin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub schedule: ScheduleConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            network: NetworkConfig::default(),
            hardware: HardwareConfig::default(),
            timezone: "Europe/Rome".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;
        self.schedule.check_resync(self.network.worst_case_attempt())?;
        self.time_zone()?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut runtime: Self = serde_json::from_str(json)?;
        runtime.network.sanitize();
        Ok(runtime)
    }
}
