pub mod clock;
pub mod config;
pub mod cycle;
pub mod delay;
pub mod indicator;
pub mod power;
pub mod relay;
pub mod retained;
pub mod scheduler;
pub mod sync;
pub mod types;
pub mod window;

#[cfg(test)]
mod testing;

pub use clock::{ClockError, ClockSource, SharedClock, MIN_VALID_EPOCH};
pub use config::{ConfigError, HardwareConfig, NetworkConfig, RuntimeConfig, ScheduleConfig};
pub use cycle::{CycleSummary, WakeCycle};
pub use delay::{poll_bounded, Delay, InstantUptime, ThreadDelay, Uptime};
pub use indicator::{Blinker, Indicator, IndicatorChannel, IndicatorMode, ModeRegister};
pub use power::{plan_sleep, sleep_micros, suspend, PowerController, PowerError};
pub use relay::{ActivationReport, Actuator, Relay, RelayError, RelayOutput, StopSignal};
pub use retained::{RamRegion, RetainedRegion, RetainedState, RetainedStateError, RETAINED_LEN};
pub use scheduler::{ActivationScheduler, CycleContext, CycleOutcome, Decision};
pub use sync::{sync_with_retries, SyncError, SyncOutcome, TimeSynchronizer};
pub use types::{CycleAction, CycleReport, WakeCause, WakeReason, WallClockTime};
pub use window::{ActivationWindow, WindowKind};
