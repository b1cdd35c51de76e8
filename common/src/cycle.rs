use std::time::Duration;

use log::{info, warn};

use crate::{
    delay::Uptime,
    indicator::{IndicatorChannel, IndicatorMode},
    power::plan_sleep,
    retained::{RetainedRegion, RetainedState},
    scheduler::{ActivationScheduler, CycleContext, CycleOutcome},
    sync::{sync_with_retries, SyncOutcome},
    types::{CycleReport, WakeCause, WakeReason, WallClockTime},
};

const BOOT_PULSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub reason: WakeReason,
    pub now: WallClockTime,
    pub outcome: CycleOutcome,
    pub cold_boot_sync: Option<SyncOutcome>,
    pub state: RetainedState,
    pub sleep_for: Duration,
}

impl CycleSummary {
    pub fn report(&self) -> CycleReport {
        let sync_attempts = self
            .cold_boot_sync
            .iter()
            .chain(self.outcome.sync.iter())
            .map(|sync| sync.attempts)
            .sum();

        CycleReport {
            wake_count: self.state.wake_count,
            wake_reason: self.reason.as_str(),
            action: self.outcome.action.as_str(),
            now: self.now.to_string(),
            morning_fired: self.state.morning_fired,
            evening_fired: self.state.evening_fired,
            time_trusted: self.state.time_is_trusted,
            sync_attempts,
            relay_held_sec: self
                .outcome
                .activation
                .as_ref()
                .map(|report| report.held.as_secs())
                .unwrap_or(0),
            sleep_sec: self.sleep_for.as_secs(),
        }
    }
}

/// One Running phase, from the entry point up to the moment the power
/// controller is asked to suspend.
pub struct WakeCycle<'a> {
    pub scheduler: &'a ActivationScheduler,
    pub region: &'a mut dyn RetainedRegion,
    pub uptime: &'a dyn Uptime,
    pub ctx: CycleContext<'a>,
}

impl WakeCycle<'_> {
    pub fn run(mut self, cause: WakeCause) -> CycleSummary {
        let scheduler = self.scheduler;
        let config = scheduler.config();
        self.ctx.indicator.set_mode(IndicatorChannel::Status, IndicatorMode::BlinkFast);

        let mut state = RetainedState::load(&*self.region);
        let reason = WakeReason::classify(cause, state.wake_count);

        let mut cold_boot_sync = None;
        if reason == WakeReason::ColdBoot {
            state = RetainedState::default();
            self.pulse_boot(config.boot_pulses);

            info!("cold boot; setting clock to {}", config.cold_boot_epoch);
            if let Err(err) = self.ctx.clock.set_from_epoch(config.cold_boot_epoch) {
                warn!("clock reinitialization failed: {err}");
            }

            if config.sync_on_cold_boot && config.debug_activation_secs.is_none() {
                let outcome = sync_with_retries(
                    &mut *self.ctx.synchronizer,
                    &mut *self.ctx.clock,
                    &mut *self.ctx.delay,
                    self.ctx.indicator,
                    1,
                    Duration::ZERO,
                );
                state.time_is_trusted = outcome.succeeded;
                cold_boot_sync = Some(outcome);
            }
        }

        state.wake_count = state.wake_count.saturating_add(1);
        info!("wake #{} ({})", state.wake_count, reason.as_str());

        self.ctx.indicator.set_mode(IndicatorChannel::Status, IndicatorMode::BlinkSlow);
        let now = self.ctx.clock.now();

        if let Some(committed) = scheduler.precommit(&now, &state) {
            committed.save(&mut *self.region);
        }
        let outcome = scheduler.decide_and_act(&now, &mut state, &mut self.ctx);
        state.save(&mut *self.region);

        let sleep_for = plan_sleep(
            config.sleep_interval(),
            self.uptime.uptime(),
            config.min_sleep(),
        );
        self.ctx.indicator.all_off();

        CycleSummary {
            reason,
            now,
            outcome,
            cold_boot_sync,
            state,
            sleep_for,
        }
    }

    fn pulse_boot(&mut self, pulses: u8) {
        for _ in 0..pulses {
            self.ctx.indicator.set_mode(IndicatorChannel::Boot, IndicatorMode::On);
            self.ctx.delay.delay(BOOT_PULSE);
            self.ctx.indicator.set_mode(IndicatorChannel::Boot, IndicatorMode::Off);
            self.ctx.delay.delay(BOOT_PULSE);
        }
    }
}
