use std::time::Duration;

use log::{debug, info};

use crate::{
    clock::ClockSource,
    config::ScheduleConfig,
    delay::Delay,
    indicator::{Indicator, IndicatorChannel, IndicatorMode},
    relay::{ActivationReport, Actuator},
    retained::RetainedState,
    sync::{sync_with_retries, SyncOutcome, TimeSynchronizer},
    types::{CycleAction, WallClockTime},
    window::{ActivationWindow, WindowKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Activate(WindowKind),
    DailyReset,
    Idle { resync: bool },
    Manual(Duration),
}

/// Collaborators the scheduler drives during one wake cycle.
pub struct CycleContext<'a> {
    pub clock: &'a mut dyn ClockSource,
    pub synchronizer: &'a mut dyn TimeSynchronizer,
    pub actuator: &'a mut dyn Actuator,
    pub delay: &'a mut dyn Delay,
    pub indicator: &'a dyn Indicator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub action: CycleAction,
    pub activation: Option<ActivationReport>,
    pub sync: Option<SyncOutcome>,
}

#[derive(Debug, Clone)]
pub struct ActivationScheduler {
    config: ScheduleConfig,
    morning: ActivationWindow,
    evening: ActivationWindow,
}

impl ActivationScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            morning: config.morning_window(),
            evening: config.evening_window(),
            config,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// First match wins: morning, evening, post-evening reset, idle.
    pub fn decide(&self, now: &WallClockTime, state: &RetainedState) -> Decision {
        if let Some(duration) = self.config.debug_activation() {
            return Decision::Manual(duration);
        }

        let gated = self.config.require_trusted_time && !state.time_is_trusted;
        if !gated {
            if self.morning.contains(now) && !state.morning_fired {
                return Decision::Activate(WindowKind::Morning);
            }
            if self.evening.contains(now) && !state.evening_fired {
                return Decision::Activate(WindowKind::Evening);
            }
            if self.is_reset_time(now) && state.morning_fired && state.evening_fired {
                return Decision::DailyReset;
            }
        }

        Decision::Idle {
            resync: !state.time_is_trusted,
        }
    }

    /// State to persist before acting, so a reset mid-activation cannot re-fire
    /// the window. `None` when the decision does not set a fired flag.
    pub fn precommit(&self, now: &WallClockTime, state: &RetainedState) -> Option<RetainedState> {
        let Decision::Activate(kind) = self.decide(now, state) else {
            return None;
        };
        let mut committed = *state;
        match kind {
            WindowKind::Morning => committed.morning_fired = true,
            WindowKind::Evening => committed.evening_fired = true,
        }
        Some(committed)
    }

    /// Minutes evening_end..=reset_after_minute of the evening hour are a dead
    /// zone: neither window nor reset applies there.
    pub fn is_reset_time(&self, now: &WallClockTime) -> bool {
        now.hour == self.evening.start_hour && now.minute > self.config.reset_after_minute
    }

    pub fn decide_and_act(
        &self,
        now: &WallClockTime,
        state: &mut RetainedState,
        ctx: &mut CycleContext<'_>,
    ) -> CycleOutcome {
        let decision = self.decide(now, state);
        debug!("decision at {now}: {decision:?} (state {state:?})");

        match decision {
            Decision::Activate(kind) => {
                // Flag first: an interrupted hold must not re-fire this window.
                match kind {
                    WindowKind::Morning => state.morning_fired = true,
                    WindowKind::Evening => state.evening_fired = true,
                }
                info!("within {kind:?} window at {now}; activating relay");
                let report = self.drive_relay(ctx, self.config.activation());
                CycleOutcome {
                    action: kind.action(),
                    activation: Some(report),
                    sync: None,
                }
            }
            Decision::DailyReset => {
                state.morning_fired = false;
                state.evening_fired = false;
                info!("evening window elapsed at {now}; activation flags reset");
                CycleOutcome {
                    action: CycleAction::DailyReset,
                    activation: None,
                    sync: None,
                }
            }
            Decision::Manual(duration) => {
                info!("debug activation for {}s", duration.as_secs());
                let report = self.drive_relay(ctx, duration);
                CycleOutcome {
                    action: CycleAction::ManualActivation,
                    activation: Some(report),
                    sync: None,
                }
            }
            Decision::Idle { resync: false } => CycleOutcome {
                action: CycleAction::Idle,
                activation: None,
                sync: None,
            },
            Decision::Idle { resync: true } => {
                let outcome = sync_with_retries(
                    &mut *ctx.synchronizer,
                    &mut *ctx.clock,
                    &mut *ctx.delay,
                    ctx.indicator,
                    self.config.sync_attempts,
                    self.config.sync_retry_wait(),
                );
                state.time_is_trusted = outcome.succeeded;
                if !outcome.succeeded {
                    info!(
                        "clock still untrusted after {} attempts; retrying next cycle",
                        outcome.attempts
                    );
                }
                CycleOutcome {
                    action: CycleAction::Idle,
                    activation: None,
                    sync: Some(outcome),
                }
            }
        }
    }

    fn drive_relay(&self, ctx: &mut CycleContext<'_>, duration: Duration) -> ActivationReport {
        ctx.indicator.set_mode(IndicatorChannel::Relay, IndicatorMode::On);
        let report = ctx.actuator.activate(duration);
        ctx.indicator.set_mode(IndicatorChannel::Relay, IndicatorMode::Off);
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        clock::SharedClock,
        indicator::ModeRegister,
        sync::SyncError,
        testing::{RecordingActuator, RecordingDelay, ScriptedSync},
    };

    struct Rig {
        clock: SharedClock,
        sync: ScriptedSync,
        actuator: RecordingActuator,
        delay: RecordingDelay,
        indicator: ModeRegister,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                clock: SharedClock::new(1_749_772_800, chrono_tz::UTC),
                sync: ScriptedSync::always(SyncError::ConnectivityFailure),
                actuator: RecordingActuator::default(),
                delay: RecordingDelay::default(),
                indicator: ModeRegister::new(),
            }
        }

        fn run(
            &mut self,
            scheduler: &ActivationScheduler,
            now: WallClockTime,
            state: &mut RetainedState,
        ) -> CycleOutcome {
            let mut ctx = CycleContext {
                clock: &mut self.clock,
                synchronizer: &mut self.sync,
                actuator: &mut self.actuator,
                delay: &mut self.delay,
                indicator: &self.indicator,
            };
            scheduler.decide_and_act(&now, state, &mut ctx)
        }
    }

    fn at(hour: u8, minute: u8) -> WallClockTime {
        WallClockTime::new(NaiveDate::from_ymd_opt(2026, 5, 20).unwrap(), hour, minute, 0)
    }

    fn trusted(morning: bool, evening: bool) -> RetainedState {
        RetainedState {
            wake_count: 10,
            morning_fired: morning,
            evening_fired: evening,
            time_is_trusted: true,
        }
    }

    fn scheduler() -> ActivationScheduler {
        ActivationScheduler::new(ScheduleConfig::default())
    }

    #[test]
    fn morning_window_fires_once() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = trusted(false, false);

        let outcome = rig.run(&scheduler, at(5, 10), &mut state);

        assert_eq!(outcome.action, CycleAction::MorningActivation);
        assert_eq!(rig.actuator.durations, vec![Duration::from_secs(300)]);
        assert_eq!(state, trusted(true, false));
        assert_eq!(
            rig.indicator.mode(IndicatorChannel::Relay),
            IndicatorMode::Off
        );

        let again = rig.run(&scheduler, at(5, 20), &mut state);

        assert_eq!(again.action, CycleAction::Idle);
        assert_eq!(rig.actuator.durations.len(), 1);
        assert_eq!(state, trusted(true, false));
    }

    #[test]
    fn every_minute_of_morning_window_fires_exactly_once() {
        let scheduler = scheduler();
        for minute in 0..30 {
            let mut rig = Rig::new();
            let mut state = trusted(false, false);

            rig.run(&scheduler, at(5, minute), &mut state);
            for later in minute..30 {
                rig.run(&scheduler, at(5, later), &mut state);
            }

            assert_eq!(rig.actuator.durations.len(), 1, "start minute {minute}");
            assert!(state.morning_fired);
        }
    }

    #[test]
    fn evening_window_fires_once() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = trusted(true, false);

        let outcome = rig.run(&scheduler, at(22, 0), &mut state);

        assert_eq!(outcome.action, CycleAction::EveningActivation);
        assert_eq!(state, trusted(true, true));

        let again = rig.run(&scheduler, at(22, 15), &mut state);

        assert_eq!(again.action, CycleAction::Idle);
        assert_eq!(rig.actuator.durations.len(), 1);
        assert_eq!(state, trusted(true, true));
    }

    #[test]
    fn window_boundaries() {
        let scheduler = scheduler();
        let state = trusted(false, false);

        assert_eq!(
            scheduler.decide(&at(5, 0), &state),
            Decision::Activate(WindowKind::Morning)
        );
        assert_eq!(
            scheduler.decide(&at(5, 30), &state),
            Decision::Idle { resync: false }
        );
        assert_eq!(
            scheduler.decide(&at(22, 30), &state),
            Decision::Idle { resync: false }
        );
    }

    #[test]
    fn never_actuates_outside_windows() {
        let scheduler = scheduler();
        let mut rig = Rig::new();

        for hour in 0..24u8 {
            for minute in 0..60u8 {
                let now = at(hour, minute);
                let in_window = (hour == 5 || hour == 22) && minute < 30;
                if in_window {
                    continue;
                }
                for (morning, evening) in [(false, false), (true, false), (false, true), (true, true)]
                {
                    let mut state = trusted(morning, evening);
                    rig.run(&scheduler, now, &mut state);
                }
            }
        }

        assert!(rig.actuator.durations.is_empty());
    }

    #[test]
    fn post_evening_reset_clears_both_flags() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = trusted(true, true);

        let outcome = rig.run(&scheduler, at(22, 40), &mut state);

        assert_eq!(outcome.action, CycleAction::DailyReset);
        assert_eq!(state, trusted(false, false));
        assert!(rig.actuator.durations.is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = trusted(true, true);

        rig.run(&scheduler, at(22, 36), &mut state);
        for minute in 37..60 {
            let outcome = rig.run(&scheduler, at(22, minute), &mut state);
            assert_eq!(outcome.action, CycleAction::Idle);
            assert_eq!(state, trusted(false, false));
        }
        assert!(rig.actuator.durations.is_empty());
    }

    #[test]
    fn dead_zone_neither_fires_nor_resets() {
        let scheduler = scheduler();

        for minute in 30..=35 {
            assert_eq!(
                scheduler.decide(&at(22, minute), &trusted(true, true)),
                Decision::Idle { resync: false },
                "minute {minute}"
            );
        }
    }

    #[test]
    fn untrusted_idle_cycle_exhausts_sync_attempts() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = RetainedState {
            wake_count: 3,
            ..RetainedState::default()
        };

        let outcome = rig.run(&scheduler, at(13, 0), &mut state);

        assert_eq!(outcome.action, CycleAction::Idle);
        let sync = outcome.sync.unwrap();
        assert!(!sync.succeeded);
        assert_eq!(sync.attempts, 5);
        assert_eq!(rig.sync.calls, 5);
        assert!(!state.time_is_trusted);
        assert!(rig.actuator.durations.is_empty());
    }

    #[test]
    fn successful_resync_marks_time_trusted() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        rig.sync = ScriptedSync::failing_then_ok(1, 1_782_875_700);
        let mut state = RetainedState {
            wake_count: 3,
            ..RetainedState::default()
        };

        rig.run(&scheduler, at(13, 0), &mut state);

        assert!(state.time_is_trusted);
        assert_eq!(rig.sync.calls, 2);
    }

    #[test]
    fn untrusted_clock_still_schedules_by_default() {
        let scheduler = scheduler();
        let mut rig = Rig::new();
        let mut state = RetainedState {
            wake_count: 3,
            ..RetainedState::default()
        };

        let outcome = rig.run(&scheduler, at(5, 5), &mut state);

        assert_eq!(outcome.action, CycleAction::MorningActivation);
        assert_eq!(rig.sync.calls, 0);
    }

    #[test]
    fn trusted_time_gate_holds_activation() {
        let scheduler = ActivationScheduler::new(ScheduleConfig {
            require_trusted_time: true,
            ..ScheduleConfig::default()
        });
        let state = RetainedState {
            wake_count: 3,
            ..RetainedState::default()
        };

        assert_eq!(
            scheduler.decide(&at(5, 5), &state),
            Decision::Idle { resync: true }
        );
    }

    #[test]
    fn precommit_sets_only_the_firing_flag() {
        let scheduler = scheduler();

        assert_eq!(
            scheduler.precommit(&at(22, 5), &trusted(true, false)),
            Some(trusted(true, true))
        );
        assert_eq!(scheduler.precommit(&at(22, 40), &trusted(true, true)), None);
    }

    #[test]
    fn debug_activation_bypasses_windows_and_flags() {
        let scheduler = ActivationScheduler::new(ScheduleConfig {
            debug_activation_secs: Some(2),
            ..ScheduleConfig::default()
        });
        let mut rig = Rig::new();
        let mut state = trusted(false, false);

        let outcome = rig.run(&scheduler, at(13, 0), &mut state);

        assert_eq!(outcome.action, CycleAction::ManualActivation);
        assert_eq!(rig.actuator.durations, vec![Duration::from_secs(2)]);
        assert_eq!(state, trusted(false, false));
    }
}
