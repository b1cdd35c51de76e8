use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use valve_common::{
    clock::check_epoch, poll_bounded, sleep_micros, suspend, ActivationScheduler, Blinker,
    ClockSource, CycleContext, CycleSummary, Delay, IndicatorChannel, ModeRegister,
    NetworkConfig, PowerController, PowerError, RamRegion, Relay, RelayError, RelayOutput,
    RuntimeConfig, SharedClock, StopSignal, SyncError, TimeSynchronizer, Uptime, WakeCause,
    WakeCycle,
};

const DEFAULT_SPEEDUP: f64 = 600.0;
// 2026-05-20 03:00 in Rome.
const DEFAULT_START_EPOCH: i64 = 1_779_238_800;

/// Simulation knobs read from the environment.
#[derive(Debug, Clone, PartialEq)]
struct SimSettings {
    config_path: Option<PathBuf>,
    speedup: f64,
    start_epoch: i64,
    sync_failures: u32,
    cycles: Option<u32>,
    power_loss_every: Option<u32>,
}

impl SimSettings {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            config_path: lookup("VALVE_CONFIG").map(PathBuf::from),
            speedup: parse_var(&lookup, "SIM_SPEEDUP")
                .filter(|speedup: &f64| speedup.is_finite() && *speedup > 0.0)
                .unwrap_or(DEFAULT_SPEEDUP),
            start_epoch: parse_var(&lookup, "SIM_START_EPOCH")
                .filter(|epoch: &i64| check_epoch(*epoch).is_ok())
                .unwrap_or(DEFAULT_START_EPOCH),
            sync_failures: parse_var(&lookup, "SIM_SYNC_FAILURES").unwrap_or(0),
            cycles: parse_var(&lookup, "SIM_CYCLES").filter(|cycles: &u32| *cycles > 0),
            power_loss_every: parse_var(&lookup, "SIM_POWER_LOSS_EVERY")
                .filter(|every: &u32| *every > 0),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {key}=`{raw}`");
            None
        }
    }
}

/// Simulated time base. The device clock is what the wake cycle reads and
/// overwrites; the reference clock plays the NTP servers.
#[derive(Debug, Clone)]
struct SimTime {
    device: SharedClock,
    reference: SharedClock,
    elapsed_ms: Arc<AtomicU64>,
}

impl SimTime {
    fn new(start_epoch: i64, tz: Tz) -> Self {
        Self {
            device: SharedClock::new(start_epoch, tz),
            reference: SharedClock::new(start_epoch, tz),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let before = self.elapsed_ms.fetch_add(ms, Ordering::Relaxed);
        let carried = (before.saturating_add(ms) / 1_000).saturating_sub(before / 1_000);
        let seconds = i64::try_from(carried).unwrap_or(i64::MAX);
        self.device.advance_secs(seconds);
        self.reference.advance_secs(seconds);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
struct SimDelay {
    time: SimTime,
    speedup: f64,
}

impl Delay for SimDelay {
    fn delay(&mut self, duration: Duration) {
        self.time.advance(duration);
        thread::sleep(duration.div_f64(self.speedup));
    }
}

struct SimUptime {
    time: SimTime,
    started: Duration,
}

impl SimUptime {
    fn start(time: SimTime) -> Self {
        let started = time.elapsed();
        Self { time, started }
    }
}

impl Uptime for SimUptime {
    fn uptime(&self) -> Duration {
        self.time.elapsed().saturating_sub(self.started)
    }
}

#[derive(Debug, Clone, Default)]
struct SimRelayOutput {
    energized: Arc<AtomicBool>,
}

impl SimRelayOutput {
    fn is_energized(&self) -> bool {
        self.energized.load(Ordering::Relaxed)
    }
}

impl RelayOutput for SimRelayOutput {
    fn set(&mut self, on: bool) -> Result<(), RelayError> {
        if self.energized.swap(on, Ordering::Relaxed) != on {
            info!(energized = on, "relay output changed");
        }
        Ok(())
    }
}

/// Stands in for WiFi plus NTP. Fails the first `failures_left` attempts at
/// the association step, then answers with the reference clock.
struct SimSynchronizer {
    reference: SharedClock,
    network: NetworkConfig,
    failures_left: u32,
    delay: SimDelay,
}

impl TimeSynchronizer for SimSynchronizer {
    fn sync(&mut self, clock: &mut dyn ClockSource) -> Result<i64, SyncError> {
        let reachable = self.failures_left == 0;
        let associated = poll_bounded(
            self.network.connect_attempts,
            Duration::from_millis(self.network.connect_poll_ms),
            &mut self.delay,
            || reachable,
        );
        if associated.is_none() {
            self.failures_left -= 1;
            debug!(remaining = self.failures_left, "simulated network unreachable");
            return Err(SyncError::ConnectivityFailure);
        }

        let epoch = self.reference.epoch_seconds();
        clock.set_from_epoch(epoch)?;
        info!(
            server = self.network.ntp_servers.first().map(String::as_str).unwrap_or("-"),
            "simulated NTP answered with epoch {epoch}"
        );
        Ok(epoch)
    }
}

struct SimPower {
    time: SimTime,
}

impl PowerController for SimPower {
    fn sleep_for(&mut self, interval: Duration) -> Result<(), PowerError> {
        let micros = sleep_micros(interval)?;
        debug!(micros, "entering simulated deep sleep");
        self.time.advance(interval);
        Ok(())
    }
}

/// Everything that lives on the board. Only `region` survives a simulated
/// power loss intact until `lose_power` is called.
struct SimDevice {
    scheduler: ActivationScheduler,
    region: RamRegion,
    time: SimTime,
    clock: SharedClock,
    synchronizer: SimSynchronizer,
    relay: Relay<SimRelayOutput, SimDelay>,
    delay: SimDelay,
    indicator: ModeRegister,
}

impl SimDevice {
    fn new(
        runtime: &RuntimeConfig,
        settings: &SimSettings,
        tz: Tz,
        indicator: ModeRegister,
        stop: StopSignal,
    ) -> Self {
        let time = SimTime::new(settings.start_epoch, tz);
        let delay = SimDelay {
            time: time.clone(),
            speedup: settings.speedup,
        };

        Self {
            scheduler: ActivationScheduler::new(runtime.schedule.clone()),
            region: RamRegion::new(),
            clock: time.device.clone(),
            synchronizer: SimSynchronizer {
                reference: time.reference.clone(),
                network: runtime.network.clone(),
                failures_left: settings.sync_failures,
                delay: delay.clone(),
            },
            relay: Relay::new(SimRelayOutput::default(), delay.clone()).with_stop(stop),
            delay,
            indicator,
            time,
        }
    }

    fn wake(&mut self, cause: WakeCause) -> CycleSummary {
        let uptime = SimUptime::start(self.time.clone());
        WakeCycle {
            scheduler: &self.scheduler,
            region: &mut self.region,
            uptime: &uptime,
            ctx: CycleContext {
                clock: &mut self.clock,
                synchronizer: &mut self.synchronizer,
                actuator: &mut self.relay,
                delay: &mut self.delay,
                indicator: &self.indicator,
            },
        }
        .run(cause)
    }

    fn lose_power(&mut self) {
        warn!("simulated power loss; retained memory cleared");
        self.region.clear();
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = SimSettings::from_env();
    let runtime = load_runtime_config(settings.config_path.as_deref())
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    let runtime = match runtime.validate() {
        Ok(()) => runtime,
        Err(err) => {
            warn!("runtime config rejected ({err}); using defaults");
            RuntimeConfig::default()
        }
    };
    let tz = runtime.time_zone()?;

    info!(
        timezone = %tz,
        speedup = settings.speedup,
        "starting irrigation simulation at epoch {}",
        settings.start_epoch
    );

    let stop = StopSignal::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_watch(stop.clone(), shutdown.clone());

    let indicator = ModeRegister::new();
    spawn_indicator_tasks(&indicator);

    let mut device = SimDevice::new(&runtime, &settings, tz, indicator, stop);
    let mut power = SimPower {
        time: device.time.clone(),
    };
    let mut cause = WakeCause::Undefined;
    let mut cycle: u32 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        cycle += 1;
        if settings
            .power_loss_every
            .is_some_and(|every| cycle > 1 && (cycle - 1) % every == 0)
        {
            device.lose_power();
            cause = WakeCause::Undefined;
        }

        let (returned, summary) = tokio::task::spawn_blocking(move || {
            let summary = device.wake(cause);
            (device, summary)
        })
        .await
        .context("wake cycle task failed")?;
        device = returned;
        log_report(cycle, &summary);

        if settings.cycles.is_some_and(|limit| cycle >= limit) {
            break;
        }

        let fallback = runtime.schedule.min_sleep();
        let slept = match suspend(&mut power, summary.sleep_for, fallback) {
            Ok(slept) => slept,
            Err(err) => {
                warn!("simulated deep sleep failed ({err}); idling {fallback:?}");
                power.time.advance(fallback);
                fallback
            }
        };
        tokio::time::sleep(slept.div_f64(settings.speedup)).await;
        cause = WakeCause::Timer;
    }

    info!("simulation finished after {cycle} wake cycles");
    Ok(())
}

async fn load_runtime_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(RuntimeConfig::from_json(&raw)?)
}

fn spawn_ctrl_c_watch(stop: StopSignal, shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {err}");
            return;
        }
        info!("ctrl-c received; releasing relay and stopping after this cycle");
        shutdown.store(true, Ordering::Relaxed);
        stop.raise();
    });
}

fn spawn_indicator_tasks(register: &ModeRegister) {
    for channel in IndicatorChannel::ALL {
        let register = register.clone();
        tokio::spawn(async move {
            let mut blinker = Blinker::new();
            loop {
                let step = blinker.step(register.mode(channel));
                if step.changed {
                    debug!(led = channel.as_str(), lit = step.lit, "indicator");
                }
                tokio::time::sleep(step.hold).await;
            }
        });
    }
}

fn log_report(cycle: u32, summary: &CycleSummary) {
    match serde_json::to_string(&summary.report()) {
        Ok(json) => info!(cycle, "cycle report {json}"),
        Err(err) => warn!("cycle report serialization failed: {err}"),
    }
}
