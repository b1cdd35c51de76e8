use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use chrono_tz::Tz;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::gpio::{Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::{AnyIOPin, AnyOutputPin},
        modem::Modem,
        prelude::Peripherals,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SntpConf, SyncStatus},
    wifi::EspWifi,
};
use log::{info, warn};

use valve_common::{
    clock::check_epoch,
    indicator::{SLOW_BLINK_HALF_PERIOD, STEADY_POLL},
    poll_bounded,
    retained::RetainedBlock,
    sleep_micros, suspend, ActivationScheduler, Blinker, ClockError, ClockSource, CycleContext,
    HardwareConfig, IndicatorChannel, InstantUptime, ModeRegister, NetworkConfig,
    PowerController, PowerError, Relay, RelayError, RelayOutput, RetainedRegion, RuntimeConfig,
    StopSignal, SyncError, ThreadDelay, TimeSynchronizer, WakeCause, WakeCycle, MIN_VALID_EPOCH,
    RETAINED_LEN,
};

const NVS_NAMESPACE: &str = "valve";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const BUTTON_POLL_MS: u64 = 50;
const LED_THREAD_STACK: usize = 2048;
const BUTTON_THREAD_STACK: usize = 3072;

#[link_section = ".rtc.data"]
static mut RETAINED_BLOCK: RetainedBlock = [0; RETAINED_LEN];

/// RTC slow memory. Zeroed on power-on, kept through deep sleep.
struct RtcRegion;

impl RetainedRegion for RtcRegion {
    fn read(&self) -> RetainedBlock {
        unsafe { core::ptr::addr_of!(RETAINED_BLOCK).read_volatile() }
    }

    fn write(&mut self, block: &RetainedBlock) {
        unsafe { core::ptr::addr_of_mut!(RETAINED_BLOCK).write_volatile(*block) }
    }
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

struct SystemClock {
    tz: Tz,
}

struct GpioRelay {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

struct WifiTimeSync {
    wifi: Option<EspWifi<'static>>,
    network: NetworkConfig,
    delay: ThreadDelay,
}

struct EspDeepSleep {
    button_pin: i32,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let uptime = InstantUptime::start();
    let cause = wake_cause();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
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
        "NVS config loaded: ssid=`{}`, relay=GPIO{}, tz={}",
        runtime.network.wifi_ssid, runtime.hardware.relay_pin, runtime.timezone
    );

    let Peripherals { modem, .. } = Peripherals::take()?;

    let relay_pin = unsafe { PinDriver::output(AnyOutputPin::new(runtime.hardware.relay_pin)) }
        .with_context(|| format!("relay output on GPIO{}", runtime.hardware.relay_pin))?;

    let indicator = ModeRegister::new();
    spawn_indicator_threads(&runtime.hardware, &indicator);

    let stop = StopSignal::new();
    if let Err(err) = spawn_button_watch(runtime.hardware.button_pin, stop.clone()) {
        warn!("stop button unavailable: {err:#}");
    }

    let mut relay = Relay::new(GpioRelay { pin: relay_pin }, ThreadDelay).with_stop(stop);
    let mut clock = SystemClock { tz };
    let mut synchronizer = WifiTimeSync::new(modem, sys_loop, nvs_partition, &runtime.network);
    let mut region = RtcRegion;
    let mut delay = ThreadDelay;
    let scheduler = ActivationScheduler::new(runtime.schedule.clone());

    let summary = WakeCycle {
        scheduler: &scheduler,
        region: &mut region,
        uptime: &uptime,
        ctx: CycleContext {
            clock: &mut clock,
            synchronizer: &mut synchronizer,
            actuator: &mut relay,
            delay: &mut delay,
            indicator: &indicator,
        },
    }
    .run(cause);

    match serde_json::to_string(&summary.report()) {
        Ok(json) => info!("cycle report {json}"),
        Err(err) => warn!("cycle report serialization failed: {err}"),
    }

    drop(synchronizer);
    // Let blinking channels finish their current half period and go dark.
    thread::sleep(SLOW_BLINK_HALF_PERIOD + STEADY_POLL);

    let mut power = EspDeepSleep {
        button_pin: runtime.hardware.button_pin,
    };
    if let Err(err) = suspend(&mut power, summary.sleep_for, runtime.schedule.min_sleep()) {
        warn!("deep sleep unavailable ({err}); restarting");
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
    Ok(())
}

fn wake_cause() -> WakeCause {
    let cause = unsafe { esp_idf_svc::sys::esp_sleep_get_wakeup_cause() };
    match cause {
        esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
        esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0
        | esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO => WakeCause::Button,
        _ => WakeCause::Undefined,
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(RuntimeConfig::from_json(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

impl ClockSource for SystemClock {
    fn epoch_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    fn set_from_epoch(&mut self, epoch_seconds: i64) -> Result<(), ClockError> {
        check_epoch(epoch_seconds)?;
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: epoch_seconds as _,
            tv_usec: 0,
        };
        let rc = unsafe { esp_idf_svc::sys::settimeofday(&tv, core::ptr::null()) };
        if rc != 0 {
            return Err(ClockError::Platform(format!("settimeofday returned {rc}")));
        }
        Ok(())
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

impl RelayOutput for GpioRelay {
    fn set(&mut self, on: bool) -> Result<(), RelayError> {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|err| RelayError::Output(err.to_string()))
    }
}

impl WifiTimeSync {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> Self {
        let wifi = if network.has_station_credentials() {
            match build_wifi(modem, sys_loop, nvs_partition, network) {
                Ok(wifi) => Some(wifi),
                Err(err) => {
                    warn!("wifi unavailable, time sync disabled: {err:#}");
                    None
                }
            }
        } else {
            warn!("wifi credentials missing; time sync disabled");
            None
        };

        Self {
            wifi,
            network: network.clone(),
            delay: ThreadDelay,
        }
    }
}

impl TimeSynchronizer for WifiTimeSync {
    fn sync(&mut self, clock: &mut dyn ClockSource) -> Result<i64, SyncError> {
        let Some(wifi) = self.wifi.as_mut() else {
            return Err(SyncError::ConnectivityFailure);
        };

        let result = sync_once(wifi, &self.network, &mut self.delay, clock);
        if let Err(err) = wifi.disconnect() {
            warn!("wifi disconnect failed: {err}");
        }
        if let Err(err) = wifi.stop() {
            warn!("wifi stop failed: {err}");
        }
        result
    }
}

fn build_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    Ok(wifi)
}

fn sync_once(
    wifi: &mut EspWifi<'static>,
    network: &NetworkConfig,
    delay: &mut ThreadDelay,
    clock: &mut dyn ClockSource,
) -> Result<i64, SyncError> {
    info!("connecting to `{}` for time sync", network.wifi_ssid);
    if let Err(err) = wifi.start().and_then(|()| wifi.connect()) {
        warn!("wifi connect failed: {err}");
        return Err(SyncError::ConnectivityFailure);
    }

    let associated = poll_bounded(
        network.connect_attempts,
        Duration::from_millis(network.connect_poll_ms),
        delay,
        || wifi.is_up().unwrap_or(false),
    );
    let Some(polls) = associated else {
        warn!(
            "wifi not up after {} polls of {}ms",
            network.connect_attempts, network.connect_poll_ms
        );
        return Err(SyncError::ConnectivityFailure);
    };
    info!("wifi up after {polls} polls");

    let mut conf = SntpConf::default();
    for (slot, server) in conf.servers.iter_mut().zip(&network.ntp_servers) {
        *slot = server.as_str();
    }
    let sntp = EspSntp::new(&conf).map_err(|err| {
        warn!("failed to start SNTP: {err}");
        SyncError::TimeSyncTimeout
    })?;

    let synced = poll_bounded(
        network.epoch_attempts,
        Duration::from_millis(network.epoch_poll_ms),
        delay,
        || {
            sntp.get_sync_status() == SyncStatus::Completed
                && clock.epoch_seconds() >= MIN_VALID_EPOCH
        },
    );
    drop(sntp);

    match synced {
        Some(_) => {
            let epoch = clock.epoch_seconds();
            info!("SNTP sync complete, epoch {epoch}");
            Ok(epoch)
        }
        None => {
            warn!("no SNTP answer after {} polls", network.epoch_attempts);
            Err(SyncError::TimeSyncTimeout)
        }
    }
}

fn spawn_indicator_threads(hardware: &HardwareConfig, register: &ModeRegister) {
    for channel in IndicatorChannel::ALL {
        let pin = hardware.indicator_pin(channel);
        let led = match unsafe { PinDriver::output(AnyOutputPin::new(pin)) } {
            Ok(mut led) => {
                if let Err(err) = led.set_low() {
                    warn!("failed to clear {} LED on GPIO{pin}: {err}", channel.as_str());
                }
                led
            }
            Err(err) => {
                warn!("{} LED unavailable on GPIO{pin}: {err}", channel.as_str());
                continue;
            }
        };

        let register = register.clone();
        let spawned = thread::Builder::new()
            .name(format!("led-{}", channel.as_str()))
            .stack_size(LED_THREAD_STACK)
            .spawn(move || drive_indicator(channel, led, register));
        if let Err(err) = spawned {
            warn!("failed to spawn {} LED thread: {err}", channel.as_str());
        }
    }
}

fn drive_indicator(
    channel: IndicatorChannel,
    mut led: PinDriver<'static, AnyOutputPin, Output>,
    register: ModeRegister,
) {
    let mut blinker = Blinker::new();
    loop {
        let step = blinker.step(register.mode(channel));
        if step.changed {
            let result = if step.lit {
                led.set_high()
            } else {
                led.set_low()
            };
            if let Err(err) = result {
                warn!("failed to drive {} LED: {err}", channel.as_str());
            }
        }
        thread::sleep(step.hold);
    }
}

fn spawn_button_watch(pin: i32, stop: StopSignal) -> anyhow::Result<()> {
    let mut button: PinDriver<'static, AnyIOPin, Input> =
        PinDriver::input(unsafe { AnyIOPin::new(pin) })?;
    button.set_pull(Pull::Up)?;

    thread::Builder::new()
        .name("stop-button".to_string())
        .stack_size(BUTTON_THREAD_STACK)
        .spawn(move || {
            let mut was_pressed = button.is_low();
            loop {
                let pressed = button.is_low();
                if pressed && !was_pressed {
                    info!("stop button pressed");
                    stop.raise();
                }
                was_pressed = pressed;
                thread::sleep(Duration::from_millis(BUTTON_POLL_MS));
            }
        })
        .context("failed to spawn stop button thread")?;
    Ok(())
}

impl PowerController for EspDeepSleep {
    #[allow(unreachable_code)]
    fn sleep_for(&mut self, interval: Duration) -> Result<(), PowerError> {
        let micros = sleep_micros(interval)?;
        info!("entering deep sleep for {}s", interval.as_secs());
        log::logger().flush();

        unsafe {
            esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(micros);
            enable_button_wakeup(self.button_pin);
            esp_idf_svc::sys::esp_deep_sleep_start();
        }
        Ok(())
    }
}

#[cfg(esp_idf_soc_pm_support_ext0_wakeup)]
unsafe fn enable_button_wakeup(pin: i32) {
    let rc = esp_idf_svc::sys::esp_sleep_enable_ext0_wakeup(pin, 0);
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("ext0 wakeup on GPIO{pin} unavailable: esp_err_t={rc}");
    }
}

#[cfg(not(esp_idf_soc_pm_support_ext0_wakeup))]
unsafe fn enable_button_wakeup(pin: i32) {
    let rc = esp_idf_svc::sys::esp_deep_sleep_enable_gpio_wakeup(
        1_u64 << pin,
        esp_idf_svc::sys::esp_deepsleep_gpio_wake_up_mode_t_ESP_GPIO_WAKEUP_GPIO_LOW,
    );
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("GPIO wakeup on GPIO{pin} unavailable: esp_err_t={rc}");
    }
}
