//! Disaster beacon ESP-IDF std firmware
//!
//! Thread-based implementation using FreeRTOS threads and std::sync::mpsc
//! channels. The GPS module sits on I2C, two HC-SR04 rangers provide the
//! fusion observations, and NimBLE (via esp32-nimble) carries the
//! non-connectable position beacon. Telemetry and host commands use the
//! serial console.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use disaster_beacon::beacon::{BeaconRadio, PAYLOAD_LEN};
use disaster_beacon::config::{BeaconConfig, FusionConfig, GpsConfig, KalmanTuning};
use disaster_beacon::fix_store::FixStore;
use disaster_beacon::gps::GpsReceiver;
use disaster_beacon::pipeline::{
    movement_signal, observation_channels, run_gps, BeaconConsumer, FusionPipeline, Modality,
    Observation, ObservationSenders, Step,
};
use disaster_beacon::{board, comm, protocol};

use comm::{LineReader, Reply};
use esp_idf_svc::hal::delay::{Ets, FreeRtos};
use esp_idf_svc::hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::esp_get_free_heap_size;
use protocol::{DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};

use esp32_nimble::enums::ConnMode;
use esp32_nimble::{BLEAdvertisementData, BLEDevice, BLEError};

// ── Shared state ─────────────────────────────────────────────────────

static FIX_STORE: FixStore = FixStore::new();
static FUSION_CONFIG: Mutex<FusionConfig> = Mutex::new(FusionConfig::new());
static STOP: AtomicBool = AtomicBool::new(false);
static BROADCASTS: AtomicU32 = AtomicU32::new(0);

fn fusion_config() -> MutexGuard<'static, FusionConfig> {
    FUSION_CONFIG.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Boot time, captured once in main, used for uptime calculation.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

fn uptime_secs() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_secs() as u32))
        .unwrap_or(0)
}

fn uptime_millis_u32() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| (boot.elapsed().as_millis() & 0xFFFF_FFFF) as u32))
        .unwrap_or(0)
}

/// HC-SR04 echo timeout (~5 m round trip)
const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

/// Pause between alternating ranger samples
const RANGING_INTERVAL_MS: u64 = 200;

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    *BOOT_INSTANT.lock().unwrap() = Some(Instant::now());

    log::info!("Disaster beacon v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    #[cfg(feature = "xiao")]
    let (sda, scl, x_trig, x_echo, y_trig, y_echo) = (
        pins.gpio5,
        pins.gpio6,
        AnyOutputPin::from(pins.gpio1),
        AnyInputPin::from(pins.gpio2),
        AnyOutputPin::from(pins.gpio3),
        AnyInputPin::from(pins.gpio4),
    );
    #[cfg(feature = "m5stickc")]
    let (sda, scl, x_trig, x_echo, y_trig, y_echo) = (
        pins.gpio32,
        pins.gpio33,
        AnyOutputPin::from(pins.gpio25),
        AnyInputPin::from(pins.gpio26),
        AnyOutputPin::from(pins.gpio0),
        AnyInputPin::from(pins.gpio36),
    );

    let i2c_config = I2cConfig::new().baudrate(Hertz(board::GPS_I2C_FREQ_HZ));
    let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?;
    log::info!(
        "GPS bus on SDA {} / SCL {} at {} Hz",
        board::I2C_SDA_PIN,
        board::I2C_SCL_PIN,
        board::GPS_I2C_FREQ_HZ
    );

    // ── Channels ─────────────────────────────────────────────────────

    let fusion_config = FusionConfig::new();
    let (obs_tx, obs_queues) = observation_channels(fusion_config.queue_depth);
    let (signal_tx, signal_rx) = movement_signal();
    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<HostCommand>(4);

    // ── GPS thread ───────────────────────────────────────────────────

    thread::Builder::new()
        .name("gps".into())
        .stack_size(4096)
        .spawn(move || gps_thread(i2c))?;
    log::info!("GPS thread spawned");

    // ── Ranging thread ───────────────────────────────────────────────

    let ranger_x = Ranger::new(x_trig, x_echo)?;
    let ranger_y = Ranger::new(y_trig, y_echo)?;
    log::info!(
        "Rangers on trig/echo {:?} (x) and {:?} (y)",
        board::RANGER_X_PINS,
        board::RANGER_Y_PINS
    );
    thread::Builder::new()
        .name("ranging".into())
        .stack_size(4096)
        .spawn(move || ranging_thread(ranger_x, ranger_y, obs_tx))?;
    log::info!("Ranging thread spawned");

    // ── Fusion thread ────────────────────────────────────────────────

    let fusion_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("fusion".into())
        .stack_size(8192)
        .spawn(move || {
            let mut pipeline =
                FusionPipeline::new(&KalmanTuning::new(), fusion_config, obs_queues, signal_tx);
            pipeline.run(&FUSION_CONFIG, &STOP, |step| {
                if let Step::Updated {
                    estimate,
                    triggered: true,
                } = step
                {
                    send_message(
                        &fusion_output_tx,
                        &DeviceMessage::Estimate {
                            x: estimate.x,
                            y: estimate.y,
                            vx: estimate.vx,
                            vy: estimate.vy,
                            updates: estimate.updates,
                            ts: uptime_millis_u32(),
                        },
                    );
                }
            });
        })?;
    log::info!("Fusion thread spawned");

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || output_thread(output_rx))?;
    log::info!("Output thread spawned");

    // ── Command threads ──────────────────────────────────────────────

    let cmd_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("command".into())
        .stack_size(4096)
        .spawn(move || command_thread(cmd_rx, cmd_output_tx))?;
    thread::Builder::new()
        .name("console".into())
        .stack_size(4096)
        .spawn(move || console_thread(cmd_tx))?;
    log::info!("Command threads spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || status_thread(status_output_tx))?;
    log::info!("Status thread spawned");

    // ── Beacon (NimBLE) on the main thread ────────────────────────

    let ble_device = BLEDevice::take();
    if let Err(e) = BLEDevice::set_device_name(comm::BLE_ADV_NAME) {
        log::warn!("BLE device name not set: {:?}", e);
    }
    let radio = NimbleRadio { device: ble_device };
    let mut consumer = BeaconConsumer::new(radio, BeaconConfig::new());
    log::info!("Beacon ready, waiting for movement");
    consumer.run(&signal_rx, &FIX_STORE, &STOP);

    log::warn!("Beacon loop exited");
    Ok(())
}

// ── Beacon radio ─────────────────────────────────────────────────────

struct NimbleRadio {
    device: &'static BLEDevice,
}

impl BeaconRadio for NimbleRadio {
    type Error = BLEError;

    fn restart_advertising(&mut self, payload: &[u8; PAYLOAD_LEN]) -> Result<(), BLEError> {
        let mut advertising = self.device.get_advertising().lock();
        // not yet advertising on the first call
        let _ = advertising.stop();
        advertising.advertisement_type(ConnMode::Non);
        let mut adv_data = BLEAdvertisementData::new();
        adv_data.manufacturer_data(payload);
        advertising.set_data(&mut adv_data)?;
        advertising.start()?;
        BROADCASTS.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ── GPS ──────────────────────────────────────────────────────────────

fn gps_thread(i2c: I2cDriver<'static>) {
    let config = GpsConfig::new();
    let mut gps = GpsReceiver::new(i2c, FreeRtos, config);

    if let Err(e) = gps.probe() {
        log::error!("GPS probe failed: {:?}", e);
        return;
    }
    if let Err(e) = gps.configure_output() {
        log::warn!("GPS output configuration failed: {:?}", e);
    }
    thread::sleep(Duration::from_millis(u64::from(config.startup_delay_ms)));

    run_gps(&mut gps, &FIX_STORE, &STOP);
}

// ── Ranging ──────────────────────────────────────────────────────────

/// One HC-SR04: trigger pulse out, echo pulse width in.
struct Ranger {
    trigger: PinDriver<'static, AnyOutputPin, Output>,
    echo: PinDriver<'static, AnyInputPin, Input>,
}

impl Ranger {
    fn new(trigger: AnyOutputPin, echo: AnyInputPin) -> anyhow::Result<Self> {
        Ok(Self {
            trigger: PinDriver::output(trigger)?,
            echo: PinDriver::input(echo)?,
        })
    }

    /// Distance in metres, or `None` if the echo never came back.
    fn measure(&mut self) -> Option<f64> {
        self.trigger.set_high().ok()?;
        Ets::delay_us(10);
        self.trigger.set_low().ok()?;

        let start = Instant::now();
        while self.echo.is_low() {
            if start.elapsed() > ECHO_TIMEOUT {
                return None;
            }
        }
        let rise = Instant::now();
        while self.echo.is_high() {
            if rise.elapsed() > ECHO_TIMEOUT {
                return None;
            }
        }
        // speed of sound 343 m/s, halved for the round trip
        Some(rise.elapsed().as_secs_f64() * 343.0 / 2.0)
    }
}

/// The x ranger feeds modality B and the y ranger modality A, matching the
/// axes `KalmanTuning` trusts each modality on.
fn ranging_thread(mut x: Ranger, mut y: Ranger, obs_tx: ObservationSenders) {
    log::info!("Ranging thread started");

    while !STOP.load(Ordering::Relaxed) {
        if let Some(d) = x.measure() {
            obs_tx.offer(Observation::distance(Modality::B, d));
        }
        thread::sleep(Duration::from_millis(RANGING_INTERVAL_MS));
        if let Some(d) = y.measure() {
            obs_tx.offer(Observation::distance(Modality::A, d));
        }
        thread::sleep(Duration::from_millis(RANGING_INTERVAL_MS));
    }
}

// ── Output thread ────────────────────────────────────────────────────

fn send_message(output_tx: &SyncSender<MsgBuffer>, msg: &DeviceMessage) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = output_tx.try_send(buf);
    }
}

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_message() -> DeviceMessage {
    let heap_free = unsafe { esp_get_free_heap_size() };
    let drift_budget = fusion_config().drift_budget;

    DeviceMessage::Status {
        uptime: uptime_secs(),
        heap_free,
        gps_sources: FIX_STORE.get_position().0,
        broadcasts: BROADCASTS.load(Ordering::Relaxed),
        drift_budget,
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

fn position_message() -> DeviceMessage {
    let (sources, lat, lon) = FIX_STORE.get_position();
    DeviceMessage::Position {
        sources,
        lat,
        lon,
        ts: uptime_millis_u32(),
    }
}

fn status_thread(output_tx: SyncSender<MsgBuffer>) {
    loop {
        thread::sleep(Duration::from_secs(30));
        send_message(&output_tx, &status_message());
        send_message(&output_tx, &position_message());
    }
}

// ── Command threads ──────────────────────────────────────────────────

fn command_thread(cmd_rx: mpsc::Receiver<HostCommand>, output_tx: SyncSender<MsgBuffer>) {
    while let Ok(cmd) = cmd_rx.recv() {
        let reply = comm::handle_command(&cmd, &mut fusion_config());

        match reply {
            Reply::Status => send_message(&output_tx, &status_message()),
            Reply::Position => send_message(&output_tx, &position_message()),
            Reply::None => {}
        }
    }
}

/// Read NDJSON commands from the serial console.
fn console_thread(cmd_tx: SyncSender<HostCommand>) {
    let mut reader = LineReader::new();
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 64];

    loop {
        match stdin.read(&mut buf) {
            Ok(n) if n > 0 => {
                for &byte in &buf[..n] {
                    if let Some(line) = reader.feed(byte) {
                        if let Some(cmd) = comm::parse_command(line) {
                            let _ = cmd_tx.try_send(cmd);
                        }
                    }
                }
            }
            _ => thread::sleep(Duration::from_millis(50)),
        }
    }
}
