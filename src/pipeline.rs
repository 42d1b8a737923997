/// Threaded localization pipeline.
///
/// ```text
///  ranger A ──┐ sync_channel
///             ├──> FusionPipeline ──(movement signal)──> BeaconConsumer ──> radio
///  ranger B ──┘                                               ^
///  GPS bus ──> GpsReceiver ──> FixStore ──(get_position)──────┘
/// ```
///
/// Each stage is a plain struct with a `step` and a `run` loop. The loops
/// sleep a configured interval between steps and exit when their stop flag
/// is raised or their input channel disconnects.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::beacon::{BeaconEncoder, BeaconError, BeaconRadio};
use crate::config::{BeaconConfig, FusionConfig, GpsConfig, KalmanTuning};
use crate::fix_store::FixStore;
use crate::gps::{GpsError, GpsReceiver};
use crate::kalman::{KalmanError, KalmanFilter};
use crate::matrix::Vector4;

// ── Observations ─────────────────────────────────────────────────────

/// Which ranging sensor produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Ranges along y. Fills measurement rows 0 and 1.
    A,
    /// Ranges along x. Fills measurement rows 2 and 3.
    B,
}

impl Modality {
    fn rows(self) -> (usize, usize) {
        match self {
            Modality::A => (0, 1),
            Modality::B => (2, 3),
        }
    }
}

/// One ranging sample as pushed by a sensor thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub modality: Modality,
}

impl Observation {
    pub fn new(modality: Modality, x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            modality,
        }
    }

    /// A single range reading, placed on the axis `modality` measures.
    pub fn distance(modality: Modality, d: f64) -> Self {
        match modality {
            Modality::A => Self::new(modality, 0.0, d),
            Modality::B => Self::new(modality, d, 0.0),
        }
    }
}

/// Producer ends, one per modality.
#[derive(Clone)]
pub struct ObservationSenders {
    pub a: SyncSender<Observation>,
    pub b: SyncSender<Observation>,
}

impl ObservationSenders {
    /// Queue `obs` on its modality's channel without blocking.
    ///
    /// Returns `false` when the queue is full or the pipeline is gone.
    pub fn offer(&self, obs: Observation) -> bool {
        let tx = match obs.modality {
            Modality::A => &self.a,
            Modality::B => &self.b,
        };
        match tx.try_send(obs) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("{:?} queue full, sample dropped", obs.modality);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer ends, owned by the fusion pipeline.
pub struct ObservationQueues {
    a: Receiver<Observation>,
    b: Receiver<Observation>,
}

/// Create both bounded observation queues.
pub fn observation_channels(depth: usize) -> (ObservationSenders, ObservationQueues) {
    let (a_tx, a_rx) = mpsc::sync_channel(depth);
    let (b_tx, b_rx) = mpsc::sync_channel(depth);
    (
        ObservationSenders { a: a_tx, b: b_tx },
        ObservationQueues { a: a_rx, b: b_rx },
    )
}

/// Movement signal: capacity one, so at most one wake-up is ever pending.
pub fn movement_signal() -> (SyncSender<()>, Receiver<()>) {
    mpsc::sync_channel(1)
}

// ── Fusion ───────────────────────────────────────────────────────────

/// Published filter output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub updates: u32,
}

/// Result of one fusion step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// No new observations.
    Idle,
    /// Filter updated. `triggered` is set when the movement signal fired.
    Updated { estimate: Estimate, triggered: bool },
    /// The cycle failed numerically; the filter was reset.
    Degenerate(KalmanError),
    /// Both producers are gone.
    Disconnected,
}

pub struct FusionPipeline {
    filter: KalmanFilter,
    queues: ObservationQueues,
    signal: SyncSender<()>,
    config: FusionConfig,
    /// Persistent measurement; each modality refreshes its own rows.
    z: Vector4,
    last_position: (f64, f64),
    drift: f64,
    degenerate: bool,
}

impl FusionPipeline {
    pub fn new(
        tuning: &KalmanTuning,
        config: FusionConfig,
        queues: ObservationQueues,
        signal: SyncSender<()>,
    ) -> Self {
        let filter = KalmanFilter::init(tuning);
        let last_position = filter.position();
        Self {
            filter,
            queues,
            signal,
            config,
            z: Vector4::from_column(tuning.initial_state),
            last_position,
            drift: 0.0,
            degenerate: false,
        }
    }

    /// Drain both queues, update the filter if anything arrived, and raise
    /// the movement signal once the cumulative drift exceeds the budget.
    pub fn step(&mut self) -> Step {
        let (got_a, gone_a) = self.drain(Modality::A);
        let (got_b, gone_b) = self.drain(Modality::B);

        if !got_a && !got_b {
            return if gone_a && gone_b {
                Step::Disconnected
            } else {
                Step::Idle
            };
        }

        if let Err(e) = self.filter.update(&self.z) {
            log::warn!("Filter degenerate ({}), reinitialising", e);
            self.filter.reset();
            self.last_position = self.filter.position();
            self.drift = 0.0;
            self.degenerate = true;
            return Step::Degenerate(e);
        }
        self.degenerate = false;

        let (x, y) = self.filter.position();
        let (px, py) = self.last_position;
        self.drift += (x - px).abs() + (y - py).abs();
        self.last_position = (x, y);

        let triggered = self.drift > self.config.drift_budget;
        if triggered {
            self.drift = 0.0;
            match self.signal.try_send(()) {
                Ok(()) => log::debug!("Movement signal raised at ({:.3}, {:.3})", x, y),
                // already pending
                Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => log::debug!("Beacon consumer gone"),
            }
        }

        Step::Updated {
            estimate: self.current(),
            triggered,
        }
    }

    /// Fusion loop. The config is re-read from `shared` every cycle so host
    /// commands take effect without restarting the thread. `on_step` sees
    /// every non-idle outcome.
    pub fn run<F>(&mut self, shared: &Mutex<FusionConfig>, stop: &AtomicBool, mut on_step: F)
    where
        F: FnMut(&Step),
    {
        log::info!("Fusion loop started");
        while !stop.load(Ordering::Relaxed) {
            self.config = *shared.lock().unwrap_or_else(PoisonError::into_inner);
            match self.step() {
                Step::Idle => {}
                Step::Disconnected => {
                    log::info!("Observation producers gone, fusion loop exiting");
                    break;
                }
                step => on_step(&step),
            }
            thread::sleep(Duration::from_millis(u64::from(self.config.poll_interval_ms)));
        }
    }

    /// Latest estimate, or `None` while recovering from a degenerate cycle.
    pub fn estimate(&self) -> Option<Estimate> {
        (!self.degenerate).then(|| self.current())
    }

    /// Drift accumulated since the last signal.
    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn observation(&self) -> [f64; 4] {
        self.z.column()
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FusionConfig) {
        self.config = config;
    }

    fn current(&self) -> Estimate {
        let (x, y) = self.filter.position();
        let (vx, vy) = self.filter.velocity();
        Estimate {
            x,
            y,
            vx,
            vy,
            updates: self.filter.updates(),
        }
    }

    /// Apply every queued sample for `modality`. Returns (received, disconnected).
    fn drain(&mut self, modality: Modality) -> (bool, bool) {
        let mut received = false;
        loop {
            let rx = match modality {
                Modality::A => &self.queues.a,
                Modality::B => &self.queues.b,
            };
            match rx.try_recv() {
                Ok(obs) => {
                    self.apply(modality, &obs);
                    received = true;
                }
                Err(TryRecvError::Empty) => return (received, false),
                Err(TryRecvError::Disconnected) => return (received, true),
            }
        }
    }

    /// Readings beyond the grid limit keep the previous value.
    fn apply(&mut self, modality: Modality, obs: &Observation) {
        let (rx, ry) = modality.rows();
        let limit = self.config.grid_limit;
        if obs.x <= limit {
            self.z[(rx, 0)] = obs.x;
        }
        if obs.y <= limit {
            self.z[(ry, 0)] = obs.y;
        }
    }
}

// ── Beacon ───────────────────────────────────────────────────────────

/// Wakes on the movement signal and rebroadcasts the merged GPS position.
pub struct BeaconConsumer<R> {
    encoder: BeaconEncoder,
    radio: R,
    config: BeaconConfig,
}

impl<R: BeaconRadio> BeaconConsumer<R> {
    pub fn new(radio: R, config: BeaconConfig) -> Self {
        Self {
            encoder: BeaconEncoder::new(),
            radio,
            config,
        }
    }

    /// Encode the current position if any GPS source is locked.
    ///
    /// Returns whether a broadcast was made.
    pub fn on_signal(&mut self, store: &FixStore) -> Result<bool, BeaconError> {
        let (sources, lat, lon) = store.get_position();
        if sources == 0 {
            log::debug!("Movement signalled without a GPS fix");
            return Ok(false);
        }
        self.encoder.broadcast(&mut self.radio, lat, lon)?;
        Ok(true)
    }

    pub fn run(&mut self, signal: &Receiver<()>, store: &FixStore, stop: &AtomicBool) {
        log::info!("Beacon loop started");
        let timeout = Duration::from_millis(u64::from(self.config.signal_timeout_ms));
        while !stop.load(Ordering::Relaxed) {
            match signal.recv_timeout(timeout) {
                Ok(()) => {
                    if let Err(e) = self.on_signal(store) {
                        log::error!("Beacon update failed: {}", e);
                    }
                    thread::sleep(Duration::from_millis(u64::from(self.config.interval_ms)));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn encoder(&self) -> &BeaconEncoder {
        &self.encoder
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }
}

// ── GPS ──────────────────────────────────────────────────────────────

/// Poll the bus once and feed every framed sentence to the store.
///
/// Returns the number of sentences that updated a record.
pub fn poll_gps<I2C, D>(
    gps: &mut GpsReceiver<I2C, D>,
    store: &FixStore,
) -> Result<usize, GpsError<I2C::Error>>
where
    I2C: I2c,
    D: DelayNs,
{
    gps.poll()?;
    let mut accepted = 0;
    gps.process(|sentence| {
        if store.ingest(sentence) {
            accepted += 1;
        }
    });
    Ok(accepted)
}

/// GPS loop: poll at the configured cadence until stopped. Bus errors are
/// logged and retried on the next cycle.
pub fn run_gps<I2C, D>(gps: &mut GpsReceiver<I2C, D>, store: &FixStore, stop: &AtomicBool)
where
    I2C: I2c,
    D: DelayNs,
{
    log::info!("GPS loop started");
    let config: GpsConfig = *gps.config();
    let interval = Duration::from_millis(u64::from(config.poll_interval_ms));
    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = poll_gps(gps, store) {
            log::warn!("GPS poll failed: {}", e);
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{decode_packed, LATITUDE_OFFSET, LONGITUDE_OFFSET, PAYLOAD_LEN};
    use crate::gps::fakes::{FakeBus, FakeDelay};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;
    use std::vec::Vec;

    fn pipeline(tuning: &KalmanTuning) -> (ObservationSenders, Receiver<()>, FusionPipeline) {
        let config = FusionConfig::new();
        let (tx, queues) = observation_channels(config.queue_depth);
        let (sig_tx, sig_rx) = movement_signal();
        (tx, sig_rx, FusionPipeline::new(tuning, config, queues, sig_tx))
    }

    #[derive(Default)]
    struct FakeRadio {
        sent: Vec<[u8; PAYLOAD_LEN]>,
    }

    impl BeaconRadio for FakeRadio {
        type Error = ();

        fn restart_advertising(&mut self, payload: &[u8; PAYLOAD_LEN]) -> Result<(), ()> {
            self.sent.push(*payload);
            Ok(())
        }
    }

    // ── FusionPipeline ──────────────────────────────────────────────

    #[test]
    fn idle_without_observations() {
        let (_tx, sig, mut p) = pipeline(&KalmanTuning::new());
        assert_eq!(p.step(), Step::Idle);
        assert!(sig.try_recv().is_err());
        assert_eq!(p.estimate().unwrap().updates, 0);
    }

    #[test]
    fn modalities_fill_their_own_rows() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        assert!(tx.offer(Observation::new(Modality::A, 2.0, 3.0)));
        p.step();
        assert_eq!(p.observation(), [2.0, 3.0, 1.0, 1.0]);

        assert!(tx.offer(Observation::new(Modality::B, 0.5, 0.25)));
        p.step();
        assert_eq!(p.observation(), [2.0, 3.0, 0.5, 0.25]);
    }

    #[test]
    fn off_grid_components_ignored() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        tx.offer(Observation::new(Modality::A, 2.0, 3.0));
        p.step();
        tx.offer(Observation::new(Modality::A, 9.0, 3.5));
        p.step();
        assert_eq!(p.observation()[..2], [2.0, 3.5]);
    }

    #[test]
    fn samples_consumed_in_arrival_order() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        for v in [0.5, 1.0, 1.5] {
            tx.offer(Observation::new(Modality::B, v, v));
        }
        p.step();
        assert_eq!(p.observation()[2..], [1.5, 1.5]);
    }

    #[test]
    fn large_move_raises_single_signal() {
        let (tx, sig, mut p) = pipeline(&KalmanTuning::new());
        tx.offer(Observation::new(Modality::A, 3.5, 3.5));
        tx.offer(Observation::new(Modality::B, 3.5, 3.5));

        match p.step() {
            Step::Updated { triggered, .. } => assert!(triggered),
            other => panic!("unexpected {:?}", other),
        }

        // a second trigger while the first is pending does not queue another
        tx.offer(Observation::new(Modality::A, 0.5, 0.5));
        tx.offer(Observation::new(Modality::B, 0.5, 0.5));
        p.step();

        assert!(sig.try_recv().is_ok());
        assert!(sig.try_recv().is_err());
    }

    #[test]
    fn settled_filter_stays_quiet() {
        let (tx, sig, mut p) = pipeline(&KalmanTuning::new());
        let target = [2.5, 3.0];
        // let the filter settle so per-step movement is small
        for _ in 0..30 {
            tx.offer(Observation::new(Modality::A, target[0], target[1]));
            tx.offer(Observation::new(Modality::B, target[0], target[1]));
            p.step();
        }
        while sig.try_recv().is_ok() {}

        tx.offer(Observation::new(Modality::A, target[0], target[1]));
        match p.step() {
            Step::Updated { triggered, .. } => assert!(!triggered),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sig.try_recv().is_err());
    }

    /// Static model with near-exact rangers: the estimate follows each
    /// reading, so every 0.05 m step on both axes adds 0.1 m of drift.
    fn tracking_tuning() -> KalmanTuning {
        KalmanTuning {
            process_noise: 1.0,
            meas_noise_a_y: 1e-6,
            meas_noise_b_x: 1e-6,
            time_step: 0.0,
            initial_state: [1.0, 1.0, 0.0, 0.0],
            ..KalmanTuning::new()
        }
    }

    #[test]
    fn small_moves_accumulate_until_budget() {
        let (tx, sig, mut p) = pipeline(&tracking_tuning());
        p.set_config(FusionConfig {
            drift_budget: 0.25,
            ..FusionConfig::new()
        });

        let mut signals = Vec::new();
        for i in 0..10 {
            let d = 1.0 + 0.05 * i as f64;
            tx.offer(Observation::distance(Modality::A, d));
            tx.offer(Observation::distance(Modality::B, d));
            let triggered = match p.step() {
                Step::Updated { triggered, .. } => triggered,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(sig.try_recv().is_ok(), triggered);
            if triggered {
                assert_eq!(p.drift(), 0.0);
            }
            signals.push(triggered);
        }

        // 0.1, 0.2, then 0.3 crosses 0.25; the sum restarts after each signal
        assert_eq!(
            signals,
            [false, false, false, true, false, false, true, false, false, true]
        );
        assert_abs_diff_eq!(p.drift(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn range_readings_drive_estimate() {
        let (tx, sig, mut p) = pipeline(&KalmanTuning::new());
        let mut run_phase = |d: f64, cycles: usize| {
            let mut signals = 0;
            for _ in 0..cycles {
                tx.offer(Observation::distance(Modality::B, d));
                tx.offer(Observation::distance(Modality::A, d));
                if let Step::Updated { triggered: true, .. } = p.step() {
                    signals += 1;
                    assert!(sig.try_recv().is_ok());
                }
            }
            (signals, p.estimate().unwrap())
        };

        let (signals, at_rest) = run_phase(1.0, 20);
        assert_eq!(signals, 0);
        assert_abs_diff_eq!(at_rest.x, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(at_rest.y, 1.0, epsilon = 1e-3);

        let (signals, moved) = run_phase(3.5, 20);
        assert!(signals >= 1);
        assert_abs_diff_eq!(moved.x, 3.5, epsilon = 1e-3);
        assert_abs_diff_eq!(moved.y, 3.5, epsilon = 1e-3);

        let (signals, back) = run_phase(0.5, 10);
        assert!(signals >= 1);
        assert_abs_diff_eq!(back.x, 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(back.y, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn larger_budget_suppresses_signal() {
        let (tx, sig, mut p) = pipeline(&KalmanTuning::new());
        p.set_config(FusionConfig {
            drift_budget: 100.0,
            ..FusionConfig::new()
        });
        tx.offer(Observation::new(Modality::A, 3.5, 3.5));
        tx.offer(Observation::new(Modality::B, 3.5, 3.5));
        p.step();
        assert!(sig.try_recv().is_err());
    }

    #[test]
    fn degenerate_cycle_resets_and_pauses_estimate() {
        let tuning = KalmanTuning {
            meas_noise_a_x: 0.0,
            meas_noise_a_y: 0.0,
            meas_noise_b_x: 0.0,
            meas_noise_b_y: 0.0,
            ..KalmanTuning::new()
        };
        let (tx, sig, mut p) = pipeline(&tuning);
        tx.offer(Observation::new(Modality::A, 3.5, 3.5));

        assert_eq!(p.step(), Step::Degenerate(KalmanError::Degenerate));
        assert_eq!(p.estimate(), None);
        assert!(sig.try_recv().is_err());
    }

    #[test]
    fn recovery_after_degenerate_cycle() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        tx.offer(Observation::new(Modality::A, 2.0, 2.0));
        tx.offer(Observation::new(Modality::B, f64::NEG_INFINITY, 2.0));
        assert_eq!(p.step(), Step::Degenerate(KalmanError::NonFinite));
        assert_eq!(p.estimate(), None);

        tx.offer(Observation::new(Modality::B, 2.0, 2.0));
        assert!(matches!(p.step(), Step::Updated { .. }));
        assert_eq!(p.estimate().unwrap().updates, 1);
    }

    #[test]
    fn disconnected_producers_end_step() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        drop(tx);
        assert_eq!(p.step(), Step::Disconnected);
    }

    #[test]
    fn full_queue_drops_sample() {
        let (tx, _queues) = observation_channels(1);
        assert!(tx.offer(Observation::new(Modality::A, 1.0, 1.0)));
        assert!(!tx.offer(Observation::new(Modality::A, 2.0, 2.0)));
    }

    #[test]
    fn run_loop_signals_and_stops() {
        let (tx, sig, mut p) = pipeline(&KalmanTuning::new());
        let shared = Arc::new(Mutex::new(FusionConfig {
            poll_interval_ms: 5,
            ..FusionConfig::new()
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut updates = 0;
                p.run(&shared, &stop, |step| {
                    if matches!(step, Step::Updated { .. }) {
                        updates += 1;
                    }
                });
                updates
            })
        };

        tx.offer(Observation::new(Modality::A, 3.5, 3.5));
        tx.offer(Observation::new(Modality::B, 3.5, 3.5));
        assert!(sig.recv_timeout(Duration::from_secs(5)).is_ok());

        stop.store(true, Ordering::Relaxed);
        assert!(handle.join().unwrap() >= 1);
    }

    #[test]
    fn run_loop_exits_when_producers_gone() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        drop(tx);
        let shared = Mutex::new(FusionConfig::new());
        let stop = AtomicBool::new(false);
        p.run(&shared, &stop, |_| panic!("no step expected"));
    }

    #[test]
    fn run_loop_reads_config_from_poisoned_mutex() {
        let (tx, _sig, mut p) = pipeline(&KalmanTuning::new());
        let shared = Arc::new(Mutex::new(FusionConfig {
            poll_interval_ms: 1,
            drift_budget: 100.0,
            ..FusionConfig::new()
        }));
        let holder = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            panic!("writer died holding the config lock");
        })
        .join();
        assert!(shared.is_poisoned());

        tx.offer(Observation::distance(Modality::A, 2.0));
        drop(tx);
        let stop = AtomicBool::new(false);
        p.run(&shared, &stop, |_| {});
        assert_eq!(p.config().drift_budget, 100.0);
    }

    // ── BeaconConsumer ──────────────────────────────────────────────

    const GGA: &str = "GNGGA,104530.000,2730.0411,S,15300.9333,E,1,09,0.9,12.0,M,0.0,M,,";

    #[test]
    fn signal_without_fix_skips_broadcast() {
        let store = FixStore::new();
        let mut consumer = BeaconConsumer::new(FakeRadio::default(), BeaconConfig::new());
        assert_eq!(consumer.on_signal(&store), Ok(false));
        assert!(consumer.radio().sent.is_empty());
    }

    #[test]
    fn signal_with_fix_broadcasts_position() {
        let store = FixStore::new();
        assert!(store.ingest(GGA));
        let mut consumer = BeaconConsumer::new(FakeRadio::default(), BeaconConfig::new());
        assert_eq!(consumer.on_signal(&store), Ok(true));

        let payload = consumer.radio().sent[0];
        let (_, lat, lon) = store.get_position();
        assert_abs_diff_eq!(
            decode_packed(&payload[LATITUDE_OFFSET..LONGITUDE_OFFSET], 2),
            lat.abs(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            decode_packed(&payload[LONGITUDE_OFFSET..LONGITUDE_OFFSET + 5], 3),
            lon,
            epsilon = 1e-6
        );
        assert_eq!(consumer.encoder().broadcasts(), 1);
    }

    #[test]
    fn beacon_loop_exits_when_signal_sender_dropped() {
        let store = FixStore::new();
        store.ingest(GGA);
        let (sig_tx, sig_rx) = movement_signal();
        let stop = AtomicBool::new(false);
        let mut consumer = BeaconConsumer::new(
            FakeRadio::default(),
            BeaconConfig {
                signal_timeout_ms: 10,
                interval_ms: 0,
            },
        );

        sig_tx.send(()).unwrap();
        drop(sig_tx);
        consumer.run(&sig_rx, &store, &stop);
        assert_eq!(consumer.radio().sent.len(), 1);
    }

    // ── GPS path ────────────────────────────────────────────────────

    #[test]
    fn gps_poll_feeds_store() {
        let stream = b"$GNGGA,104530.000,2231.1234,N,11845.5678,E,1,09,0.9,12.0,M,0.0,M,,*41\r\n\
                       $GNRMC,104530.000,A,2230.0000,N,11846.0000,E,0.50,45.0,191026,,,A*73\r\n\
                       $GPGSV,3,1,12\r\n$";
        let mut gps = GpsReceiver::new(FakeBus::with_stream(stream), FakeDelay::default(), GpsConfig::new());
        let store = FixStore::new();
        assert_eq!(poll_gps(&mut gps, &store).unwrap(), 2);
        assert_eq!(store.get_position().0, 2);
    }

    #[test]
    fn gps_poll_surfaces_bus_failure() {
        let bus = FakeBus {
            absent: true,
            ..Default::default()
        };
        let mut gps = GpsReceiver::new(bus, FakeDelay::default(), GpsConfig::new());
        let store = FixStore::new();
        assert!(matches!(poll_gps(&mut gps, &store), Err(GpsError::Read { .. })));
    }
}
