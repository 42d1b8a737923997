/// Compile-time defaults for the GPS reader, Kalman estimator, fusion loop
/// and beacon payload layout.
///
/// Every struct here is `Copy` with a `const fn new()` so it can live in a
/// static and be snapshotted cheaply by any thread. Values that the host
/// may retune at runtime (the drift budget) are plain public fields.
/// GPS bus reader settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsConfig {
    /// Bytes per bus transaction, both directions.
    pub chunk_size: usize,
    /// Attempts per chunk read before the transport error is surfaced.
    pub read_retries: u8,
    /// Settle delay between outbound command chunks.
    pub settle_delay_ms: u32,
    /// Cadence of the GPS polling thread.
    pub poll_interval_ms: u32,
    /// Wait after configuration before the first poll.
    pub startup_delay_ms: u32,
}

impl GpsConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: 32,
            read_retries: 3,
            settle_delay_ms: 10,
            poll_interval_ms: 100,
            startup_delay_ms: 5000,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Noise model and initial conditions for the constant-velocity filter.
///
/// Measurement rows 0/1 belong to modality A (x, y), rows 2/3 to
/// modality B (x, y). A ranges along y and B along x, so each modality is
/// trusted on that axis only and the variances are lopsided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanTuning {
    /// Diagonal of Q.
    pub process_noise: f64,
    /// Diagonal of the initial covariance.
    pub initial_error: f64,
    pub meas_noise_a_x: f64,
    pub meas_noise_a_y: f64,
    pub meas_noise_b_x: f64,
    pub meas_noise_b_y: f64,
    /// Time step baked into the transition matrix, seconds.
    pub time_step: f64,
    /// Starting estimate (x, y, vx, vy).
    pub initial_state: [f64; 4],
}

impl KalmanTuning {
    pub const fn new() -> Self {
        Self {
            process_noise: 0.3,
            initial_error: 10.0,
            meas_noise_a_x: 1000.0,
            meas_noise_a_y: 0.01,
            meas_noise_b_x: 0.01,
            meas_noise_b_y: 1000.0,
            time_step: 1.0,
            initial_state: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl Default for KalmanTuning {
    fn default() -> Self {
        Self::new()
    }
}

/// Fusion loop settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Sleep between queue polls.
    pub poll_interval_ms: u32,
    /// Cumulative |Δx| + |Δy| (metres) that triggers a beacon refresh.
    pub drift_budget: f64,
    /// Readings beyond this range (metres) are off-grid and ignored.
    pub grid_limit: f64,
    /// Depth of each observation queue.
    pub queue_depth: usize,
}

impl FusionConfig {
    pub const fn new() -> Self {
        Self {
            poll_interval_ms: 500,
            drift_budget: 0.3,
            grid_limit: 4.0,
            queue_depth: 8,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Beacon consumer settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconConfig {
    /// How long the consumer blocks on the movement signal before it
    /// re-checks for shutdown.
    pub signal_timeout_ms: u32,
    /// Sleep after each broadcast restart.
    pub interval_ms: u32,
}

impl BeaconConfig {
    pub const fn new() -> Self {
        Self {
            signal_timeout_ms: 1000,
            interval_ms: 500,
        }
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self::new()
    }
}
