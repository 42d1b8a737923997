/// Constant-velocity Kalman filter over (x, y, vx, vy).
///
/// Two ranging modalities each report an (x, y) pair, stacked into a
/// 4-element measurement. The measurement map folds both pairs onto the
/// same position states; the lopsided measurement noise lets each
/// modality dominate on the axis it actually measures.
///
/// A filter only exists in the ready state: [`KalmanFilter::init`] is the
/// single constructor. Each [`KalmanFilter::update`] computes the new
/// estimate and covariance into locals and commits them together, so a
/// failed cycle leaves the previous state intact.
use thiserror::Error;

use crate::config::KalmanTuning;
use crate::matrix::{Matrix4, MatrixError, Vector4};

pub const STATE_DIM: usize = 4;
pub const MEAS_DIM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KalmanError {
    #[error("innovation covariance is singular")]
    Degenerate,
    #[error("update produced a non-finite estimate")]
    NonFinite,
}

impl From<MatrixError> for KalmanError {
    fn from(_: MatrixError) -> Self {
        KalmanError::Degenerate
    }
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// State transition
    a: Matrix4,
    /// Measurement map
    h: Matrix4,
    x: Vector4,
    cov: Matrix4,
    q: Matrix4,
    r: Matrix4,
    tuning: KalmanTuning,
    updates: u32,
}

impl KalmanFilter {
    pub fn init(tuning: &KalmanTuning) -> Self {
        let dt = tuning.time_step;
        let a = Matrix4::from_rows([
            [1.0, 0.0, dt, 0.0],
            [0.0, 1.0, 0.0, dt],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let h = Matrix4::from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
        ]);
        let r = Matrix4::diagonal([
            tuning.meas_noise_a_x,
            tuning.meas_noise_a_y,
            tuning.meas_noise_b_x,
            tuning.meas_noise_b_y,
        ]);

        Self {
            a,
            h,
            x: Vector4::from_column(tuning.initial_state),
            cov: Matrix4::identity().scale(tuning.initial_error),
            q: Matrix4::identity().scale(tuning.process_noise),
            r,
            tuning: *tuning,
            updates: 0,
        }
    }

    /// Return to the initial estimate and covariance.
    pub fn reset(&mut self) {
        *self = Self::init(&self.tuning);
    }

    /// Run one predict/update cycle against `z`.
    pub fn update(&mut self, z: &Vector4) -> Result<&Vector4, KalmanError> {
        // predict
        let x_prior = self.a * self.x;
        let cov_prior = self.a * self.cov * self.a.transpose() + self.q;

        // innovation and its covariance
        let innovation = *z - self.h * x_prior;
        let h_t = self.h.transpose();
        let s = self.h * cov_prior * h_t + self.r;

        let gain = cov_prior * h_t * s.inverse()?;

        let x_post = x_prior + gain * innovation;
        let cov_post = (Matrix4::identity() - gain * self.h) * cov_prior;

        if !x_post.is_finite() || !cov_post.is_finite() {
            return Err(KalmanError::NonFinite);
        }

        self.x = x_post;
        self.cov = cov_post;
        self.updates = self.updates.wrapping_add(1);
        Ok(&self.x)
    }

    pub fn state(&self) -> [f64; STATE_DIM] {
        self.x.column()
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x[(0, 0)], self.x[(1, 0)])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.x[(2, 0)], self.x[(3, 0)])
    }

    pub fn covariance(&self) -> &Matrix4 {
        &self.cov
    }

    pub fn covariance_trace(&self) -> f64 {
        self.cov.trace()
    }

    /// Successful cycles since init.
    pub fn updates(&self) -> u32 {
        self.updates
    }

    pub fn tuning(&self) -> &KalmanTuning {
        &self.tuning
    }
}
