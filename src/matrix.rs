/// Fixed-size dense matrices for the estimator.
///
/// Dimensions are const generics so every product and sum is shape-checked
/// at compile time and every value lives on the stack. All operations take
/// their inputs by value or shared reference and return a fresh matrix.
use core::ops::{Add, Index, IndexMut, Mul, Neg, Sub};

use thiserror::Error;

/// Relative singularity threshold: a matrix is singular when
/// `|det| <= DET_EPSILON * max|a_ij|^N`, so the test does not depend on the
/// scale of the entries.
pub const DET_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("matrix is singular")]
    Singular,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix<const R: usize, const C: usize> {
    data: [[f64; C]; R],
}

pub type Matrix2 = Matrix<2, 2>;
pub type Matrix4 = Matrix<4, 4>;
pub type Vector4 = Matrix<4, 1>;

impl<const R: usize, const C: usize> Matrix<R, C> {
    pub const fn zeros() -> Self {
        Self {
            data: [[0.0; C]; R],
        }
    }

    pub const fn from_rows(data: [[f64; C]; R]) -> Self {
        Self { data }
    }

    pub const fn rows(&self) -> usize {
        R
    }

    pub const fn cols(&self) -> usize {
        C
    }

    pub fn transpose(&self) -> Matrix<C, R> {
        let mut out = Matrix::<C, R>::zeros();
        for i in 0..R {
            for j in 0..C {
                out.data[j][i] = self.data[i][j];
            }
        }
        out
    }

    pub fn scale(&self, k: f64) -> Self {
        let mut out = *self;
        for row in out.data.iter_mut() {
            for v in row.iter_mut() {
                *v *= k;
            }
        }
        out
    }

    /// True when every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().flatten().all(|v| v.is_finite())
    }

    pub fn as_rows(&self) -> &[[f64; C]; R] {
        &self.data
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        let mut out = Self::zeros();
        for i in 0..R {
            for j in 0..C {
                out.data[i][j] = f(self.data[i][j], rhs.data[i][j]);
            }
        }
        out
    }
}

impl<const N: usize> Matrix<N, N> {
    pub fn identity() -> Self {
        Self::diagonal([1.0; N])
    }

    pub fn diagonal(diag: [f64; N]) -> Self {
        let mut out = Self::zeros();
        for (i, d) in diag.into_iter().enumerate() {
            out.data[i][i] = d;
        }
        out
    }

    pub fn trace(&self) -> f64 {
        (0..N).map(|i| self.data[i][i]).sum()
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> f64 {
        self.data
            .iter()
            .flatten()
            .fold(0.0, |acc, v| if libm::fabs(*v) > acc { libm::fabs(*v) } else { acc })
    }
}

impl<const N: usize> Matrix<N, 1> {
    pub const fn from_column(col: [f64; N]) -> Self {
        let mut data = [[0.0; 1]; N];
        let mut i = 0;
        while i < N {
            data[i][0] = col[i];
            i += 1;
        }
        Self { data }
    }

    pub fn column(&self) -> [f64; N] {
        let mut out = [0.0; N];
        for (o, row) in out.iter_mut().zip(self.data.iter()) {
            *o = row[0];
        }
        out
    }
}

impl Matrix2 {
    /// Closed-form 2×2 inverse.
    pub fn inverse(&self) -> Result<Self, MatrixError> {
        let [[a, b], [c, d]] = self.data;
        let det = a * d - b * c;
        let scale = self.max_abs();
        if !is_invertible(det, scale * scale) {
            return Err(MatrixError::Singular);
        }
        Ok(Self::from_rows([[d, -b], [-c, a]]).scale(1.0 / det))
    }
}

impl Matrix4 {
    /// Determinant by cofactor expansion along the first row.
    pub fn determinant(&self) -> f64 {
        (0..4)
            .map(|j| self.data[0][j] * self.cofactor(0, j))
            .sum()
    }

    /// Inverse via the adjugate: every entry is its own 3×3 cofactor
    /// determinant, transposed and scaled by 1/det.
    pub fn inverse(&self) -> Result<Self, MatrixError> {
        let det = self.determinant();
        let scale = self.max_abs();
        if !is_invertible(det, (scale * scale) * (scale * scale)) {
            return Err(MatrixError::Singular);
        }

        let inv_det = 1.0 / det;
        let mut out = Self::zeros();
        for i in 0..4 {
            for j in 0..4 {
                out.data[j][i] = self.cofactor(i, j) * inv_det;
            }
        }
        Ok(out)
    }

    fn cofactor(&self, row: usize, col: usize) -> f64 {
        let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
        sign * det3(&self.minor(row, col))
    }

    fn minor(&self, row: usize, col: usize) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        let rows = (0..4).filter(|&r| r != row);
        for (dst, r) in out.iter_mut().zip(rows) {
            let cols = (0..4).filter(|&c| c != col);
            for (d, c) in dst.iter_mut().zip(cols) {
                *d = self.data[r][c];
            }
        }
        out
    }
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// `magnitude` is the largest entry raised to the matrix order.
fn is_invertible(det: f64, magnitude: f64) -> bool {
    det.is_finite() && magnitude > 0.0 && libm::fabs(det) > DET_EPSILON * magnitude
}

impl<const R: usize, const C: usize> Default for Matrix<R, C> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<const R: usize, const C: usize> Index<(usize, usize)> for Matrix<R, C> {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i][j]
    }
}

impl<const R: usize, const C: usize> IndexMut<(usize, usize)> for Matrix<R, C> {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i][j]
    }
}

impl<const R: usize, const K: usize, const C: usize> Mul<Matrix<K, C>> for Matrix<R, K> {
    type Output = Matrix<R, C>;

    fn mul(self, rhs: Matrix<K, C>) -> Matrix<R, C> {
        let mut out = Matrix::<R, C>::zeros();
        for i in 0..R {
            for j in 0..C {
                out.data[i][j] = (0..K).map(|k| self.data[i][k] * rhs.data[k][j]).sum();
            }
        }
        out
    }
}

impl<const R: usize, const C: usize> Add for Matrix<R, C> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.zip_with(&rhs, |a, b| a + b)
    }
}

impl<const R: usize, const C: usize> Sub for Matrix<R, C> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.zip_with(&rhs, |a, b| a - b)
    }
}

impl<const R: usize, const C: usize> Neg for Matrix<R, C> {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1.0)
    }
}
