//! Banded matrix storage and factorization backing the Jacobian
//! preconditioner. The three-point residual stencil couples each unknown to at
//! most the unknowns of the two neighboring grid points, so the Jacobian lives
//! inside a band of half-width `2*n_vars` around the diagonal; storing and
//! factorizing only the band keeps the preconditioner linear in the number of
//! grid points.
//!
//! Factorization is in-place LU without pivoting. For the diagonally dominant
//! approximate Jacobians this preconditioner sees that is the standard choice;
//! a vanishing pivot is reported as `LinAlgError::SingularFactor` and handled
//! by the caller.

use nalgebra::DVector;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinAlgError {
    #[error("singular factor: zero pivot at row {0}")]
    SingularFactor(usize),
    #[error("rhs length {got} does not match matrix size {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

/// Square banded matrix with equal lower and upper half-bandwidth.
///
/// Entry `(i, j)` is stored iff `|i - j| <= bandwidth`; band storage is
/// diagonal-major: band row `i - j + bandwidth`, column `j`.
#[derive(Debug, Clone)]
pub struct BandMatrix {
    n: usize,
    bandwidth: usize,
    data: Vec<f64>,
    factored: bool,
}

impl BandMatrix {
    pub fn zeros(n: usize, bandwidth: usize) -> Self {
        Self {
            n,
            bandwidth,
            data: vec![0.0; (2 * bandwidth + 1) * n],
            factored: false,
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
        self.factored = false;
    }

    #[inline]
    fn idx(&self, i: usize, j: usize) -> Option<usize> {
        let band = i as isize - j as isize + self.bandwidth as isize;
        if i < self.n && j < self.n && band >= 0 && band <= 2 * self.bandwidth as isize {
            Some(band as usize * self.n + j)
        } else {
            None
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self.idx(i, j) {
            Some(p) => self.data[p],
            None => 0.0,
        }
    }

    /// Set an in-band entry; writes outside the band are discarded, which lets
    /// finite-difference fill loops run over full columns without bound checks.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        if let Some(p) = self.idx(i, j) {
            self.data[p] = value;
        }
        self.factored = false;
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        if let Some(p) = self.idx(i, j) {
            self.data[p] += value;
        }
        self.factored = false;
    }

    /// In-place LU factorization without pivoting. Fill-in stays inside the
    /// band, multipliers overwrite the subdiagonal entries.
    pub fn lu_factorize(&mut self) -> Result<(), LinAlgError> {
        let n = self.n;
        let bw = self.bandwidth;
        for k in 0..n {
            let pivot = self.get(k, k);
            if pivot.abs() < f64::MIN_POSITIVE * 1e4 {
                return Err(LinAlgError::SingularFactor(k));
            }
            let i_max = (k + bw).min(n - 1);
            for i in k + 1..=i_max {
                let m = self.get(i, k) / pivot;
                if m != 0.0 {
                    let j_max = (k + bw).min(n - 1);
                    for j in k + 1..=j_max {
                        let v = self.get(i, j) - m * self.get(k, j);
                        if let Some(p) = self.idx(i, j) {
                            self.data[p] = v;
                        }
                    }
                }
                if let Some(p) = self.idx(i, k) {
                    self.data[p] = m;
                }
            }
        }
        self.factored = true;
        Ok(())
    }

    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Solve `A x = rhs` using the stored LU factors.
    pub fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        if rhs.len() != self.n {
            return Err(LinAlgError::SizeMismatch {
                got: rhs.len(),
                expected: self.n,
            });
        }
        debug_assert!(self.factored, "solve called before lu_factorize");
        let n = self.n;
        let bw = self.bandwidth;
        let mut x = rhs.clone();
        // forward substitution with the stored multipliers
        for k in 0..n {
            let i_max = (k + bw).min(n - 1);
            for i in k + 1..=i_max {
                let m = self.get(i, k);
                if m != 0.0 {
                    x[i] -= m * x[k];
                }
            }
        }
        // back substitution
        for k in (0..n).rev() {
            let j_max = (k + bw).min(n - 1);
            for j in k + 1..=j_max {
                let v = self.get(k, j);
                if v != 0.0 {
                    let xj = x[j];
                    x[k] -= v * xj;
                }
            }
            x[k] /= self.get(k, k);
        }
        Ok(x)
    }
}

/////////////////////////////////////////TESTS/////////////////////////////////////////////////////////
