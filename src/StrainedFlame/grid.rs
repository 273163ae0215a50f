//! # One-Dimensional Adaptive Grid
//!
//! ## Purpose
//! Owns the non-uniform spatial mesh of the flame solver and decides when and
//! how to change it. Two independent operations mutate the mesh:
//!
//! - **`adapt`**: inserts midpoints into intervals where the solution varies
//!   too strongly (value jump, derivative jump, or spacing exceeding the local
//!   transport-diffusion length scale stored in `damp_val`), and removes
//!   interior points that have become redundant.
//! - **`regrid`**: moves the domain boundaries - extends a side while the
//!   solution still varies near that edge, retires the edge interval once the
//!   profile out there has gone flat.
//!
//! Both operations work mark-then-rebuild: candidate changes are collected
//! first, a whole new mesh plus interpolated solution/derivative blocks are
//! assembled, the candidate is validated (strictly increasing coordinates,
//! point count within bounds) and only then committed. Every committed
//! topology change bumps a generation counter; consumers sized for an older
//! generation must resize before touching the mesh again.
//!
//! The solution blocks are `DMatrix` with one row per tracked component and
//! one column per grid point, the same shape the rest of the solver rolls its
//! state into for interpolation.

use crate::Utils::math::interp1;
use crate::settings::GridConfig;
use log::{debug, info};
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("degenerate grid rejected: {0}")]
    Degenerate(String),
    #[error("solution block has {cols} columns but the grid has {points} points")]
    SizeMismatch { cols: usize, points: usize },
}

/// The non-uniform 1-D mesh plus per-point damping metadata.
#[derive(Debug, Clone)]
pub struct OneDimGrid {
    /// Point coordinates, strictly increasing.
    pub x: Vec<f64>,
    /// Per-point diffusive-length/velocity scale bounding adaptation.
    pub damp_val: Vec<f64>,
    /// Current left domain boundary (`x[0]`).
    pub x_left: f64,
    /// Current right domain boundary (`x[n-1]`).
    pub x_right: f64,
    pub config: GridConfig,
    generation: u64,
}

impl OneDimGrid {
    /// Build a uniform mesh of `n_points` over `[x_left, x_right]`.
    pub fn new_uniform(x_left: f64, x_right: f64, n_points: usize, config: GridConfig) -> Self {
        let h = (x_right - x_left) / (n_points - 1) as f64;
        let x: Vec<f64> = (0..n_points).map(|j| x_left + h * j as f64).collect();
        Self {
            damp_val: vec![f64::MAX; n_points],
            x,
            x_left,
            x_right,
            config,
            generation: 0,
        }
    }

    /// Build a grid from explicit point coordinates (restart path); the
    /// coordinates must be strictly increasing.
    pub fn from_points(x: Vec<f64>, config: GridConfig) -> Result<Self, GridError> {
        if x.len() < config.n_points_min {
            return Err(GridError::Degenerate(format!(
                "{} points, minimum is {}",
                x.len(),
                config.n_points_min
            )));
        }
        for i in 1..x.len() {
            if x[i] <= x[i - 1] {
                return Err(GridError::Degenerate(format!(
                    "non-monotonic coordinates at index {}",
                    i
                )));
            }
        }
        let n = x.len();
        Ok(Self {
            damp_val: vec![f64::MAX; n],
            x_left: x[0],
            x_right: x[n - 1],
            x,
            config,
            generation: 0,
        })
    }

    pub fn n_points(&self) -> usize {
        self.x.len()
    }

    /// Monotonically increasing id of the current mesh topology. Any per-point
    /// array sized under an older generation is stale by construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store freshly computed damping values (diffusivity over velocity scale).
    /// The caller is responsible for the velocity floor; values must be
    /// positive and match the current point count.
    pub fn set_damp_val(&mut self, damp_val: Vec<f64>) -> Result<(), GridError> {
        if damp_val.len() != self.x.len() {
            return Err(GridError::SizeMismatch {
                cols: damp_val.len(),
                points: self.x.len(),
            });
        }
        self.damp_val = damp_val;
        Ok(())
    }

    /// Insert points where the solution is under-resolved and remove redundant
    /// ones; re-interpolates `y` and `ydot` onto the new mesh in place.
    /// Returns whether the mesh changed.
    pub fn adapt(
        &mut self,
        y: &mut DMatrix<f64>,
        ydot: &mut DMatrix<f64>,
    ) -> Result<bool, GridError> {
        self.check_blocks(y, ydot)?;
        let n = self.x.len();
        let n_comp = y.nrows();

        // Component ranges; components with a negligible range are not tracked.
        let mut range = vec![0.0; n_comp];
        let mut drange = vec![0.0; n_comp];
        for r in 0..n_comp {
            let row = y.row(r);
            let vmax = row.max();
            let vmin = row.min();
            range[r] = vmax - vmin;
            let mut dmin = f64::MAX;
            let mut dmax = f64::MIN;
            for i in 0..n - 1 {
                let d = (y[(r, i + 1)] - y[(r, i)]) / (self.x[i + 1] - self.x[i]);
                dmin = dmin.min(d);
                dmax = dmax.max(d);
            }
            drange[r] = dmax - dmin;
        }

        // Mark intervals for midpoint insertion.
        let mut insert = vec![false; n - 1];
        for i in 0..n - 1 {
            let h = self.x[i + 1] - self.x[i];
            if h > self.config.grid_max {
                insert[i] = true;
                continue;
            }
            // resolution vs. the local transport-diffusion length scale
            let damp = self.damp_val[i].min(self.damp_val[i + 1]);
            if h > damp {
                insert[i] = true;
                continue;
            }
            if h < 2.0 * self.config.grid_min {
                continue; // never split below the minimum spacing
            }
            for r in 0..n_comp {
                let scale = range[r].max(self.config.abs_vtol * y.row(r).amax().max(1.0));
                if scale <= 0.0 {
                    continue;
                }
                if (y[(r, i + 1)] - y[(r, i)]).abs() > self.config.vtol * scale {
                    insert[i] = true;
                    break;
                }
                if i > 0 && drange[r] > 0.0 {
                    let h_prev = self.x[i] - self.x[i - 1];
                    let d_here = (y[(r, i + 1)] - y[(r, i)]) / h;
                    let d_prev = (y[(r, i)] - y[(r, i - 1)]) / h_prev;
                    if (d_here - d_prev).abs() > self.config.dvtol * drange[r] {
                        insert[i] = true;
                        break;
                    }
                }
            }
        }

        // Mark interior points for removal: closer than the minimum spacing to
        // both neighbors, low curvature everywhere, and the merged interval
        // still resolved. Boundary points are never dropped, and a point next
        // to an interval marked for insertion is left alone.
        let mut remove = vec![false; n];
        for j in 1..n - 1 {
            if insert[j - 1] || insert[j] {
                continue;
            }
            let merged = self.x[j + 1] - self.x[j - 1];
            if merged > self.config.grid_max || merged > self.damp_val[j] {
                continue;
            }
            let tight = (self.x[j] - self.x[j - 1]) < self.config.grid_min
                && (self.x[j + 1] - self.x[j]) < self.config.grid_min;
            let mut low_curvature = true;
            for r in 0..n_comp {
                let scale = range[r].max(self.config.abs_vtol);
                if (y[(r, j + 1)] - y[(r, j)]).abs() > 0.5 * self.config.vtol * scale
                    || (y[(r, j)] - y[(r, j - 1)]).abs() > 0.5 * self.config.vtol * scale
                {
                    low_curvature = false;
                    break;
                }
            }
            if tight && low_curvature {
                remove[j] = true;
            }
        }

        let n_insert = insert.iter().filter(|&&m| m).count();
        let n_remove = remove.iter().filter(|&&m| m).count();
        if n_insert == 0 && n_remove == 0 {
            return Ok(false);
        }
        let n_new = n + n_insert - n_remove;
        if n_new > self.config.n_points_max {
            debug!(
                "adaptation wants {} points, cap is {}; skipping",
                n_new, self.config.n_points_max
            );
            return Ok(false);
        }
        if n_new < self.config.n_points_min && n_new < n {
            return Err(GridError::Degenerate(format!(
                "adaptation would leave {} points, minimum is {}",
                n_new, self.config.n_points_min
            )));
        }

        // Rebuild mesh and solution blocks together.
        let mut x_new = Vec::with_capacity(n_new);
        let mut y_new = DMatrix::zeros(n_comp, n_new);
        let mut ydot_new = DMatrix::zeros(n_comp, n_new);
        let mut col = 0;
        for j in 0..n {
            if !remove[j] {
                x_new.push(self.x[j]);
                y_new.column_mut(col).copy_from(&y.column(j));
                ydot_new.column_mut(col).copy_from(&ydot.column(j));
                col += 1;
            }
            if j < n - 1 && insert[j] {
                // symmetric midpoint insertion, values interpolated between neighbors
                x_new.push(0.5 * (self.x[j] + self.x[j + 1]));
                let yc = (y.column(j) + y.column(j + 1)) * 0.5;
                let ydotc = (ydot.column(j) + ydot.column(j + 1)) * 0.5;
                y_new.column_mut(col).copy_from(&yc);
                ydot_new.column_mut(col).copy_from(&ydotc);
                col += 1;
            }
        }
        debug_assert_eq!(col, n_new);

        self.commit(x_new, y_new, ydot_new, y, ydot)?;
        info!(
            "grid adapted: {} -> {} points ({} inserted, {} removed)",
            n,
            self.x.len(),
            n_insert,
            n_remove
        );
        Ok(true)
    }

    /// Move the domain boundaries: extend a side while the solution still
    /// varies near that edge, retire the edge interval once it is flat.
    /// Returns whether the mesh changed.
    pub fn regrid(
        &mut self,
        y: &mut DMatrix<f64>,
        ydot: &mut DMatrix<f64>,
    ) -> Result<bool, GridError> {
        self.check_blocks(y, ydot)?;
        let n = self.x.len();
        let n_comp = y.nrows();

        let mut range = vec![0.0; n_comp];
        for r in 0..n_comp {
            range[r] = y.row(r).max() - y.row(r).min();
        }

        let edge_active = |j_edge: usize, j_inner: usize| -> bool {
            (0..n_comp).any(|r| {
                range[r] > self.config.abs_vtol
                    && (y[(r, j_inner)] - y[(r, j_edge)]).abs()
                        > self.config.boundary_tol * range[r]
            })
        };
        let edge_flat = |j_edge: usize, j_inner: usize| -> bool {
            (0..n_comp).all(|r| {
                range[r] <= self.config.abs_vtol
                    || (y[(r, j_inner)] - y[(r, j_edge)]).abs()
                        < self.config.boundary_tol_rm * range[r]
            })
        };

        let mut extend_left = edge_active(0, 1);
        let mut extend_right = edge_active(n - 1, n - 2);
        // contraction looks one interval deeper so extension and contraction
        // cannot both fire on the same side; a solution with no variation at
        // all gives no reason to touch the boundaries
        let any_active = range.iter().any(|&r| r > self.config.abs_vtol);
        let contract_left = any_active && !extend_left && edge_flat(0, 2.min(n - 1));
        let contract_right = any_active && !extend_right && edge_flat(n - 1, n.saturating_sub(3));

        if self.x.len() >= self.config.n_points_max {
            extend_left = false;
            extend_right = false;
        }
        if !(extend_left || extend_right || contract_left || contract_right) {
            return Ok(false);
        }

        let mut x_new = self.x.clone();
        let mut cols: Vec<usize> = (0..n).collect();
        let mut prepend = false;
        let mut append = false;

        if contract_left {
            x_new.remove(0);
            cols.remove(0);
        } else if extend_left {
            // uniform extension by the current edge spacing
            let h = self.x[1] - self.x[0];
            x_new.insert(0, self.x[0] - h);
            prepend = true;
        }
        if contract_right {
            x_new.pop();
            cols.pop();
        } else if extend_right {
            let h = self.x[n - 1] - self.x[n - 2];
            x_new.push(self.x[n - 1] + h);
            append = true;
        }

        let n_new = x_new.len();
        if n_new < self.config.n_points_min {
            return Err(GridError::Degenerate(format!(
                "regrid would leave {} points, minimum is {}",
                n_new, self.config.n_points_min
            )));
        }

        let mut y_new = DMatrix::zeros(n_comp, n_new);
        let mut ydot_new = DMatrix::zeros(n_comp, n_new);
        let mut col = 0;
        if prepend {
            // zero-gradient extension copies the old edge value
            y_new.column_mut(0).copy_from(&y.column(0));
            col = 1;
        }
        for &j in &cols {
            y_new.column_mut(col).copy_from(&y.column(j));
            ydot_new.column_mut(col).copy_from(&ydot.column(j));
            col += 1;
        }
        if append {
            y_new.column_mut(col).copy_from(&y.column(n - 1));
        }

        self.commit(x_new, y_new, ydot_new, y, ydot)?;
        info!(
            "regrid: domain now [{:.6}, {:.6}] with {} points",
            self.x_left,
            self.x_right,
            self.x.len()
        );
        Ok(true)
    }

    /// Validate a candidate mesh, then commit it together with the rebuilt
    /// solution blocks and re-interpolated damping values.
    fn commit(
        &mut self,
        x_new: Vec<f64>,
        y_new: DMatrix<f64>,
        ydot_new: DMatrix<f64>,
        y: &mut DMatrix<f64>,
        ydot: &mut DMatrix<f64>,
    ) -> Result<(), GridError> {
        for i in 1..x_new.len() {
            if x_new[i] <= x_new[i - 1] {
                return Err(GridError::Degenerate(format!(
                    "non-monotonic coordinates at index {}: {} after {}",
                    i,
                    x_new[i],
                    x_new[i - 1]
                )));
            }
        }
        let damp_new: Vec<f64> = x_new
            .iter()
            .map(|&xq| interp1(&self.x, &self.damp_val, xq))
            .collect();
        self.x = x_new;
        self.damp_val = damp_new;
        self.x_left = self.x[0];
        self.x_right = *self.x.last().unwrap();
        *y = y_new;
        *ydot = ydot_new;
        self.generation += 1;
        Ok(())
    }

    fn check_blocks(&self, y: &DMatrix<f64>, ydot: &DMatrix<f64>) -> Result<(), GridError> {
        if y.ncols() != self.x.len() {
            return Err(GridError::SizeMismatch {
                cols: y.ncols(),
                points: self.x.len(),
            });
        }
        if ydot.ncols() != self.x.len() {
            return Err(GridError::SizeMismatch {
                cols: ydot.ncols(),
                points: self.x.len(),
            });
        }
        Ok(())
    }
}
