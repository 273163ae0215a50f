//! # Strained Flame DAE System
//!
//! ## Purpose
//! Assembles the residuals of the coupled conservation laws of a
//! one-dimensional strained diffusion flame and everything the DAE integrator
//! needs around them: the mapping between the flat unknown vector and the
//! structured state arrays, the algebraic/differential flags, the consistent
//! initial condition, the banded Jacobian preconditioner, the strain-rate and
//! flame-position forcing terms, and the derived scalar diagnostics.
//!
//! ## Unknown layout
//! Per grid point j the flat vector carries `[rhov_j, U_j, T_j, Y_0j, ...,
//! Y_{nSpec-1,j}]`, so `n_vars = 3 + nSpec` and `N = n_vars * nPoints`. The
//! three-point finite-difference stencil couples each residual to the unknowns
//! of the two neighboring points, which confines the Jacobian to a band of
//! half-width `2*n_vars`.
//!
//! ## Governing equations (center differences on the non-uniform mesh)
//! - continuity (algebraic): d(rhov)/dx + a(t)*rho*U = 0, anchored at the left
//!   boundary by the rVcenter forcing signal
//! - momentum: rho*dU/dt + rhov*dU/dx - d/dx(mu*dU/dx)
//!   - a(t)*(rhou - rho*U^2) - rho*U*(da/dt)/a = 0
//! - energy: rho*cp*dT/dt + rhov*cp*dT/dx - d/dx(lambda*dT/dx) - qDot = 0
//! - species: rho*dYk/dt + rhov*dYk/dx - d/dx(rho*Dkm*dYk/dx) - wDot_k = 0
//!
//! U, T and Y are held at both domain boundaries through zero-time-derivative
//! residuals; the right-end continuity residual is the ordinary backward
//! difference.
//!
//! All per-point arrays are sized for one specific grid generation; residual
//! evaluation against a stale generation is refused rather than risked.

use super::band_jacobian::{BandMatrix, LinAlgError};
use super::gas_array::{GasError, GasModel, PropertyCache};
use super::grid::{GridError, OneDimGrid};
use crate::Utils::math::trapz;
use crate::settings::FlameConfig;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Relative perturbation used by the finite-difference Jacobian.
const JAC_EPS: f64 = 1e-7;
/// Convergence threshold on the algebraic residual norm of the consistent IC.
const IC_TOL: f64 = 1e-9;
/// Maximum passes of the consistent-IC computation.
pub const IC_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum FlameError {
    #[error("chemistry evaluation failed: {0}")]
    Chemistry(#[from] GasError),
    #[error("grid failure: {0}")]
    Grid(#[from] GridError),
    #[error("linear algebra failure in preconditioner: {0}")]
    LinAlg(#[from] LinAlgError),
    #[error(
        "consistent initial condition diverged: residual norm {residual_norm:.3e} after {attempts} attempts"
    )]
    InitialConditionDivergence { residual_norm: f64, attempts: usize },
    #[error("state arrays sized for grid generation {sized_for}, grid is at {current}")]
    StaleGrid { sized_for: u64, current: u64 },
    #[error("vector length {got} does not match problem size {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

/// The flame DAE system: state, properties, residuals and forcing terms.
#[allow(non_snake_case)]
pub struct StrainedFlameSys {
    pub config: FlameConfig,
    pub gas: Box<dyn GasModel>,
    pub grid: OneDimGrid,

    /// number of chemical species
    pub nSpec: usize,
    /// unknowns per grid point (3 + nSpec)
    pub nVars: usize,
    /// grid points the state arrays are sized for
    pub nPoints: usize,
    /// total problem size nVars * nPoints
    pub N: usize,

    // State variables
    /// mass flux normal to the flame per unit area (rho*v)
    pub rhov: Vec<f64>,
    /// normalized tangential velocity (u / u_inf)
    pub U: Vec<f64>,
    /// temperature (K)
    pub T: Vec<f64>,
    /// species mass fractions, (k, j)
    pub Y: DMatrix<f64>,

    // Time derivatives
    pub drhovdt: Vec<f64>,
    pub dUdt: Vec<f64>,
    pub dTdt: Vec<f64>,
    pub dYdt: DMatrix<f64>,

    // Spatial derivatives, recomputed every residual evaluation
    dUdx: Vec<f64>,
    dTdx: Vec<f64>,
    dYdx: DMatrix<f64>,

    /// per-point property snapshot refreshed from the gas model
    pub props: PropertyCache,

    // Residuals of the governing equations
    res_continuity: Vec<f64>,
    res_momentum: Vec<f64>,
    res_energy: Vec<f64>,
    res_species: DMatrix<f64>,

    /// true for unknowns governed by a purely algebraic equation
    pub algebraic: Vec<bool>,

    /// Jacobian half-bandwidth
    jac_bw: usize,
    banded_jacobian: BandMatrix,

    // Flame position (radius) control signal history
    pub r_vcenter_initial: f64,
    pub r_vcenter_prev: f64,
    pub r_vcenter_next: f64,
    pub t_flame_prev: f64,
    pub t_flame_next: f64,

    /// grid generation the per-point arrays were sized under
    sized_for_generation: u64,
    pub t_now: f64,
}

impl StrainedFlameSys {
    /// Build the system on a fresh uniform grid and generate initial profiles.
    pub fn new(config: FlameConfig, gas: Box<dyn GasModel>) -> Result<Self, FlameError> {
        let grid = OneDimGrid::new_uniform(
            config.x_left,
            config.x_right,
            config.n_points_initial,
            config.grid.clone(),
        );
        let n_spec = gas.n_species();
        let mut sys = Self {
            nSpec: n_spec,
            nVars: 3 + n_spec,
            nPoints: 0,
            N: 0,
            rhov: Vec::new(),
            U: Vec::new(),
            T: Vec::new(),
            Y: DMatrix::zeros(n_spec, 0),
            drhovdt: Vec::new(),
            dUdt: Vec::new(),
            dTdt: Vec::new(),
            dYdt: DMatrix::zeros(n_spec, 0),
            dUdx: Vec::new(),
            dTdx: Vec::new(),
            dYdx: DMatrix::zeros(n_spec, 0),
            props: PropertyCache::default(),
            res_continuity: Vec::new(),
            res_momentum: Vec::new(),
            res_energy: Vec::new(),
            res_species: DMatrix::zeros(n_spec, 0),
            algebraic: Vec::new(),
            jac_bw: 0,
            banded_jacobian: BandMatrix::zeros(0, 0),
            r_vcenter_initial: 0.0,
            r_vcenter_prev: 0.0,
            r_vcenter_next: 0.0,
            t_flame_prev: config.t_start,
            t_flame_next: config.t_start,
            sized_for_generation: 0,
            t_now: config.t_start,
            config,
            gas,
            grid,
        };
        sys.setup();
        sys.generate_initial_profiles()?;
        Ok(sys)
    }

    /// Resize every per-point array to the current grid and record the grid
    /// generation they are sized for. Must run after any topology change and
    /// before the next residual evaluation.
    pub fn setup(&mut self) {
        let n = self.grid.n_points();
        let resized = n != self.nPoints;
        self.nPoints = n;
        self.N = self.nVars * n;
        self.jac_bw = 2 * self.nVars;

        let keep = |v: &mut Vec<f64>, n: usize| v.resize(n, 0.0);
        keep(&mut self.rhov, n);
        keep(&mut self.U, n);
        keep(&mut self.T, n);
        keep(&mut self.drhovdt, n);
        keep(&mut self.dUdt, n);
        keep(&mut self.dTdt, n);
        keep(&mut self.dUdx, n);
        keep(&mut self.dTdx, n);
        keep(&mut self.res_continuity, n);
        keep(&mut self.res_momentum, n);
        keep(&mut self.res_energy, n);
        if self.Y.ncols() != n {
            self.Y = self.Y.clone().resize(self.nSpec, n, 0.0);
            self.dYdt = DMatrix::zeros(self.nSpec, n);
            self.dYdx = DMatrix::zeros(self.nSpec, n);
            self.res_species = DMatrix::zeros(self.nSpec, n);
        }
        self.props.resize(self.nSpec, n);
        self.gas.resize(n);
        self.banded_jacobian = BandMatrix::zeros(self.N, self.jac_bw);
        self.update_algebraic_components();
        self.sized_for_generation = self.grid.generation();
        if resized {
            debug!("flame system resized to {} points ({} unknowns)", n, self.N);
        }
    }

    fn check_generation(&self) -> Result<(), FlameError> {
        if self.sized_for_generation != self.grid.generation() {
            return Err(FlameError::StaleGrid {
                sized_for: self.sized_for_generation,
                current: self.grid.generation(),
            });
        }
        Ok(())
    }

    ///////////////////////////////////INITIAL PROFILES//////////////////////////////////////////

    /// Generate smooth tanh-blended profiles between the unburned and burned
    /// states, then solve the continuity constraint for the mass flux.
    pub fn generate_initial_profiles(&mut self) -> Result<(), FlameError> {
        let n = self.nPoints;
        let (xl, xr) = (self.grid.x_left, self.grid.x_right);
        let xm = 0.5 * (xl + xr);
        let w = self.config.initial_profile_width * (xr - xl);

        let mut yu = self.config.Y_unburned.clone();
        let mut yb = self.config.Y_burned.clone();
        if yu.len() != self.nSpec {
            yu = vec![0.0; self.nSpec];
            yu[0] = 1.0;
        }
        if yb.len() != self.nSpec {
            yb = vec![0.0; self.nSpec];
            yb[self.nSpec - 1] = 1.0;
        }

        for j in 0..n {
            let s = 0.5 * (1.0 + ((self.grid.x[j] - xm) / w).tanh());
            self.T[j] = self.config.Tu + (self.config.Tb - self.config.Tu) * s;
            self.U[j] = 1.0;
            for k in 0..self.nSpec {
                self.Y[(k, j)] = yu[k] + (yb[k] - yu[k]) * s;
            }
        }
        self.props.refresh(self.gas.as_mut(), &self.Y, &self.T)?;
        self.r_vcenter_initial = 0.0;
        self.r_vcenter_prev = self.r_vcenter_initial;
        self.r_vcenter_next = self.r_vcenter_initial;
        self.solve_continuity(self.config.t_start);
        info!(
            "generated initial profiles: {} points, Tu = {} K, Tb = {} K",
            n, self.config.Tu, self.config.Tb
        );
        Ok(())
    }

    /// March the continuity constraint from the anchored left boundary,
    /// overwriting `rhov` with the exact discrete solution.
    fn solve_continuity(&mut self, t: f64) {
        let a = self.strain_rate(t);
        self.rhov[0] = self.r_vcenter(t);
        for j in 1..self.nPoints {
            let h = self.grid.x[j] - self.grid.x[j - 1];
            let src = 0.5
                * (self.props.rho[j] * self.U[j] + self.props.rho[j - 1] * self.U[j - 1]);
            self.rhov[j] = self.rhov[j - 1] - h * a * src;
        }
    }

    ///////////////////////////////////ROLL / UNROLL//////////////////////////////////////////

    /// Write the structured state into the flat unknown vector.
    pub fn roll_y(&self, y: &mut DVector<f64>) {
        let nv = self.nVars;
        for j in 0..self.nPoints {
            y[nv * j] = self.rhov[j];
            y[nv * j + 1] = self.U[j];
            y[nv * j + 2] = self.T[j];
            for k in 0..self.nSpec {
                y[nv * j + 3 + k] = self.Y[(k, j)];
            }
        }
    }

    /// Read the flat unknown vector into the structured state.
    pub fn unroll_y(&mut self, y: &DVector<f64>) {
        let nv = self.nVars;
        for j in 0..self.nPoints {
            self.rhov[j] = y[nv * j];
            self.U[j] = y[nv * j + 1];
            self.T[j] = y[nv * j + 2];
            for k in 0..self.nSpec {
                self.Y[(k, j)] = y[nv * j + 3 + k];
            }
        }
    }

    pub fn roll_ydot(&self, ydot: &mut DVector<f64>) {
        let nv = self.nVars;
        for j in 0..self.nPoints {
            ydot[nv * j] = self.drhovdt[j];
            ydot[nv * j + 1] = self.dUdt[j];
            ydot[nv * j + 2] = self.dTdt[j];
            for k in 0..self.nSpec {
                ydot[nv * j + 3 + k] = self.dYdt[(k, j)];
            }
        }
    }

    pub fn unroll_ydot(&mut self, ydot: &DVector<f64>) {
        let nv = self.nVars;
        for j in 0..self.nPoints {
            self.drhovdt[j] = ydot[nv * j];
            self.dUdt[j] = ydot[nv * j + 1];
            self.dTdt[j] = ydot[nv * j + 2];
            for k in 0..self.nSpec {
                self.dYdt[(k, j)] = ydot[nv * j + 3 + k];
            }
        }
    }

    fn roll_residuals(&self, res: &mut DVector<f64>) {
        let nv = self.nVars;
        for j in 0..self.nPoints {
            res[nv * j] = self.res_continuity[j];
            res[nv * j + 1] = self.res_momentum[j];
            res[nv * j + 2] = self.res_energy[j];
            for k in 0..self.nSpec {
                res[nv * j + 3 + k] = self.res_species[(k, j)];
            }
        }
    }

    /// Roll the flat vector into a components-by-points block for the grid:
    /// the nVars state rows plus a trailing heat-release row, so adaptation
    /// also tracks the reaction zone.
    pub fn roll_state_matrix(&self, y: &DVector<f64>, q_row: &[f64]) -> DMatrix<f64> {
        let nv = self.nVars;
        let mut m = DMatrix::zeros(nv + 1, self.nPoints);
        for j in 0..self.nPoints {
            for v in 0..nv {
                m[(v, j)] = y[nv * j + v];
            }
            m[(nv, j)] = q_row[j];
        }
        m
    }

    /// Inverse of `roll_state_matrix` (the heat-release row is derived state
    /// and is dropped).
    pub fn unroll_state_matrix(&self, m: &DMatrix<f64>) -> DVector<f64> {
        let nv = self.nVars;
        let n_points = m.ncols();
        let mut y = DVector::zeros(nv * n_points);
        for j in 0..n_points {
            for v in 0..nv {
                y[nv * j + v] = m[(v, j)];
            }
        }
        y
    }

    ///////////////////////////////////FORCING TERMS//////////////////////////////////////////

    /// Imposed strain rate: linear ramp between the configured bounds over
    /// `[strain_rate_t0, strain_rate_t0 + strain_rate_dt]`, constant outside.
    pub fn strain_rate(&self, t: f64) -> f64 {
        let c = &self.config;
        if t <= c.strain_rate_t0 || c.strain_rate_dt == 0.0 {
            c.strain_rate_initial
        } else if t >= c.strain_rate_t0 + c.strain_rate_dt {
            c.strain_rate_final
        } else {
            c.strain_rate_initial
                + (c.strain_rate_final - c.strain_rate_initial) * (t - c.strain_rate_t0)
                    / c.strain_rate_dt
        }
    }

    /// Time derivative of the strain ramp: the slope inside the ramp interval,
    /// zero outside.
    pub fn d_strain_rate_dt(&self, t: f64) -> f64 {
        let c = &self.config;
        if c.strain_rate_dt == 0.0 || t <= c.strain_rate_t0 || t >= c.strain_rate_t0 + c.strain_rate_dt
        {
            0.0
        } else {
            (c.strain_rate_final - c.strain_rate_initial) / c.strain_rate_dt
        }
    }

    /// Current boundary mass-flux forcing: linear in time between the previous
    /// and next controller values, constant once the window has elapsed.
    pub fn r_vcenter(&self, t: f64) -> f64 {
        if !self.config.flame_radius_control || self.t_flame_next <= self.t_flame_prev {
            return self.r_vcenter_next;
        }
        let w = ((t - self.t_flame_prev) / (self.t_flame_next - self.t_flame_prev)).clamp(0.0, 1.0);
        self.r_vcenter_prev + w * (self.r_vcenter_next - self.r_vcenter_prev)
    }

    /// Nudge the rVcenter forcing toward the flame-position target, bounded by
    /// the configured slew rate. Pure forcing update; never touches the mesh.
    pub fn update_rvcenter(&mut self, t: f64) {
        if !self.config.flame_radius_control {
            return;
        }
        let err = self.get_flame_position() - self.config.r_flame_target;
        let current = self.r_vcenter(t);
        let desired = current + self.config.r_flame_gain * err;
        let delta = (desired - current)
            .clamp(-self.config.r_vcenter_max_change, self.config.r_vcenter_max_change);
        self.r_vcenter_prev = current;
        self.r_vcenter_next = current + delta;
        self.t_flame_prev = t;
        self.t_flame_next = t + self.config.rflame_update_time_interval;
        debug!(
            "rVcenter update at t = {:.6}: {:.6} -> {:.6} (position error {:.6})",
            t, self.r_vcenter_prev, self.r_vcenter_next, err
        );
    }

    ///////////////////////////////////RESIDUAL ASSEMBLY//////////////////////////////////////////

    /// Evaluate the DAE residual `F(t, y, ydot)`.
    ///
    /// Unrolls the flat vectors, refreshes the property snapshot from the gas
    /// model (a chemistry failure propagates untouched), recomputes the
    /// spatial derivatives and assembles the four residual families.
    pub fn f(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        res: &mut DVector<f64>,
    ) -> Result<(), FlameError> {
        self.check_generation()?;
        if y.len() != self.N {
            return Err(FlameError::SizeMismatch {
                got: y.len(),
                expected: self.N,
            });
        }
        self.unroll_y(y);
        self.unroll_ydot(ydot);
        self.props.refresh(self.gas.as_mut(), &self.Y, &self.T)?;
        self.update_spatial_derivatives();

        let n = self.nPoints;
        let x = &self.grid.x;
        let a = self.strain_rate(t);
        let dadt = self.d_strain_rate_dt(t);
        let p = &self.props;

        // continuity: algebraic constraint, anchored on the left
        self.res_continuity[0] = self.rhov[0] - self.r_vcenter(t);
        for j in 1..n {
            let h = x[j] - x[j - 1];
            let src = 0.5 * (p.rho[j] * self.U[j] + p.rho[j - 1] * self.U[j - 1]);
            self.res_continuity[j] = (self.rhov[j] - self.rhov[j - 1]) / h + a * src;
        }

        for j in 0..n {
            if j == 0 || j == n - 1 {
                // Dirichlet boundaries: hold U, T and Y
                self.res_momentum[j] = self.dUdt[j];
                self.res_energy[j] = self.dTdt[j];
                for k in 0..self.nSpec {
                    self.res_species[(k, j)] = self.dYdt[(k, j)];
                }
                continue;
            }

            let rho = p.rho[j];

            // momentum
            let visc = self.flux_divergence(&self.U, &p.mu, j);
            let mut res_m = rho * self.dUdt[j] + self.rhov[j] * self.dUdx[j]
                - visc
                - a * (self.config.rhou - rho * self.U[j] * self.U[j]);
            if a > 0.0 {
                res_m -= rho * self.U[j] * dadt / a;
            }
            self.res_momentum[j] = res_m;

            // energy
            let cond = self.flux_divergence(&self.T, &p.lambda, j);
            self.res_energy[j] = rho * p.cp[j] * self.dTdt[j]
                + self.rhov[j] * p.cp[j] * self.dTdx[j]
                - cond
                - p.qDot[j];

            // species
            for k in 0..self.nSpec {
                let diff = self.species_flux_divergence(k, j);
                self.res_species[(k, j)] = rho * self.dYdt[(k, j)]
                    + self.rhov[j] * self.dYdx[(k, j)]
                    - diff
                    - p.wDot[(k, j)];
            }
        }

        self.roll_residuals(res);
        self.t_now = t;
        Ok(())
    }

    /// Center-difference first derivatives on the non-uniform mesh (one-sided
    /// at the boundaries, where they only feed diagnostics).
    fn update_spatial_derivatives(&mut self) {
        let n = self.nPoints;
        let x = &self.grid.x;
        for j in 0..n {
            if j == 0 {
                let h = x[1] - x[0];
                self.dUdx[j] = (self.U[1] - self.U[0]) / h;
                self.dTdx[j] = (self.T[1] - self.T[0]) / h;
                for k in 0..self.nSpec {
                    self.dYdx[(k, j)] = (self.Y[(k, 1)] - self.Y[(k, 0)]) / h;
                }
            } else if j == n - 1 {
                let h = x[n - 1] - x[n - 2];
                self.dUdx[j] = (self.U[n - 1] - self.U[n - 2]) / h;
                self.dTdx[j] = (self.T[n - 1] - self.T[n - 2]) / h;
                for k in 0..self.nSpec {
                    self.dYdx[(k, j)] = (self.Y[(k, n - 1)] - self.Y[(k, n - 2)]) / h;
                }
            } else {
                let hm = x[j] - x[j - 1];
                let hp = x[j + 1] - x[j];
                let denom = hm * hp * (hm + hp);
                let c = |fm: f64, f0: f64, fp: f64| {
                    (fp * hm * hm + f0 * (hp * hp - hm * hm) - fm * hp * hp) / denom
                };
                self.dUdx[j] = c(self.U[j - 1], self.U[j], self.U[j + 1]);
                self.dTdx[j] = c(self.T[j - 1], self.T[j], self.T[j + 1]);
                for k in 0..self.nSpec {
                    self.dYdx[(k, j)] = c(self.Y[(k, j - 1)], self.Y[(k, j)], self.Y[(k, j + 1)]);
                }
            }
        }
    }

    /// Conservative form of `d/dx(c df/dx)` at interior point j: midpoint
    /// fluxes with arithmetic-mean coefficients.
    fn flux_divergence(&self, f: &[f64], coeff: &[f64], j: usize) -> f64 {
        let x = &self.grid.x;
        let hm = x[j] - x[j - 1];
        let hp = x[j + 1] - x[j];
        let c_plus = 0.5 * (coeff[j] + coeff[j + 1]);
        let c_minus = 0.5 * (coeff[j] + coeff[j - 1]);
        let flux_plus = c_plus * (f[j + 1] - f[j]) / hp;
        let flux_minus = c_minus * (f[j] - f[j - 1]) / hm;
        (flux_plus - flux_minus) / (0.5 * (hm + hp))
    }

    /// `d/dx(rho Dkm dYk/dx)` at interior point j.
    fn species_flux_divergence(&self, k: usize, j: usize) -> f64 {
        let x = &self.grid.x;
        let p = &self.props;
        let hm = x[j] - x[j - 1];
        let hp = x[j + 1] - x[j];
        let c_plus = 0.5 * (p.rho[j] * p.Dkm[(k, j)] + p.rho[j + 1] * p.Dkm[(k, j + 1)]);
        let c_minus = 0.5 * (p.rho[j] * p.Dkm[(k, j)] + p.rho[j - 1] * p.Dkm[(k, j - 1)]);
        let flux_plus = c_plus * (self.Y[(k, j + 1)] - self.Y[(k, j)]) / hp;
        let flux_minus = c_minus * (self.Y[(k, j)] - self.Y[(k, j - 1)]) / hm;
        (flux_plus - flux_minus) / (0.5 * (hm + hp))
    }

    ///////////////////////////////////ALGEBRAIC FLAGS & CONSISTENT IC//////////////////////////////

    /// Mark the purely algebraic unknowns: every continuity slot. Momentum,
    /// energy and species slots carry time derivatives.
    pub fn update_algebraic_components(&mut self) {
        self.algebraic = vec![false; self.N];
        for j in 0..self.nPoints {
            self.algebraic[self.nVars * j] = true;
        }
    }

    /// Iteratively correct `(y, ydot)` into a consistent DAE initial state:
    /// renormalize the mass fractions against the gas model, solve the
    /// continuity constraint exactly, back out the differential time
    /// derivatives from the remaining residuals, and verify the algebraic
    /// residual norm. Bounded by `IC_MAX_ATTEMPTS`; divergence is fatal for
    /// the caller's segment.
    pub fn get_initial_condition(
        &mut self,
        t: f64,
        y: &mut DVector<f64>,
        ydot: &mut DVector<f64>,
    ) -> Result<(), FlameError> {
        self.check_generation()?;
        let mut res = DVector::zeros(self.N);
        let mut norm = f64::MAX;
        for attempt in 1..=IC_MAX_ATTEMPTS {
            // correct mass-fraction drift through the provider
            self.unroll_y(y);
            self.gas.set_state(&self.Y, &self.T)?;
            self.Y = self.gas.get_mass_fractions();
            self.props.refresh(self.gas.as_mut(), &self.Y, &self.T)?;
            self.solve_continuity(t);
            self.roll_y(y);

            // residual with frozen time derivatives gives the consistent ydot
            let zero = DVector::zeros(self.N);
            self.f(t, y, &zero, &mut res)?;
            for j in 0..self.nPoints {
                let rho = self.props.rho[j];
                self.drhovdt[j] = 0.0;
                if j == 0 || j == self.nPoints - 1 {
                    // boundary residuals are already pure time derivatives
                    self.dUdt[j] = 0.0;
                    self.dTdt[j] = 0.0;
                    for k in 0..self.nSpec {
                        self.dYdt[(k, j)] = 0.0;
                    }
                } else {
                    self.dUdt[j] = -self.res_momentum[j] / rho;
                    self.dTdt[j] = -self.res_energy[j] / (rho * self.props.cp[j]);
                    for k in 0..self.nSpec {
                        self.dYdt[(k, j)] = -self.res_species[(k, j)] / rho;
                    }
                }
            }
            self.roll_ydot(ydot);

            // verify: the full residual must now vanish
            self.f(t, y, ydot, &mut res)?;
            norm = res.amax();
            if norm < IC_TOL {
                debug!(
                    "consistent IC converged on attempt {} (residual {:.3e})",
                    attempt, norm
                );
                return Ok(());
            }
            warn!(
                "consistent IC attempt {}: residual norm {:.3e}",
                attempt, norm
            );
        }
        Err(FlameError::InitialConditionDivergence {
            residual_norm: norm,
            attempts: IC_MAX_ATTEMPTS,
        })
    }

    ///////////////////////////////////PRECONDITIONER//////////////////////////////////////////

    /// Build and factorize the banded approximation of
    /// `J = dF/dy + c_j * dF/dydot` by grouped-column finite differences:
    /// columns a full band apart are perturbed together, so one residual
    /// evaluation fills a whole group.
    pub fn preconditioner_setup(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        c_j: f64,
    ) -> Result<(), FlameError> {
        self.check_generation()?;
        let n = self.N;
        let bw = self.jac_bw;
        let stride = 2 * bw + 1;

        let mut res0 = DVector::zeros(n);
        self.f(t, y, ydot, &mut res0)?;

        self.banded_jacobian.fill_zero();
        let mut y_pert = y.clone();
        let mut ydot_pert = ydot.clone();
        let mut res_pert = DVector::zeros(n);
        let mut dy = vec![0.0; n];

        for group in 0..stride.min(n) {
            let mut col = group;
            while col < n {
                dy[col] = JAC_EPS * y[col].abs().max(1.0);
                y_pert[col] = y[col] + dy[col];
                ydot_pert[col] = ydot[col] + c_j * dy[col];
                col += stride;
            }
            self.f(t, &y_pert, &ydot_pert, &mut res_pert)?;
            let mut col = group;
            while col < n {
                let lo = col.saturating_sub(bw);
                let hi = (col + bw).min(n - 1);
                for row in lo..=hi {
                    self.banded_jacobian
                        .set(row, col, (res_pert[row] - res0[row]) / dy[col]);
                }
                y_pert[col] = y[col];
                ydot_pert[col] = ydot[col];
                col += stride;
            }
        }

        self.banded_jacobian.lu_factorize()?;
        // restore the unperturbed state in the structured arrays
        self.f(t, y, ydot, &mut res0)?;
        Ok(())
    }

    /// Apply the factorized banded preconditioner to a Newton right-hand side.
    pub fn preconditioner_solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, FlameError> {
        Ok(self.banded_jacobian.solve(rhs)?)
    }

    ///////////////////////////////////STATE SYNC//////////////////////////////////////////

    /// Pull the integrator's current vectors into the structured arrays and
    /// refresh the property snapshot, so diagnostics and grid bookkeeping see
    /// the advanced state.
    pub fn sync_state(
        &mut self,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
    ) -> Result<(), FlameError> {
        self.check_generation()?;
        if y.len() != self.N {
            return Err(FlameError::SizeMismatch {
                got: y.len(),
                expected: self.N,
            });
        }
        self.unroll_y(y);
        self.unroll_ydot(ydot);
        self.props.refresh(self.gas.as_mut(), &self.Y, &self.T)?;
        Ok(())
    }

    /// Correct the drift of the total mass fractions against the gas model.
    pub fn renormalize_mass_fractions(&mut self) -> Result<(), FlameError> {
        self.gas.set_state(&self.Y, &self.T)?;
        self.Y = self.gas.get_mass_fractions();
        self.props.refresh(self.gas.as_mut(), &self.Y, &self.T)?;
        Ok(())
    }

    ///////////////////////////////////DIAGNOSTICS//////////////////////////////////////////

    /// Integral of the heat release rate over the domain (W/m^2).
    pub fn get_heat_release_rate(&self) -> f64 {
        trapz(&self.grid.x, &self.props.qDot)
    }

    /// Consumption speed: integral of the fuel production rate normalized by
    /// the unburned density and the fuel mass-fraction drop.
    pub fn get_consumption_speed(&self) -> f64 {
        let k = self.config.fuel_index;
        let w_fuel: Vec<f64> = (0..self.nPoints).map(|j| self.props.wDot[(k, j)]).collect();
        let y_u = self.Y[(k, 0)];
        let y_b = self.Y[(k, self.nPoints - 1)];
        let denom = self.config.rhou * (y_u - y_b);
        if denom.abs() < 1e-30 {
            return 0.0;
        }
        -trapz(&self.grid.x, &w_fuel) / denom
    }

    /// Flame position: heat-release-weighted centroid of x, falling back to
    /// the domain center for a cold (zero heat release) state.
    pub fn get_flame_position(&self) -> f64 {
        let q_total = trapz(&self.grid.x, &self.props.qDot);
        if q_total.abs() < 1e-30 {
            return 0.5 * (self.grid.x_left + self.grid.x_right);
        }
        let xq: Vec<f64> = self
            .grid
            .x
            .iter()
            .zip(&self.props.qDot)
            .map(|(&x, &q)| x * q)
            .collect();
        trapz(&self.grid.x, &xq) / q_total
    }

    /// Recompute the grid damping values: the smallest transport diffusivity
    /// at each point over the local velocity scale, floored against
    /// stagnation points.
    pub fn update_grid_damping(&mut self) -> Result<(), FlameError> {
        let mut damp = vec![0.0; self.nPoints];
        for j in 0..self.nPoints {
            let mut num = self.props.mu[j].min(self.props.lambda[j] / self.props.cp[j]);
            for k in 0..self.nSpec {
                num = num.min(self.props.rho[j] * self.props.Dkm[(k, j)]);
            }
            let vel = self.rhov[j].abs().max(self.config.grid.velocity_floor);
            damp[j] = num / vel;
        }
        self.grid.set_damp_val(damp)?;
        Ok(())
    }
}
