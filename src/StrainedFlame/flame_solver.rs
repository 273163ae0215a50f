//! # Flame Solver Control Loop
//!
//! ## Purpose
//! Drives the strained-flame DAE system through repeated integration
//! segments. Each outer iteration rebuilds the integrator at the current
//! problem size, computes a consistent initial condition, then steps the
//! integrator until either a grid change, a forced restart or an integrator
//! failure ends the segment. Between steps the loop services its periodic
//! triggers: time-series output, profile snapshots, flame-position control,
//! grid adaptation plus the termination test, and the forced integrator
//! restart that guards against internal-state staleness.
//!
//! Every trigger fires when the elapsed time OR the step count since it last
//! fired exceeds its configured threshold.
//!
//! ## Collaborator interfaces
//! - **`DaeProblem`**: the capability contract the flame system offers the
//!   integrator - residual evaluation, banded preconditioner setup/solve and
//!   the algebraic/differential flags. No shared base-class state.
//! - **`DaeIntegrator`** / **`IntegratorFactory`**: the external IDA-class
//!   integrator, injected as a factory because every grid change forces a
//!   fresh instance sized to the new unknown vector.
//!
//! ## Failure policy
//! An integrator step failure writes an error-tagged snapshot and ends the
//! segment (the next outer pass retries at the same size); repeated failing
//! segments abort the run. Consistent-IC divergence and chemistry errors are
//! fatal for the run and surface to the caller.

use super::grid::OneDimGrid;
use super::strained_flame_sys::{FlameError, StrainedFlameSys};
use crate::Utils::math::{find_last, mean, mean_abs_deviation};
use crate::settings::{ConfigError, FlameConfig};
use log::{debug, error, info, warn};
use nalgebra::DVector;
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Consecutive failed integration segments tolerated before the run aborts.
const MAX_FAILED_SEGMENTS: usize = 5;

#[derive(Debug, Error)]
pub enum IntegratorError {
    #[error("integrator step failed at t = {t:.6e} (dt = {dt:.3e}): {reason}")]
    StepFailure { t: f64, dt: f64, reason: String },
    #[error("integrator setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Flame(#[from] FlameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Integrator(#[from] IntegratorError),
    #[error("integration aborted after {segments} consecutive failed segments at t = {t:.6e}")]
    RepeatedStepFailures { t: f64, segments: usize },
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<super::grid::GridError> for SolverError {
    fn from(e: super::grid::GridError) -> Self {
        SolverError::Flame(FlameError::from(e))
    }
}

/// Capability contract between the flame system and the DAE integrator.
pub trait DaeProblem {
    fn n_dof(&self) -> usize;

    /// Residual callback `F(t, y, ydot) -> res`; a chemistry failure is
    /// reported to the integrator as an unrecoverable evaluation error.
    fn evaluate_residual(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        res: &mut DVector<f64>,
    ) -> Result<(), FlameError>;

    /// Build/factorize the banded approximation of `dF/dy + c_j dF/dydot`.
    fn preconditioner_setup(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        c_j: f64,
    ) -> Result<(), FlameError>;

    fn preconditioner_solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, FlameError>;

    /// Per-unknown flags marking purely algebraic equations, for integrators
    /// that compute their own consistent initial condition.
    fn algebraic_components(&self) -> &[bool];
}

impl DaeProblem for StrainedFlameSys {
    fn n_dof(&self) -> usize {
        self.N
    }

    fn evaluate_residual(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        res: &mut DVector<f64>,
    ) -> Result<(), FlameError> {
        self.f(t, y, ydot, res)
    }

    fn preconditioner_setup(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        ydot: &DVector<f64>,
        c_j: f64,
    ) -> Result<(), FlameError> {
        StrainedFlameSys::preconditioner_setup(self, t, y, ydot, c_j)
    }

    fn preconditioner_solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, FlameError> {
        StrainedFlameSys::preconditioner_solve(self, rhs)
    }

    fn algebraic_components(&self) -> &[bool] {
        &self.algebraic
    }
}

/// External DAE integrator, one instance per problem size.
pub trait DaeIntegrator {
    fn initialize(
        &mut self,
        t0: f64,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
    ) -> Result<(), IntegratorError>;

    fn set_max_step_size(&mut self, dt_max: f64);
    fn set_initial_step_size(&mut self, dt0: f64);

    /// Advance the state by one internal step.
    fn integrate_one_step(&mut self, problem: &mut dyn DaeProblem)
    -> Result<(), IntegratorError>;

    /// Size of the last completed step.
    fn get_step_size(&self) -> f64;
    fn t(&self) -> f64;
    fn y(&self) -> &DVector<f64>;
    fn ydot(&self) -> &DVector<f64>;
    /// Accepted steps since construction.
    fn n_steps(&self) -> usize;
}

/// Builds a fresh integrator sized to the current unknown vector, with
/// per-slot absolute tolerances.
pub trait IntegratorFactory {
    fn build(&self, n_dof: usize, rel_tol: f64, abs_tol: Vec<f64>) -> Box<dyn DaeIntegrator>;
}

/// Full-state profile snapshot: restart file, periodic output and error dump.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlameProfile {
    pub t: f64,
    pub x: Vec<f64>,
    pub rhov: Vec<f64>,
    pub U: Vec<f64>,
    pub T: Vec<f64>,
    /// species rows, `Y[k][j]`
    pub Y: Vec<Vec<f64>>,
    pub q_dot: Vec<f64>,
}

impl FlameProfile {
    pub fn from_sys(sys: &StrainedFlameSys) -> Self {
        let n = sys.nPoints;
        Self {
            t: sys.t_now,
            x: sys.grid.x.clone(),
            rhov: sys.rhov.clone(),
            U: sys.U.clone(),
            T: sys.T.clone(),
            Y: (0..sys.nSpec)
                .map(|k| (0..n).map(|j| sys.Y[(k, j)]).collect())
                .collect(),
            q_dot: sys.props.qDot.clone(),
        }
    }
}

/// Scalar time-series record pushed on the output trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub t: f64,
    pub dt: f64,
    pub heat_release_rate: f64,
    pub consumption_speed: f64,
    pub flame_position: f64,
}

/// The outer control loop: owns the flame system, the integrator factory and
/// all run history.
pub struct FlameSolver {
    pub config: FlameConfig,
    pub sys: StrainedFlameSys,
    factory: Box<dyn IntegratorFactory>,

    // run history, instance state rather than hidden module state
    pub time_vector: Vec<f64>,
    pub timestep_vector: Vec<f64>,
    pub heat_release_rate: Vec<f64>,
    pub consumption_speed: Vec<f64>,
    pub flame_position: Vec<f64>,

    output_file_number: usize,
    n_total_steps: usize,
}

impl FlameSolver {
    /// Build the solver: validate the configuration, construct the flame
    /// system (generated profiles, or the restart file when one is set).
    pub fn new(
        config: FlameConfig,
        gas: Box<dyn super::gas_array::GasModel>,
        factory: Box<dyn IntegratorFactory>,
    ) -> Result<Self, SolverError> {
        config.validate()?;
        let mut sys = StrainedFlameSys::new(config.clone(), gas)?;
        if let Some(path) = &config.restart_file {
            let profile = Self::read_profile(path)?;
            Self::apply_profile(&mut sys, &profile)?;
            info!("restarted from {} at t = {:.6e}", path, profile.t);
        }
        Ok(Self {
            config,
            sys,
            factory,
            time_vector: Vec::new(),
            timestep_vector: Vec::new(),
            heat_release_rate: Vec::new(),
            consumption_speed: Vec::new(),
            flame_position: Vec::new(),
            output_file_number: 0,
            n_total_steps: 0,
        })
    }

    fn read_profile(path: &str) -> Result<FlameProfile, SolverError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load a stored profile into the system: rebuild the grid from the
    /// stored coordinates, resize everything, copy the state over.
    fn apply_profile(sys: &mut StrainedFlameSys, profile: &FlameProfile) -> Result<(), SolverError> {
        let grid = OneDimGrid::from_points(profile.x.clone(), sys.config.grid.clone())
            .map_err(FlameError::from)?;
        sys.grid = grid;
        sys.setup();
        let n = sys.nPoints;
        if profile.rhov.len() != n
            || profile.U.len() != n
            || profile.T.len() != n
            || profile.Y.len() != sys.nSpec
            || profile.Y.iter().any(|row| row.len() != n)
        {
            return Err(SolverError::Flame(FlameError::SizeMismatch {
                got: profile.rhov.len(),
                expected: n,
            }));
        }
        sys.rhov.copy_from_slice(&profile.rhov);
        sys.U.copy_from_slice(&profile.U);
        sys.T.copy_from_slice(&profile.T);
        for k in 0..sys.nSpec {
            for j in 0..n {
                sys.Y[(k, j)] = profile.Y[k][j];
            }
        }
        sys.t_now = profile.t;
        sys.renormalize_mass_fractions()?;
        Ok(())
    }

    /// Run the simulation to termination (steady heat release, maximum
    /// simulated time, or `t_end`).
    pub fn run(&mut self) -> Result<(), SolverError> {
        let mut t = self.sys.t_now;
        let t_end = self.config.t_end;
        let mut integrator_dt = 0.0_f64;

        let mut n_output = 0usize;
        let mut n_regrid = 0usize;
        let mut n_profile = 0usize;
        let mut n_flame_pos = 0usize;
        let mut n_integrate = 0usize;

        let mut t_output = t;
        let mut t_regrid = t;
        let mut t_profile = t;
        let mut t_flame_pos = t;

        let mut failed_segments = 0usize;

        // initial property state and flame-position control anchor
        self.sys.renormalize_mass_fractions()?;
        self.sys.r_vcenter_initial = self.sys.rhov[0];
        self.sys.r_vcenter_prev = self.sys.r_vcenter_initial;
        self.sys.r_vcenter_next = self.sys.r_vcenter_initial;
        self.sys.t_flame_prev = t;
        self.sys.t_flame_next = t + self.config.rflame_update_time_interval;
        if self.config.output_profiles {
            self.write_profile(false)?;
        }

        while t < t_end {
            // (re)build everything at the current problem size
            self.sys.setup();
            let abs_tol = self
                .config
                .tolerances
                .expand(self.sys.nPoints, self.sys.nSpec);
            let mut integrator =
                self.factory
                    .build(self.sys.N, self.config.tolerances.rel_tol, abs_tol);

            let mut y = DVector::zeros(self.sys.N);
            let mut ydot = DVector::zeros(self.sys.N);
            self.sys.roll_y(&mut y);

            self.sys.update_rvcenter(t);
            t_flame_pos = t + self.config.rflame_update_time_interval;
            n_flame_pos = 0;

            self.sys.update_algebraic_components();
            self.sys.get_initial_condition(t, &mut y, &mut ydot)?;

            integrator.initialize(t, &y, &ydot)?;
            integrator.set_max_step_size(self.config.max_timestep);
            if integrator_dt > 0.0 {
                integrator.set_initial_step_size(integrator_dt);
            }
            debug!(
                "integration segment from t = {:.6e} with {} unknowns",
                t, self.sys.N
            );

            // inner stepping loop
            while t < t_end {
                match integrator.integrate_one_step(&mut self.sys) {
                    Ok(()) => {
                        failed_segments = 0;
                        let dt = integrator.get_step_size();
                        integrator_dt = dt;
                        t = integrator.t();
                        self.sys.sync_state(integrator.y(), integrator.ydot())?;
                        self.sys.t_now = t;
                        n_output += 1;
                        n_regrid += 1;
                        n_profile += 1;
                        n_flame_pos += 1;
                        n_integrate += 1;
                        self.n_total_steps += 1;
                        debug!("t = {:.8e}  (dt = {:.3e})", t, dt);
                    }
                    Err(e) => {
                        error!("{}", e);
                        self.sys.sync_state(integrator.y(), integrator.ydot()).ok();
                        let snapshot = self.write_profile(true)?;
                        warn!("diagnostic state written to {}", snapshot.display());
                        integrator_dt = 0.0;
                        failed_segments += 1;
                        break;
                    }
                }

                if t > t_output || n_output >= self.config.output_step_interval {
                    self.record_time_series(t, integrator.get_step_size());
                    t_output = t + self.config.output_time_interval;
                    n_output = 0;
                }

                if t > t_profile || n_profile >= self.config.profile_step_interval {
                    if self.config.output_profiles {
                        self.write_profile(false)?;
                    }
                    t_profile = t + self.config.profile_time_interval;
                    n_profile = 0;
                }

                if self.config.flame_radius_control
                    && (t > t_flame_pos || n_flame_pos > self.config.rflame_update_step_interval)
                {
                    self.sys.update_rvcenter(t);
                    t_flame_pos = t + self.config.rflame_update_time_interval;
                    n_flame_pos = 0;
                }

                if t > t_regrid || n_regrid >= self.config.regrid_step_interval {
                    t_regrid = t + self.config.regrid_time_interval;
                    n_regrid = 0;

                    if self.check_termination_condition() {
                        if self.config.output_profiles {
                            self.write_profile(false)?;
                            self.write_time_series()?;
                        }
                        self.print_run_summary();
                        return Ok(());
                    }

                    // grid adaptation against the freshly synced state
                    self.sys.update_grid_damping()?;
                    let q_zero = vec![0.0; self.sys.nPoints];
                    let mut sol = self
                        .sys
                        .roll_state_matrix(integrator.y(), &self.sys.props.qDot);
                    let mut sol_dot = self.sys.roll_state_matrix(integrator.ydot(), &q_zero);

                    let regrid_flag = self.sys.grid.regrid(&mut sol, &mut sol_dot)?;
                    let adapt_flag = self.sys.grid.adapt(&mut sol, &mut sol_dot)?;

                    if regrid_flag || adapt_flag {
                        n_integrate = 0;
                        info!("grid size: {} points", self.sys.grid.n_points());
                        self.sys.setup();
                        let y_new = self.sys.unroll_state_matrix(&sol);
                        let ydot_new = self.sys.unroll_state_matrix(&sol_dot);
                        self.sys.unroll_y(&y_new);
                        self.sys.unroll_ydot(&ydot_new);
                        self.sys.renormalize_mass_fractions()?;
                        // integrator must be rebuilt at the new problem size
                        break;
                    }
                }

                if n_integrate > self.config.integrator_restart_interval {
                    n_integrate = 0;
                    debug!("forced integrator restart at t = {:.6e}", t);
                    self.sys.setup();
                    self.sys.renormalize_mass_fractions()?;
                    break;
                }
            }

            if failed_segments >= MAX_FAILED_SEGMENTS {
                return Err(SolverError::RepeatedStepFailures {
                    t,
                    segments: failed_segments,
                });
            }
        }

        if self.config.output_profiles {
            self.write_profile(false)?;
            self.write_time_series()?;
        }
        self.print_run_summary();
        Ok(())
    }

    fn record_time_series(&mut self, t: f64, dt: f64) {
        self.time_vector.push(t);
        self.timestep_vector.push(dt);
        self.heat_release_rate.push(self.sys.get_heat_release_rate());
        self.consumption_speed.push(self.sys.get_consumption_speed());
        self.flame_position.push(self.sys.get_flame_position());
    }

    pub fn time_series(&self) -> Vec<TimeSeriesRecord> {
        (0..self.time_vector.len())
            .map(|i| TimeSeriesRecord {
                t: self.time_vector[i],
                dt: self.timestep_vector[i],
                heat_release_rate: self.heat_release_rate[i],
                consumption_speed: self.consumption_speed[i],
                flame_position: self.flame_position[i],
            })
            .collect()
    }

    /// Dump the scalar time series to `out.json` in the output directory.
    pub fn write_time_series(&self) -> Result<PathBuf, SolverError> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = PathBuf::from(&self.config.output_dir).join("out.json");
        std::fs::write(&path, serde_json::to_string_pretty(&self.time_series())?)?;
        debug!("time series written to {}", path.display());
        Ok(path)
    }

    /// Steady-heat-release termination test over the trailing time window.
    ///
    /// Never signals before the window is populated. Termination fires when
    /// the relative mean absolute deviation of the heat release rate drops
    /// below the relative tolerance, the absolute deviation drops below the
    /// absolute tolerance, or the maximum simulated time is exceeded.
    pub fn check_termination_condition(&self) -> bool {
        let term = &self.config.termination;
        if !term.terminate_for_steady_qdot {
            return false;
        }
        let t_now = self.sys.t_now;
        let window_start = t_now - term.termination_period;
        let j1 = match find_last(&self.time_vector, |t| t < window_start) {
            Some(j) => j,
            None => {
                debug!(
                    "continuing integration: history shorter than the termination period {:.3e}",
                    term.termination_period
                );
                return false;
            }
        };
        let j2 = self.time_vector.len() - 1;
        let q_mean = mean(&self.heat_release_rate, j1, j2);
        let hrr_error = mean_abs_deviation(&self.heat_release_rate, j1, j2);
        info!(
            "heat release rate deviation = {:.3e} ({:.2} %)",
            hrr_error,
            if q_mean.abs() > 0.0 {
                hrr_error / q_mean.abs() * 100.0
            } else {
                0.0
            }
        );

        if q_mean.abs() > 0.0 && hrr_error / q_mean.abs() < term.termination_tolerance {
            info!("terminating integration: heat release deviation below relative tolerance");
            true
        } else if hrr_error < term.termination_abs_tol {
            info!("terminating integration: heat release deviation below absolute tolerance");
            true
        } else if t_now - self.config.t_start > term.termination_max_time {
            info!("terminating integration: maximum integration time reached");
            true
        } else {
            debug!("continuing integration at t = {:.6e}", t_now);
            false
        }
    }

    /// Serialize the full state to a numbered JSON snapshot. Error snapshots
    /// carry a distinct prefix so post-mortems are not confused with periodic
    /// output.
    pub fn write_profile(&mut self, is_error: bool) -> Result<PathBuf, SolverError> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let prefix = if is_error { "error" } else { "prof" };
        let path = PathBuf::from(&self.config.output_dir)
            .join(format!("{}{:06}.json", prefix, self.output_file_number));
        self.output_file_number += 1;
        let profile = FlameProfile::from_sys(&self.sys);
        std::fs::write(&path, serde_json::to_string_pretty(&profile)?)?;
        if is_error {
            warn!(
                "error snapshot at t = {:.6e} written to {}",
                self.sys.t_now,
                path.display()
            );
        } else {
            debug!("profile written to {}", path.display());
        }
        Ok(path)
    }

    /// Pretty-print the end-of-run scalars.
    pub fn print_run_summary(&self) {
        let mut table = Table::new();
        table.add_row(row!["Quantity", "Value"]);
        table.add_row(row!["final time (s)", format!("{:.6e}", self.sys.t_now)]);
        table.add_row(row!["accepted steps", self.n_total_steps]);
        table.add_row(row!["grid points", self.sys.nPoints]);
        table.add_row(row![
            "heat release rate (W/m^2)",
            format!("{:.6e}", self.sys.get_heat_release_rate())
        ]);
        table.add_row(row![
            "consumption speed (m/s)",
            format!("{:.6e}", self.sys.get_consumption_speed())
        ]);
        table.add_row(row![
            "flame position (m)",
            format!("{:.6e}", self.sys.get_flame_position())
        ]);
        println!("\n=== RUN SUMMARY ===");
        table.printstd();
    }
}
