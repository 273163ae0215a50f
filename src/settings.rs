//! # Settings Module
//!
//! ## Purpose
//! Collects the whole configuration surface of the strained-flame solver in one
//! serde-backed struct so a run can be described by a single JSON file: domain
//! and initial-profile parameters, the strain-rate ramp, integrator tolerances,
//! the time/step interval pairs gating the periodic triggers of the control
//! loop, grid adaptation knobs and termination thresholds.
//!
//! ## Main Structures
//! - **`FlameConfig`**: top-level configuration aggregating the groups below
//! - **`ToleranceConfig`**: per-variable-kind absolute tolerances plus the shared
//!   relative tolerance; expands to a per-slot tolerance vector matching the
//!   flat unknown layout `[rhov, U, T, Y0..Y_{nSpec-1}]` per grid point
//! - **`GridConfig`**: adaptation/regridding heuristics (curvature tolerances,
//!   spacing bounds, boundary extension thresholds). These are tunable policies,
//!   not correctness invariants
//! - **`TerminationConfig`**: steady-heat-release termination thresholds
//!
//! ## Usage
//! ```rust, ignore
//! let config = FlameConfig::from_json_file("flame.json")?;
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Absolute tolerances by variable kind and the shared relative tolerance.
///
/// The DAE integrator wants one absolute tolerance per unknown; physically the
/// tolerances only differ by equation kind, so four values are stored and
/// expanded on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub rel_tol: f64,
    pub continuity_abs_tol: f64,
    pub momentum_abs_tol: f64,
    pub energy_abs_tol: f64,
    pub species_abs_tol: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            rel_tol: 1e-5,
            continuity_abs_tol: 1e-6,
            momentum_abs_tol: 1e-7,
            energy_abs_tol: 1e-6,
            species_abs_tol: 1e-8,
        }
    }
}

impl ToleranceConfig {
    /// Expand the per-kind tolerances to one entry per unknown, matching the
    /// flat layout `[rhov_j, U_j, T_j, Y_0j..Y_{nSpec-1,j}]` for each point j.
    pub fn expand(&self, n_points: usize, n_spec: usize) -> Vec<f64> {
        let n_vars = 3 + n_spec;
        let mut abstol = Vec::with_capacity(n_vars * n_points);
        for _j in 0..n_points {
            abstol.push(self.continuity_abs_tol);
            abstol.push(self.momentum_abs_tol);
            abstol.push(self.energy_abs_tol);
            for _k in 0..n_spec {
                abstol.push(self.species_abs_tol);
            }
        }
        abstol
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("rel_tol", self.rel_tol),
            ("continuity_abs_tol", self.continuity_abs_tol),
            ("momentum_abs_tol", self.momentum_abs_tol),
            ("energy_abs_tol", self.energy_abs_tol),
            ("species_abs_tol", self.species_abs_tol),
        ] {
            if !(v > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// Grid adaptation and regridding policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Curvature tolerance for point insertion, scaled by the local damping value.
    pub vtol: f64,
    /// Derivative-jump tolerance for point insertion.
    pub dvtol: f64,
    /// Components with a range below this fraction of their magnitude are not tracked.
    pub abs_vtol: f64,
    /// Minimum allowed spacing between neighboring points.
    pub grid_min: f64,
    /// Maximum allowed spacing between neighboring points.
    pub grid_max: f64,
    /// Floor substituted for the velocity scale when computing damping values,
    /// guarding the division at stagnation points.
    pub velocity_floor: f64,
    /// Relative solution variation near a boundary that triggers domain extension.
    pub boundary_tol: f64,
    /// Relative solution variation below which a boundary interval is retired.
    pub boundary_tol_rm: f64,
    /// Minimum viable number of grid points; adaptation results below this are rejected.
    pub n_points_min: usize,
    /// Hard cap on the number of grid points.
    pub n_points_max: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            vtol: 0.12,
            dvtol: 0.2,
            abs_vtol: 1e-8,
            grid_min: 5e-6,
            grid_max: 2e-3,
            velocity_floor: 1e-4,
            boundary_tol: 5e-5,
            boundary_tol_rm: 1e-5,
            n_points_min: 10,
            n_points_max: 600,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grid_min > 0.0) || self.grid_max <= self.grid_min {
            return Err(ConfigError::Invalid(
                "grid spacing bounds must satisfy 0 < grid_min < grid_max".to_string(),
            ));
        }
        if self.n_points_min < 4 {
            return Err(ConfigError::Invalid(
                "n_points_min must be at least 4".to_string(),
            ));
        }
        if self.n_points_max <= self.n_points_min {
            return Err(ConfigError::Invalid(
                "n_points_max must exceed n_points_min".to_string(),
            ));
        }
        if !(self.velocity_floor > 0.0) {
            return Err(ConfigError::Invalid(
                "velocity_floor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Steady-heat-release termination thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// Enable the steady-qdot termination test at all.
    pub terminate_for_steady_qdot: bool,
    /// Trailing time window over which heat release statistics are taken.
    pub termination_period: f64,
    /// Relative mean-absolute-deviation threshold.
    pub termination_tolerance: f64,
    /// Absolute mean-absolute-deviation threshold.
    pub termination_abs_tol: f64,
    /// Maximum simulated time before the run is stopped regardless.
    pub termination_max_time: f64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            terminate_for_steady_qdot: true,
            termination_period: 0.01,
            termination_tolerance: 1e-4,
            termination_abs_tol: 0.5,
            termination_max_time: 2.0,
        }
    }
}

/// Complete run configuration for the strained-flame solver.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlameConfig {
    // Domain and initial profiles
    pub x_left: f64,
    pub x_right: f64,
    pub n_points_initial: usize,
    /// Unburned-side temperature (K)
    pub Tu: f64,
    /// Burned-side temperature (K)
    pub Tb: f64,
    /// Unburned-gas density (kg/m^3)
    pub rhou: f64,
    /// Thermodynamic pressure (Pa)
    pub P: f64,
    /// Index of the fuel species in the mass-fraction rows (used by the
    /// consumption-speed diagnostic)
    pub fuel_index: usize,
    /// Width of the tanh blending zone of the generated initial profiles,
    /// as a fraction of the domain length
    pub initial_profile_width: f64,
    /// Unburned-side species mass fractions; empty means all mass in species 0
    #[serde(default)]
    pub Y_unburned: Vec<f64>,
    /// Burned-side species mass fractions; empty means all mass in the last species
    #[serde(default)]
    pub Y_burned: Vec<f64>,

    // Strain rate ramp: linear between the two values over
    // [strain_rate_t0, strain_rate_t0 + strain_rate_dt]
    pub strain_rate_initial: f64,
    pub strain_rate_final: f64,
    pub strain_rate_t0: f64,
    pub strain_rate_dt: f64,

    // Time span
    pub t_start: f64,
    pub t_end: f64,
    pub max_timestep: f64,

    pub tolerances: ToleranceConfig,
    pub grid: GridConfig,
    pub termination: TerminationConfig,

    // Periodic triggers: each fires when elapsed time OR steps since the last
    // firing exceed its threshold
    pub output_time_interval: f64,
    pub output_step_interval: usize,
    pub profile_time_interval: f64,
    pub profile_step_interval: usize,
    pub regrid_time_interval: f64,
    pub regrid_step_interval: usize,
    pub rflame_update_time_interval: f64,
    pub rflame_update_step_interval: usize,
    /// Force an integrator rebuild after this many accepted steps, guarding
    /// against internal-state staleness on long segments.
    pub integrator_restart_interval: usize,

    // Flame position (radius) control
    pub flame_radius_control: bool,
    /// Target flame position for the rVcenter controller
    pub r_flame_target: f64,
    /// Proportional gain of the controller (mass flux per unit position error)
    pub r_flame_gain: f64,
    /// Bound on the rVcenter change per update
    pub r_vcenter_max_change: f64,

    // Output
    pub output_profiles: bool,
    pub output_dir: String,
    pub restart_file: Option<String>,
}

impl Default for FlameConfig {
    fn default() -> Self {
        Self {
            x_left: -0.02,
            x_right: 0.02,
            n_points_initial: 21,
            Tu: 300.0,
            Tb: 2000.0,
            rhou: 1.18,
            P: 101325.0,
            fuel_index: 0,
            initial_profile_width: 0.1,
            Y_unburned: Vec::new(),
            Y_burned: Vec::new(),
            strain_rate_initial: 100.0,
            strain_rate_final: 400.0,
            strain_rate_t0: 0.0,
            strain_rate_dt: 2e-3,
            t_start: 0.0,
            t_end: 0.05,
            max_timestep: 1e-4,
            tolerances: ToleranceConfig::default(),
            grid: GridConfig::default(),
            termination: TerminationConfig::default(),
            output_time_interval: 1e-4,
            output_step_interval: 20,
            profile_time_interval: 5e-3,
            profile_step_interval: 500,
            regrid_time_interval: 5e-4,
            regrid_step_interval: 50,
            rflame_update_time_interval: 1e-3,
            rflame_update_step_interval: 100,
            integrator_restart_interval: 400,
            flame_radius_control: false,
            r_flame_target: 0.0,
            r_flame_gain: 1.0,
            r_vcenter_max_change: 0.05,
            output_profiles: false,
            output_dir: ".".to_string(),
            restart_file: None,
        }
    }
}

impl FlameConfig {
    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FlameConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internal consistency before any allocation
    /// happens. Validation failures name the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.x_right <= self.x_left {
            return Err(ConfigError::Invalid(
                "x_right must exceed x_left".to_string(),
            ));
        }
        if self.n_points_initial < self.grid.n_points_min {
            return Err(ConfigError::Invalid(format!(
                "n_points_initial {} below minimum viable point count {}",
                self.n_points_initial, self.grid.n_points_min
            )));
        }
        if !(self.Tu > 0.0) || !(self.Tb > 0.0) {
            return Err(ConfigError::Invalid(
                "temperatures must be positive".to_string(),
            ));
        }
        if !(self.rhou > 0.0) {
            return Err(ConfigError::Invalid("rhou must be positive".to_string()));
        }
        if self.t_end <= self.t_start {
            return Err(ConfigError::Invalid(
                "t_end must exceed t_start".to_string(),
            ));
        }
        if !(self.max_timestep > 0.0) {
            return Err(ConfigError::Invalid(
                "max_timestep must be positive".to_string(),
            ));
        }
        if self.strain_rate_dt < 0.0 {
            return Err(ConfigError::Invalid(
                "strain_rate_dt must be non-negative".to_string(),
            ));
        }
        if self.integrator_restart_interval == 0 {
            return Err(ConfigError::Invalid(
                "integrator_restart_interval must be at least 1".to_string(),
            ));
        }
        self.tolerances.validate()?;
        self.grid.validate()?;
        Ok(())
    }
}

/////////////////////////////////////////TESTS/////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FlameConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_domain_is_rejected() {
        let mut config = FlameConfig::default();
        config.x_left = 0.1;
        config.x_right = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn nonpositive_tolerance_is_rejected() {
        let mut config = FlameConfig::default();
        config.tolerances.species_abs_tol = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn too_few_initial_points_are_rejected() {
        let mut config = FlameConfig::default();
        config.n_points_initial = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tolerance_expansion_matches_unknown_layout() {
        let tol = ToleranceConfig::default();
        let abstol = tol.expand(4, 2);
        assert_eq!(abstol.len(), 4 * 5);
        // slot order per point: rhov, U, T, Y0, Y1
        assert_eq!(abstol[0], tol.continuity_abs_tol);
        assert_eq!(abstol[1], tol.momentum_abs_tol);
        assert_eq!(abstol[2], tol.energy_abs_tol);
        assert_eq!(abstol[3], tol.species_abs_tol);
        assert_eq!(abstol[4], tol.species_abs_tol);
        assert_eq!(abstol[5], tol.continuity_abs_tol);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = FlameConfig::default();
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: FlameConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.n_points_initial, config.n_points_initial);
        assert_eq!(back.tolerances.rel_tol, config.tolerances.rel_tol);
    }
}
