use super::flame_solver::{
    DaeIntegrator, DaeProblem, FlameProfile, FlameSolver, IntegratorError, IntegratorFactory,
    SolverError,
};
use super::gas_array::ConstantPropertyGas;
use super::simple_integrator::ImplicitEulerFactory;
use crate::settings::FlameConfig;
use approx::assert_relative_eq;
use nalgebra::DVector;
use tempfile::tempdir;

/// Two-species frozen-chemistry setup with a uniform state and no imposed
/// strain; the exact steady solution of the governing equations.
fn frozen_config() -> FlameConfig {
    let mut config = FlameConfig::default();
    config.n_points_initial = 12;
    config.Tu = 300.0;
    config.Tb = 300.0;
    config.Y_unburned = vec![0.3, 0.7];
    config.Y_burned = vec![0.3, 0.7];
    config.strain_rate_initial = 0.0;
    config.strain_rate_final = 0.0;
    config.strain_rate_dt = 0.0;
    config.output_profiles = false;
    config
}

fn frozen_solver(config: FlameConfig) -> FlameSolver {
    FlameSolver::new(
        config,
        Box::new(ConstantPropertyGas::air_like(2)),
        Box::new(ImplicitEulerFactory),
    )
    .unwrap()
}

#[test]
fn termination_never_fires_before_the_window_is_populated() {
    let mut solver = frozen_solver(frozen_config());
    // history much shorter than the termination period
    solver.sys.t_now = 0.004;
    for i in 0..5 {
        solver.time_vector.push(i as f64 * 1e-3);
        solver.heat_release_rate.push(500.0);
    }
    assert!(!solver.check_termination_condition());
}

#[test]
fn termination_fires_on_steady_heat_release() {
    let mut solver = frozen_solver(frozen_config());
    solver.sys.t_now = 0.02;
    for i in 0..=20 {
        solver.time_vector.push(i as f64 * 1e-3);
        solver.heat_release_rate.push(500.0);
    }
    assert!(solver.check_termination_condition());
}

#[test]
fn termination_holds_while_heat_release_is_unsteady() {
    let mut solver = frozen_solver(frozen_config());
    solver.sys.t_now = 0.02;
    for i in 0..=20 {
        solver.time_vector.push(i as f64 * 1e-3);
        solver
            .heat_release_rate
            .push(if i % 2 == 0 { 100.0 } else { 900.0 });
    }
    assert!(!solver.check_termination_condition());
}

#[test]
fn termination_respects_the_disable_switch() {
    let mut config = frozen_config();
    config.termination.terminate_for_steady_qdot = false;
    let mut solver = frozen_solver(config);
    solver.sys.t_now = 0.02;
    for i in 0..=20 {
        solver.time_vector.push(i as f64 * 1e-3);
        solver.heat_release_rate.push(500.0);
    }
    assert!(!solver.check_termination_condition());
}

#[test]
fn frozen_flame_runs_to_completion() {
    let mut config = frozen_config();
    config.t_end = 2e-4;
    config.max_timestep = 1e-5;
    config.output_time_interval = 2e-5;
    config.termination.terminate_for_steady_qdot = false;
    let mut solver = frozen_solver(config);

    solver.run().unwrap();

    assert!(solver.sys.t_now >= 2e-4 - 1e-12);
    assert!(!solver.time_vector.is_empty());
    // the default spacing exceeds grid_max, so the run must have refined
    assert!(solver.sys.nPoints > 12);

    // the uniform steady state survives integration and regridding untouched
    for j in 0..solver.sys.nPoints {
        assert_relative_eq!(solver.sys.T[j], 300.0, epsilon = 1e-6);
        let total: f64 = (0..solver.sys.nSpec).map(|k| solver.sys.Y[(k, j)]).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn profile_snapshots_are_numbered_and_round_trip() {
    let dir = tempdir().unwrap();
    let mut config = frozen_config();
    config.output_dir = dir.path().to_string_lossy().to_string();
    let mut solver = frozen_solver(config);
    solver.sys.t_now = 1.5e-3;

    let path = solver.write_profile(false).unwrap();
    assert!(path.ends_with("prof000000.json"));
    let err_path = solver.write_profile(true).unwrap();
    assert!(err_path.ends_with("error000001.json"));

    let text = std::fs::read_to_string(&path).unwrap();
    let profile: FlameProfile = serde_json::from_str(&text).unwrap();
    assert_eq!(profile.x.len(), solver.sys.nPoints);
    assert_eq!(profile.Y.len(), solver.sys.nSpec);
    assert_relative_eq!(profile.t, 1.5e-3);
    assert_relative_eq!(profile.T[4], solver.sys.T[4]);

    let series_path = solver.write_time_series().unwrap();
    assert!(series_path.ends_with("out.json"));
    assert!(series_path.exists());
}

#[test]
fn restart_resumes_from_a_stored_profile() {
    let dir = tempdir().unwrap();
    let mut config = frozen_config();
    config.output_dir = dir.path().to_string_lossy().to_string();
    let mut source = frozen_solver(config.clone());
    source.sys.t_now = 1.5e-3;
    source.sys.T[3] = 345.0;
    let path = source.write_profile(false).unwrap();

    let mut restart_config = frozen_config();
    restart_config.restart_file = Some(path.to_string_lossy().to_string());
    let restarted = frozen_solver(restart_config);

    assert_eq!(restarted.sys.nPoints, source.sys.nPoints);
    assert_relative_eq!(restarted.sys.t_now, 1.5e-3);
    assert_relative_eq!(restarted.sys.T[3], 345.0);
}

/// Integrator stub that accepts initialization and fails every step while
/// reporting the consistent initial state back.
struct FailingIntegrator {
    t: f64,
    y: DVector<f64>,
    ydot: DVector<f64>,
}

impl DaeIntegrator for FailingIntegrator {
    fn initialize(
        &mut self,
        t0: f64,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
    ) -> Result<(), IntegratorError> {
        self.t = t0;
        self.y = y0.clone();
        self.ydot = ydot0.clone();
        Ok(())
    }

    fn set_max_step_size(&mut self, _dt_max: f64) {}
    fn set_initial_step_size(&mut self, _dt0: f64) {}

    fn integrate_one_step(
        &mut self,
        _problem: &mut dyn DaeProblem,
    ) -> Result<(), IntegratorError> {
        Err(IntegratorError::StepFailure {
            t: self.t,
            dt: 1e-5,
            reason: "synthetic failure".to_string(),
        })
    }

    fn get_step_size(&self) -> f64 {
        0.0
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn y(&self) -> &DVector<f64> {
        &self.y
    }

    fn ydot(&self) -> &DVector<f64> {
        &self.ydot
    }

    fn n_steps(&self) -> usize {
        0
    }
}

struct FailingFactory;

impl IntegratorFactory for FailingFactory {
    fn build(&self, n_dof: usize, _rel_tol: f64, _abs_tol: Vec<f64>) -> Box<dyn DaeIntegrator> {
        Box::new(FailingIntegrator {
            t: 0.0,
            y: DVector::zeros(n_dof),
            ydot: DVector::zeros(n_dof),
        })
    }
}

#[test]
fn repeated_step_failures_abort_with_error_snapshots() {
    let dir = tempdir().unwrap();
    let mut config = frozen_config();
    config.output_dir = dir.path().to_string_lossy().to_string();
    let mut solver = FlameSolver::new(
        config,
        Box::new(ConstantPropertyGas::air_like(2)),
        Box::new(FailingFactory),
    )
    .unwrap();

    let result = solver.run();
    assert!(matches!(
        result,
        Err(SolverError::RepeatedStepFailures { segments: 5, .. })
    ));

    // every failed segment left a post-mortem snapshot behind
    let error_files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("error"))
        .count();
    assert_eq!(error_files, 5);
}
