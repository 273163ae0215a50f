use StrainedFlame::StrainedFlame::flame_solver::FlameSolver;
use StrainedFlame::StrainedFlame::gas_array::ConstantPropertyGas;
use StrainedFlame::StrainedFlame::simple_integrator::ImplicitEulerFactory;
use StrainedFlame::Utils::logging::init_console_logger;
use StrainedFlame::settings::FlameConfig;
use log::{LevelFilter, error, info};

/// Demo run: a two-species mixing layer with frozen chemistry under a
/// strain-rate ramp, driven by the bundled implicit-Euler backend.
pub fn main() {
    init_console_logger(LevelFilter::Info);

    let mut config = FlameConfig::default();
    config.t_end = 5e-3;
    config.termination.termination_max_time = 4e-3;
    config.output_profiles = false;

    let gas = Box::new(ConstantPropertyGas::air_like(2));
    let mut solver = match FlameSolver::new(config, gas, Box::new(ImplicitEulerFactory)) {
        Ok(s) => s,
        Err(e) => {
            error!("solver setup failed: {}", e);
            std::process::exit(1);
        }
    };

    match solver.run() {
        Ok(()) => info!(
            "run finished with {} time-series records",
            solver.time_vector.len()
        ),
        Err(e) => {
            error!("run failed: {}", e);
            std::process::exit(1);
        }
    }
}
