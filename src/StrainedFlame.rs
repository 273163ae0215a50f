pub mod band_jacobian;
pub mod flame_solver;
#[cfg(test)]
mod flame_solver_tests;
pub mod gas_array;
pub mod grid;
#[cfg(test)]
mod grid_tests;
pub mod simple_integrator;
pub mod strained_flame_sys;
#[cfg(test)]
mod strained_flame_sys_tests;
