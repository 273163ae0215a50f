//! # Gas-Phase Chemistry Interface
//!
//! ## Purpose
//! Single entry point between the flame state and the external chemistry
//! provider. The provider (a Cantera-class library in a production setup) is
//! injected behind the `GasModel` trait; the solver never sees its internals,
//! only per-grid-point property arrays.
//!
//! ## Contract
//! - `set_state` must be called before any getter of the same evaluation;
//!   getters are pure functions of the last `set_state`.
//! - `resize` must be called whenever the grid point count changes, before any
//!   other call.
//! - Mass-fraction rows are indexed `Y[(k, j)]`: species k at grid point j.
//!
//! `PropertyCache` holds the per-point snapshot the flame system works from
//! (density, transport coefficients, production rates, enthalpies, heat
//! release) and refreshes it from the provider on demand.
//!
//! `ConstantPropertyGas` is a frozen-chemistry model (fixed transport, zero
//! production rates) used by the demo binary and the tests.

use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GasError {
    #[error("non-physical state at grid point {point}: {reason}")]
    NonPhysicalState { point: usize, reason: String },
    #[error("chemistry provider failed to converge: {0}")]
    Unconverged(String),
    #[error("state block sized {got} points, provider sized {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

/// Capability interface of the external chemistry provider.
///
/// All getters operate on the full per-point array, indexed consistently with
/// the grid the provider was last resized to.
pub trait GasModel {
    fn n_species(&self) -> usize;

    /// Resize the provider to `n` grid points. Invalidates previous state.
    fn resize(&mut self, n_points: usize);

    /// Push composition and temperature for every grid point.
    fn set_state(&mut self, y: &DMatrix<f64>, temperature: &[f64]) -> Result<(), GasError>;

    fn get_density(&self) -> Vec<f64>;
    fn get_viscosity(&self) -> Vec<f64>;
    fn get_thermal_conductivity(&self) -> Vec<f64>;
    fn get_specific_heat_capacity(&self) -> Vec<f64>;
    /// Mixture-averaged diffusion coefficients, `(k, j)` indexed.
    fn get_diffusion_coefficients(&self) -> DMatrix<f64>;
    /// Net species production rates in mass units (kg/m^3/s), `(k, j)` indexed.
    fn get_reaction_rates(&self) -> DMatrix<f64>;
    /// Species specific enthalpies (J/kg), `(k, j)` indexed.
    fn get_enthalpies(&self) -> DMatrix<f64>;
    /// Normalized mass fractions as the provider sees them, used to correct
    /// drift of the total before consistent-IC computation.
    fn get_mass_fractions(&self) -> DMatrix<f64>;
}

/// Per-grid-point snapshot of every property the residual assembly needs.
///
/// Owned by the flame system, refreshed from the provider whenever the state
/// changes, resized together with the grid. Never advanced by the integrator.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    /// density (kg/m^3)
    pub rho: Vec<f64>,
    /// viscosity (Pa s)
    pub mu: Vec<f64>,
    /// thermal conductivity (W/m/K)
    pub lambda: Vec<f64>,
    /// specific heat capacity (J/kg/K)
    pub cp: Vec<f64>,
    /// diffusion coefficients, (k, j)
    pub Dkm: DMatrix<f64>,
    /// species production rates, (k, j)
    pub wDot: DMatrix<f64>,
    /// species enthalpies, (k, j)
    pub hk: DMatrix<f64>,
    /// heat release rate per unit volume, qDot[j] = -sum_k wDot(k,j)*hk(k,j)
    pub qDot: Vec<f64>,
}

impl PropertyCache {
    pub fn resize(&mut self, n_spec: usize, n_points: usize) {
        self.rho = vec![0.0; n_points];
        self.mu = vec![0.0; n_points];
        self.lambda = vec![0.0; n_points];
        self.cp = vec![0.0; n_points];
        self.Dkm = DMatrix::zeros(n_spec, n_points);
        self.wDot = DMatrix::zeros(n_spec, n_points);
        self.hk = DMatrix::zeros(n_spec, n_points);
        self.qDot = vec![0.0; n_points];
    }

    /// Push the current state into the provider and pull every property back.
    pub fn refresh(
        &mut self,
        gas: &mut dyn GasModel,
        y: &DMatrix<f64>,
        temperature: &[f64],
    ) -> Result<(), GasError> {
        gas.set_state(y, temperature)?;
        self.rho = gas.get_density();
        self.mu = gas.get_viscosity();
        self.lambda = gas.get_thermal_conductivity();
        self.cp = gas.get_specific_heat_capacity();
        self.Dkm = gas.get_diffusion_coefficients();
        self.wDot = gas.get_reaction_rates();
        self.hk = gas.get_enthalpies();
        let n_points = temperature.len();
        let n_spec = gas.n_species();
        for j in 0..n_points {
            let mut q = 0.0;
            for k in 0..n_spec {
                q -= self.wDot[(k, j)] * self.hk[(k, j)];
            }
            self.qDot[j] = q;
        }
        Ok(())
    }
}

/// Frozen-chemistry gas model: constant transport properties, ideal-gas-like
/// density from a reference state, zero production rates and enthalpies.
///
/// Intended for tests and the demo binary; a production run plugs a real
/// kinetics/transport library behind `GasModel` instead.
#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct ConstantPropertyGas {
    pub n_spec: usize,
    /// reference density at `T_ref` (kg/m^3); rho(T) = rho_ref * T_ref / T
    pub rho_ref: f64,
    pub T_ref: f64,
    pub mu: f64,
    pub lambda: f64,
    pub cp: f64,
    pub diffusivity: f64,
    n_points: usize,
    Y: DMatrix<f64>,
    T: Vec<f64>,
}

impl ConstantPropertyGas {
    pub fn air_like(n_spec: usize) -> Self {
        Self {
            n_spec,
            rho_ref: 1.18,
            T_ref: 300.0,
            mu: 1.8e-5,
            lambda: 0.026,
            cp: 1005.0,
            diffusivity: 2.2e-5,
            n_points: 0,
            Y: DMatrix::zeros(n_spec, 0),
            T: Vec::new(),
        }
    }
}

impl GasModel for ConstantPropertyGas {
    fn n_species(&self) -> usize {
        self.n_spec
    }

    fn resize(&mut self, n_points: usize) {
        self.n_points = n_points;
        self.Y = DMatrix::zeros(self.n_spec, n_points);
        self.T = vec![0.0; n_points];
    }

    fn set_state(&mut self, y: &DMatrix<f64>, temperature: &[f64]) -> Result<(), GasError> {
        if y.ncols() != self.n_points || temperature.len() != self.n_points {
            return Err(GasError::SizeMismatch {
                got: y.ncols(),
                expected: self.n_points,
            });
        }
        for (j, &t) in temperature.iter().enumerate() {
            if !t.is_finite() || t <= 0.0 {
                return Err(GasError::NonPhysicalState {
                    point: j,
                    reason: format!("temperature {}", t),
                });
            }
        }
        self.Y.copy_from(y);
        self.T = temperature.to_vec();
        Ok(())
    }

    fn get_density(&self) -> Vec<f64> {
        self.T
            .iter()
            .map(|&t| self.rho_ref * self.T_ref / t)
            .collect()
    }

    fn get_viscosity(&self) -> Vec<f64> {
        vec![self.mu; self.n_points]
    }

    fn get_thermal_conductivity(&self) -> Vec<f64> {
        vec![self.lambda; self.n_points]
    }

    fn get_specific_heat_capacity(&self) -> Vec<f64> {
        vec![self.cp; self.n_points]
    }

    fn get_diffusion_coefficients(&self) -> DMatrix<f64> {
        DMatrix::from_element(self.n_spec, self.n_points, self.diffusivity)
    }

    fn get_reaction_rates(&self) -> DMatrix<f64> {
        DMatrix::zeros(self.n_spec, self.n_points)
    }

    fn get_enthalpies(&self) -> DMatrix<f64> {
        DMatrix::zeros(self.n_spec, self.n_points)
    }

    fn get_mass_fractions(&self) -> DMatrix<f64> {
        // renormalize columns so each sums to one
        let mut y = self.Y.clone();
        for j in 0..self.n_points {
            let total: f64 = y.column(j).iter().sum();
            if total > 0.0 {
                for k in 0..self.n_spec {
                    y[(k, j)] /= total;
                }
            }
        }
        y
    }
}
