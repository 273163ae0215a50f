//! Bundled reference backend for the `DaeIntegrator` trait: fixed-order
//! backward-Euler stepping with a modified-Newton iteration that reuses the
//! problem's banded preconditioner as its iteration matrix. Step size grows
//! geometrically after accepted steps and is cut on Newton failure.
//!
//! This exists so the demo binary and the end-to-end tests can run without an
//! external integrator; a production setup plugs a variable-order IDA-class
//! solver behind the same trait.

use super::flame_solver::{DaeIntegrator, DaeProblem, IntegratorError, IntegratorFactory};
use log::{debug, trace};
use nalgebra::DVector;

const NEWTON_MAX_ITER: usize = 8;
/// Converged when the weighted update norm falls below this.
const NEWTON_TOL: f64 = 0.1;
const STEP_ATTEMPTS: usize = 7;
const STEP_GROWTH: f64 = 1.5;
const STEP_CUT: f64 = 0.25;

pub struct ImplicitEulerIntegrator {
    t: f64,
    y: DVector<f64>,
    ydot: DVector<f64>,
    rel_tol: f64,
    abs_tol: Vec<f64>,
    dt_next: f64,
    dt_last: f64,
    dt_max: f64,
    n_steps: usize,
}

impl ImplicitEulerIntegrator {
    pub fn new(n_dof: usize, rel_tol: f64, abs_tol: Vec<f64>) -> Self {
        Self {
            t: 0.0,
            y: DVector::zeros(n_dof),
            ydot: DVector::zeros(n_dof),
            rel_tol,
            abs_tol,
            dt_next: 0.0,
            dt_last: 0.0,
            dt_max: f64::MAX,
            n_steps: 0,
        }
    }

    /// Weighted max norm of a Newton update against the tolerance profile.
    fn weighted_norm(&self, delta: &DVector<f64>) -> f64 {
        let mut w = 0.0_f64;
        for i in 0..delta.len() {
            let scale = self.abs_tol[i] + self.rel_tol * self.y[i].abs();
            w = w.max(delta[i].abs() / scale);
        }
        w
    }
}

impl DaeIntegrator for ImplicitEulerIntegrator {
    fn initialize(
        &mut self,
        t0: f64,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
    ) -> Result<(), IntegratorError> {
        if y0.len() != self.y.len() {
            return Err(IntegratorError::Setup(format!(
                "initial state sized {}, integrator sized {}",
                y0.len(),
                self.y.len()
            )));
        }
        self.t = t0;
        self.y = y0.clone();
        self.ydot = ydot0.clone();
        Ok(())
    }

    fn set_max_step_size(&mut self, dt_max: f64) {
        self.dt_max = dt_max;
        if self.dt_next == 0.0 || self.dt_next > dt_max {
            self.dt_next = dt_max;
        }
    }

    fn set_initial_step_size(&mut self, dt0: f64) {
        if dt0 > 0.0 {
            self.dt_next = dt0.min(self.dt_max);
        }
    }

    fn integrate_one_step(
        &mut self,
        problem: &mut dyn DaeProblem,
    ) -> Result<(), IntegratorError> {
        let n = self.y.len();
        let mut dt = self.dt_next.min(self.dt_max);
        let mut res = DVector::zeros(n);
        let mut last_reason = String::from("Newton iteration did not converge");

        for _attempt in 0..STEP_ATTEMPTS {
            let t_new = self.t + dt;
            let c_j = 1.0 / dt;
            // first-order predictor
            let mut y_new = &self.y + &self.ydot * dt;
            let mut ydot_new = (&y_new - &self.y) * c_j;

            if let Err(e) = problem.preconditioner_setup(t_new, &y_new, &ydot_new, c_j) {
                last_reason = e.to_string();
                dt *= STEP_CUT;
                continue;
            }

            let mut converged = false;
            for it in 0..NEWTON_MAX_ITER {
                if let Err(e) = problem.evaluate_residual(t_new, &y_new, &ydot_new, &mut res) {
                    last_reason = e.to_string();
                    break;
                }
                let delta = match problem.preconditioner_solve(&res) {
                    Ok(d) => d,
                    Err(e) => {
                        last_reason = e.to_string();
                        break;
                    }
                };
                y_new -= &delta;
                ydot_new = (&y_new - &self.y) * c_j;
                let wnorm = self.weighted_norm(&delta);
                trace!("newton iteration {}: weighted update {:.3e}", it, wnorm);
                if wnorm < NEWTON_TOL {
                    converged = true;
                    break;
                }
            }

            if converged {
                self.t = t_new;
                self.y = y_new;
                self.ydot = ydot_new;
                self.dt_last = dt;
                self.dt_next = (dt * STEP_GROWTH).min(self.dt_max);
                self.n_steps += 1;
                return Ok(());
            }
            debug!("step of {:.3e} rejected at t = {:.6e}, cutting", dt, self.t);
            dt *= STEP_CUT;
        }

        Err(IntegratorError::StepFailure {
            t: self.t,
            dt,
            reason: last_reason,
        })
    }

    fn get_step_size(&self) -> f64 {
        self.dt_last
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
        self.n_steps
    }
}

/// Factory handed to the control loop; rebuilt instances pick up the current
/// problem size and tolerance profile.
pub struct ImplicitEulerFactory;

impl IntegratorFactory for ImplicitEulerFactory {
    fn build(&self, n_dof: usize, rel_tol: f64, abs_tol: Vec<f64>) -> Box<dyn DaeIntegrator> {
        Box::new(ImplicitEulerIntegrator::new(n_dof, rel_tol, abs_tol))
    }
}
