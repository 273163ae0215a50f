use super::gas_array::ConstantPropertyGas;
use super::strained_flame_sys::{FlameError, StrainedFlameSys};
use crate::Utils::math::trapz;
use crate::settings::FlameConfig;
use approx::assert_relative_eq;
use nalgebra::DVector;

/// Two-species frozen-chemistry setup with a uniform state and no imposed
/// strain; the exact steady solution of the governing equations.
fn frozen_config(n_points: usize) -> FlameConfig {
    let mut config = FlameConfig::default();
    config.n_points_initial = n_points;
    config.Tu = 300.0;
    config.Tb = 300.0;
    config.Y_unburned = vec![0.3, 0.7];
    config.Y_burned = vec![0.3, 0.7];
    config.strain_rate_initial = 0.0;
    config.strain_rate_final = 0.0;
    config.strain_rate_dt = 0.0;
    config
}

fn frozen_sys(n_points: usize) -> StrainedFlameSys {
    StrainedFlameSys::new(
        frozen_config(n_points),
        Box::new(ConstantPropertyGas::air_like(2)),
    )
    .unwrap()
}

#[test]
fn roll_and_unroll_are_inverse() {
    for n_points in [10, 13] {
        let mut sys = frozen_sys(n_points);
        for j in 0..sys.nPoints {
            sys.rhov[j] = 0.01 * j as f64;
            sys.U[j] = 1.0 + 0.1 * j as f64;
            sys.T[j] = 300.0 + 5.0 * j as f64;
            sys.Y[(0, j)] = 0.3 + 0.001 * j as f64;
            sys.Y[(1, j)] = 0.7 - 0.001 * j as f64;
        }
        let mut y1 = DVector::zeros(sys.N);
        sys.roll_y(&mut y1);
        sys.unroll_y(&y1);
        let mut y2 = DVector::zeros(sys.N);
        sys.roll_y(&mut y2);
        assert_eq!(y1, y2);

        // flat layout per point: [rhov, U, T, Y0, Y1]
        let nv = sys.nVars;
        assert_eq!(y1[nv * 4], sys.rhov[4]);
        assert_eq!(y1[nv * 4 + 1], sys.U[4]);
        assert_eq!(y1[nv * 4 + 2], sys.T[4]);
        assert_eq!(y1[nv * 4 + 3], sys.Y[(0, 4)]);
        assert_eq!(y1[nv * 4 + 4], sys.Y[(1, 4)]);
    }
}

#[test]
fn state_matrix_round_trips_through_grid_layout() {
    let mut sys = frozen_sys(12);
    for j in 0..sys.nPoints {
        sys.T[j] = 300.0 + j as f64;
        sys.U[j] = 2.0 - 0.05 * j as f64;
    }
    let mut y = DVector::zeros(sys.N);
    sys.roll_y(&mut y);
    let q_row = vec![0.0; sys.nPoints];
    let m = sys.roll_state_matrix(&y, &q_row);
    assert_eq!(m.nrows(), sys.nVars + 1);
    assert_eq!(m.ncols(), sys.nPoints);
    let back = sys.unroll_state_matrix(&m);
    assert_eq!(back, y);
}

#[test]
fn strain_ramp_is_continuous_and_integrates_back() {
    let mut config = frozen_config(12);
    config.strain_rate_initial = 100.0;
    config.strain_rate_final = 400.0;
    config.strain_rate_t0 = 0.0;
    config.strain_rate_dt = 2e-3;
    let sys = StrainedFlameSys::new(config, Box::new(ConstantPropertyGas::air_like(2))).unwrap();

    assert_relative_eq!(sys.strain_rate(-1.0), 100.0);
    assert_relative_eq!(sys.strain_rate(0.0), 100.0);
    assert_relative_eq!(sys.strain_rate(1e-3), 250.0);
    assert_relative_eq!(sys.strain_rate(2e-3), 400.0);
    assert_relative_eq!(sys.strain_rate(1.0), 400.0);
    assert_relative_eq!(sys.d_strain_rate_dt(1e-3), 150000.0);
    assert_relative_eq!(sys.d_strain_rate_dt(5e-3), 0.0);

    // monotone along the ramp
    let mut prev = sys.strain_rate(0.0);
    for i in 1..=200 {
        let a = sys.strain_rate(2e-3 * i as f64 / 200.0);
        assert!(a >= prev);
        prev = a;
    }

    // the derivative integrates back to the total ramp height
    let ts: Vec<f64> = (0..=600).map(|i| 3e-3 * i as f64 / 600.0).collect();
    let dadt: Vec<f64> = ts.iter().map(|&t| sys.d_strain_rate_dt(t)).collect();
    assert_relative_eq!(trapz(&ts, &dadt), 300.0, max_relative = 1e-2);
}

#[test]
fn consistent_ic_renormalizes_and_zeroes_the_residual() {
    let mut sys = frozen_sys(12);
    // drifted mass-fraction total
    sys.Y *= 1.25;
    let mut y = DVector::zeros(sys.N);
    let mut ydot = DVector::zeros(sys.N);
    sys.roll_y(&mut y);
    sys.get_initial_condition(0.0, &mut y, &mut ydot).unwrap();

    for j in 0..sys.nPoints {
        let total: f64 = (0..sys.nSpec).map(|k| sys.Y[(k, j)]).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_relative_eq!(sys.Y[(0, j)], 0.3, epsilon = 1e-12);
        // zero strain: the continuity constraint gives a uniform mass flux
        assert_relative_eq!(sys.rhov[j], 0.0, epsilon = 1e-14);
    }

    // the uniform frozen state is exactly steady
    assert!(ydot.amax() < 1e-12);
    let mut res = DVector::zeros(sys.N);
    sys.f(0.0, &y, &ydot, &mut res).unwrap();
    assert!(res.amax() < 1e-9);
}

#[test]
fn algebraic_flags_mark_exactly_the_continuity_slots() {
    let sys = frozen_sys(12);
    assert_eq!(sys.algebraic.len(), sys.N);
    let n_algebraic = sys.algebraic.iter().filter(|&&f| f).count();
    assert_eq!(n_algebraic, sys.nPoints);
    for j in 0..sys.nPoints {
        assert!(sys.algebraic[sys.nVars * j]);
        assert!(!sys.algebraic[sys.nVars * j + 1]);
        assert!(!sys.algebraic[sys.nVars * j + 2]);
    }
}

#[test]
fn banded_preconditioner_takes_a_newton_step() {
    let mut sys = frozen_sys(12);
    let mut y_base = DVector::zeros(sys.N);
    let mut ydot_base = DVector::zeros(sys.N);
    sys.roll_y(&mut y_base);
    sys.get_initial_condition(0.0, &mut y_base, &mut ydot_base)
        .unwrap();

    // backward-Euler style iteration matrix around a velocity bump
    let c_j = 1e4;
    let bump = sys.nVars * 5 + 1;
    let mut y = y_base.clone();
    y[bump] += 0.5;
    let ydot = (&y - &y_base) * c_j;

    let mut res1 = DVector::zeros(sys.N);
    sys.f(0.0, &y, &ydot, &mut res1).unwrap();
    assert!(res1.amax() > 1.0);

    sys.preconditioner_setup(0.0, &y, &ydot, c_j).unwrap();
    let delta = sys.preconditioner_solve(&res1).unwrap();
    let y2 = &y - &delta;
    let ydot2 = (&y2 - &y_base) * c_j;

    let mut res2 = DVector::zeros(sys.N);
    sys.f(0.0, &y2, &ydot2, &mut res2).unwrap();
    assert!(res2.amax() < 1e-6 * res1.amax());
}

#[test]
fn cold_state_diagnostics() {
    let sys = frozen_sys(12);
    assert_relative_eq!(sys.get_heat_release_rate(), 0.0);
    assert_relative_eq!(sys.get_consumption_speed(), 0.0);
    // no heat release: the flame position falls back to the domain center
    assert_relative_eq!(sys.get_flame_position(), 0.0, epsilon = 1e-12);
}

#[test]
fn grid_damping_is_floored_at_stagnation() {
    let mut sys = frozen_sys(12);
    sys.update_grid_damping().unwrap();
    // min(mu, lambda/cp, rho*D) over the velocity floor for air-like values
    let expected = 1.8e-5 / 1e-4;
    for &d in &sys.grid.damp_val {
        assert!(d.is_finite());
        assert_relative_eq!(d, expected, max_relative = 1e-10);
    }
}

#[test]
fn rvcenter_update_is_slew_limited() {
    let mut config = frozen_config(12);
    config.flame_radius_control = true;
    config.r_flame_target = -0.02;
    config.r_flame_gain = 10.0;
    config.r_vcenter_max_change = 0.05;
    let mut sys =
        StrainedFlameSys::new(config, Box::new(ConstantPropertyGas::air_like(2))).unwrap();

    // cold flame position is the domain center, 0.02 m off target; the
    // proportional response of 0.2 must be clamped to the slew bound
    sys.update_rvcenter(0.0);
    assert_relative_eq!(sys.r_vcenter_next - sys.r_vcenter_prev, 0.05, epsilon = 1e-12);
    // forcing interpolates linearly over the update window
    let t_mid = 0.5 * (sys.t_flame_prev + sys.t_flame_next);
    assert_relative_eq!(sys.r_vcenter(t_mid), 0.025, epsilon = 1e-12);
    assert_relative_eq!(sys.r_vcenter(sys.t_flame_next), 0.05, epsilon = 1e-12);
}

#[test]
fn stale_grid_generation_is_refused() {
    let mut sys = frozen_sys(12);
    let mut y = DVector::zeros(sys.N);
    sys.roll_y(&mut y);
    let q_row = vec![0.0; sys.nPoints];
    let mut sol = sys.roll_state_matrix(&y, &q_row);
    let mut sol_dot = sys.roll_state_matrix(&DVector::zeros(sys.N), &q_row);

    // the default spacing exceeds grid_max, so adaptation must refine
    let changed = sys.grid.adapt(&mut sol, &mut sol_dot).unwrap();
    assert!(changed);

    let ydot = DVector::zeros(sys.N);
    let mut res = DVector::zeros(sys.N);
    let result = sys.f(0.0, &y, &ydot, &mut res);
    assert!(matches!(result, Err(FlameError::StaleGrid { .. })));

    // resizing against the new generation clears the refusal
    sys.setup();
    assert_eq!(sys.nPoints, sys.grid.n_points());
}
