use super::grid::{GridError, OneDimGrid};
use crate::settings::GridConfig;
use approx::assert_relative_eq;
use nalgebra::DMatrix;

fn loose_config() -> GridConfig {
    GridConfig {
        n_points_min: 3,
        grid_max: 10.0,
        ..GridConfig::default()
    }
}

#[test]
fn midpoint_insertion_preserves_existing_values() {
    let mut grid = OneDimGrid::from_points(vec![0.0, 1.0, 2.0], loose_config()).unwrap();
    // value jump only across the second interval
    let mut y = DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 1.0]);
    let mut ydot = DMatrix::zeros(1, 3);

    let changed = grid.adapt(&mut y, &mut ydot).unwrap();
    assert!(changed);
    assert_eq!(grid.n_points(), 4);
    assert_eq!(grid.generation(), 1);

    // existing points and values untouched, new midpoint interpolated
    assert_relative_eq!(grid.x[0], 0.0);
    assert_relative_eq!(grid.x[1], 1.0);
    assert_relative_eq!(grid.x[2], 1.5);
    assert_relative_eq!(grid.x[3], 2.0);
    assert_relative_eq!(y[(0, 1)], 0.0);
    assert_relative_eq!(y[(0, 2)], 0.5);
    assert_relative_eq!(y[(0, 3)], 1.0);
    assert_eq!(y.ncols(), grid.n_points());
}

#[test]
fn redundant_tight_point_is_removed() {
    let mut config = GridConfig::default();
    config.n_points_min = 4;
    let x = vec![
        0.0, 1e-4, 2e-4, 3e-4, 4.0e-4, 4.02e-4, 4.04e-4, 5e-4, 6e-4, 7e-4, 8e-4,
    ];
    let mut grid = OneDimGrid::from_points(x, config).unwrap();
    let mut y = DMatrix::from_element(1, 11, 1.0);
    let mut ydot = DMatrix::zeros(1, 11);

    let changed = grid.adapt(&mut y, &mut ydot).unwrap();
    assert!(changed);
    assert_eq!(grid.n_points(), 10);
    // the point squeezed between two sub-minimum intervals is gone
    assert!(grid.x.iter().all(|&x| (x - 4.02e-4).abs() > 1e-9));
    for i in 1..grid.n_points() {
        assert!(grid.x[i] > grid.x[i - 1]);
    }
    assert!(y.iter().all(|&v| (v - 1.0).abs() < 1e-14));
}

#[test]
fn adaptation_below_minimum_count_is_rejected_without_commit() {
    let mut config = GridConfig::default();
    config.n_points_min = 5;
    let x = vec![0.0, 1.0e-4, 1.005e-4, 1.01e-4, 2.0e-4];
    let mut grid = OneDimGrid::from_points(x.clone(), config).unwrap();
    let mut y = DMatrix::from_element(1, 5, 1.0);
    let mut ydot = DMatrix::zeros(1, 5);

    let result = grid.adapt(&mut y, &mut ydot);
    assert!(matches!(result, Err(GridError::Degenerate(_))));
    // rejected candidate must leave the mesh untouched
    assert_eq!(grid.n_points(), 5);
    assert_eq!(grid.generation(), 0);
    assert_eq!(grid.x, x);
}

#[test]
fn regrid_extends_active_edge_and_retires_flat_edge() {
    let mut config = GridConfig::default();
    config.n_points_min = 4;
    let x: Vec<f64> = (0..11).map(|j| j as f64 * 0.1).collect();
    let mut grid = OneDimGrid::from_points(x, config).unwrap();
    // solution varies only near the right boundary
    let mut vals = vec![0.0; 11];
    vals[9] = 0.5;
    vals[10] = 1.0;
    let mut y = DMatrix::from_row_slice(1, 11, &vals);
    let mut ydot = DMatrix::zeros(1, 11);

    let changed = grid.regrid(&mut y, &mut ydot).unwrap();
    assert!(changed);
    // left edge retired, right edge extended by the edge spacing
    assert_relative_eq!(grid.x_left, 0.1, epsilon = 1e-12);
    assert_relative_eq!(grid.x_right, 1.1, epsilon = 1e-12);
    assert_eq!(grid.n_points(), 11);
    // zero-gradient extension copies the old edge value
    assert_relative_eq!(y[(0, grid.n_points() - 1)], 1.0);
}

#[test]
fn regrid_leaves_featureless_solution_alone() {
    let x: Vec<f64> = (0..12).map(|j| j as f64 * 1e-3).collect();
    let mut grid = OneDimGrid::from_points(x, GridConfig::default()).unwrap();
    let mut y = DMatrix::from_element(2, 12, 3.5);
    let mut ydot = DMatrix::zeros(2, 12);

    let changed = grid.regrid(&mut y, &mut ydot).unwrap();
    assert!(!changed);
    assert_eq!(grid.generation(), 0);
    assert_eq!(grid.n_points(), 12);
}

#[test]
fn non_monotonic_coordinates_are_rejected() {
    let result = OneDimGrid::from_points(
        vec![0.0, 1.0, 0.5, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        GridConfig::default(),
    );
    assert!(matches!(result, Err(GridError::Degenerate(_))));
}

#[test]
fn damping_values_must_match_point_count() {
    let mut grid = OneDimGrid::new_uniform(0.0, 1.0, 10, GridConfig::default());
    assert!(matches!(
        grid.set_damp_val(vec![1.0; 7]),
        Err(GridError::SizeMismatch { .. })
    ));
    assert!(grid.set_damp_val(vec![1.0; 10]).is_ok());
}

#[test]
fn solution_block_size_mismatch_is_reported() {
    let mut grid = OneDimGrid::new_uniform(0.0, 1.0, 10, GridConfig::default());
    let mut y = DMatrix::zeros(1, 7);
    let mut ydot = DMatrix::zeros(1, 7);
    assert!(matches!(
        grid.adapt(&mut y, &mut ydot),
        Err(GridError::SizeMismatch { .. })
    ));
}
