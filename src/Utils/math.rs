//! Small numeric helpers used across the flame solver: trailing-window
//! statistics for the termination test, trapezoidal integration of per-point
//! fields over the non-uniform mesh, and linear interpolation for moving
//! solution profiles onto a changed grid.

/// Arithmetic mean of a slice range `[j1..=j2]`.
pub fn mean(v: &[f64], j1: usize, j2: usize) -> f64 {
    let n = j2 - j1 + 1;
    v[j1..=j2].iter().sum::<f64>() / n as f64
}

/// Mean absolute deviation of `v[j1..=j2]` around its own mean.
pub fn mean_abs_deviation(v: &[f64], j1: usize, j2: usize) -> f64 {
    let m = mean(v, j1, j2);
    let n = j2 - j1 + 1;
    v[j1..=j2].iter().map(|q| (q - m).abs()).sum::<f64>() / n as f64
}

/// Index of the last element satisfying the predicate, if any.
pub fn find_last<F: Fn(f64) -> bool>(v: &[f64], pred: F) -> Option<usize> {
    v.iter().rposition(|&x| pred(x))
}

/// Trapezoidal integral of `f` over the (possibly non-uniform) mesh `x`.
pub fn trapz(x: &[f64], f: &[f64]) -> f64 {
    assert_eq!(x.len(), f.len());
    let mut total = 0.0;
    for j in 1..x.len() {
        total += 0.5 * (f[j] + f[j - 1]) * (x[j] - x[j - 1]);
    }
    total
}

/// Linear interpolation of the profile `(x, f)` at the query point `xq`.
///
/// Query points outside the profile are clamped to the end values; `x` must be
/// strictly increasing.
pub fn interp1(x: &[f64], f: &[f64], xq: f64) -> f64 {
    assert_eq!(x.len(), f.len());
    let n = x.len();
    if xq <= x[0] {
        return f[0];
    }
    if xq >= x[n - 1] {
        return f[n - 1];
    }
    // first interval with x[i] <= xq < x[i+1]
    let mut i = 0;
    while i + 2 < n && x[i + 1] <= xq {
        i += 1;
    }
    let w = (xq - x[i]) / (x[i + 1] - x[i]);
    f[i] + w * (f[i + 1] - f[i])
}
