//! Benchmark objectives for optimizer tests
//!
//! Classic test functions for validating black-box optimizers. All take a
//! point as `&Array1<f64>` and return the function value; all are minimized
//! and have their global optimum at the origin unless noted.
//!
//! # Example
//!
//! ```rust
//! use ndarray::Array1;
//! use hypertune_testfunctions::sphere;
//!
//! let x = Array1::from_vec(vec![0.0, 0.0]);
//! assert_eq!(sphere(&x), 0.0);
//! ```

use ndarray::{Array1, Array2};

/// Simple quadratic: sum of squares (alias of sphere, kept for 1D toys).
pub fn quadratic(x: &Array1<f64>) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

/// Sphere function - unimodal, separable.
pub fn sphere(x: &Array1<f64>) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

/// Rastrigin function - highly multimodal with a regular grid of minima.
pub fn rastrigin(x: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    let sum: f64 = x
        .iter()
        .map(|&xi| xi.powi(2) - 10.0 * (2.0 * std::f64::consts::PI * xi).cos())
        .sum();
    10.0 * n + sum
}

/// Rosenbrock function - narrow curved valley, minimum at (1, ..., 1).
pub fn rosenbrock(x: &Array1<f64>) -> f64 {
    let mut sum = 0.0;
    for i in 0..x.len() - 1 {
        sum += 100.0 * (x[i + 1] - x[i] * x[i]).powi(2) + (1.0 - x[i]).powi(2);
    }
    sum
}

/// Create bounds matrix for optimization (2 x n matrix)
/// bounds[[0, i]] = lower bound, bounds[[1, i]] = upper bound
pub fn create_bounds(n: usize, lower: f64, upper: f64) -> Array2<f64> {
    Array2::from_shape_fn((2, n), |(i, _)| if i == 0 { lower } else { upper })
}
