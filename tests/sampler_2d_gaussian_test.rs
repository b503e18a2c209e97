//! Tests verifying the statistical correctness of the multi-chain sampler on
//! a correlated 2D Gaussian target.
//!
//! The sample mean and covariance of the pooled chains are compared against
//! the known target moments.

use std::collections::HashMap;

use approx::assert_abs_diff_eq;
use multichain_mcmc::executor::RayonExecutor;
use multichain_mcmc::model::LogDensityFn;
use multichain_mcmc::sampler::Sampler;
use ndarray::{arr1, arr2, Axis};
use ndarray_stats::CorrelationExt;

/// Log-density of a zero-mean Gaussian with covariance [[4, 2], [2, 3]].
///
/// det = 8, inverse = [[3, -2], [-2, 4]] / 8.
fn correlated_gaussian(x: &[f64]) -> f64 {
    let (a, b) = (x[0], x[1]);
    -0.5 * (3.0 * a * a - 4.0 * a * b + 4.0 * b * b) / 8.0
}

#[test]
fn pooled_chains_recover_the_target_moments() {
    const NCHAINS: usize = 4;
    const BURNIN: u64 = 1_000;
    const NSTEPS: u64 = 6_000;
    const SEED: u64 = 42;

    let model = LogDensityFn::new(correlated_gaussian);
    let mut sampler = Sampler::new(["x", "y"], model, NCHAINS, Vec::new(), Some(SEED))
        .unwrap()
        .with_executor(RayonExecutor::new());

    let mut start = HashMap::new();
    start.insert("x".to_string(), vec![0.0; NCHAINS]);
    start.insert("y".to_string(), vec![0.0; NCHAINS]);
    sampler.set_start(&start).unwrap();

    // Burn in, discard, then sample.
    sampler.run(BURNIN).unwrap();
    sampler.clear();
    sampler.run(NSTEPS).unwrap();

    let samples = sampler.positions().unwrap();
    assert_eq!(samples.shape(), &[NCHAINS, NSTEPS as usize, 2]);

    // Pool all chains into a (NCHAINS * NSTEPS, 2) matrix.
    let stacked = samples
        .into_shape_with_order((NCHAINS * NSTEPS as usize, 2))
        .expect("Failed to reshape samples");

    let mean = stacked.mean_axis(Axis(0)).unwrap();
    let cov = stacked.t().cov(1.0).unwrap();
    assert_abs_diff_eq!(mean, arr1(&[0.0, 0.0]), epsilon = 0.5);
    assert_abs_diff_eq!(cov, arr2(&[[4.0, 2.0], [2.0, 3.0]]), epsilon = 1.0);
}

#[test]
fn wrong_target_moments_are_distinguishable() {
    const NCHAINS: usize = 2;
    const NSTEPS: u64 = 6_000;
    const SEED: u64 = 42;

    // Sample a unit Gaussian instead; its covariance should be far from the
    // correlated target's.
    let model = LogDensityFn::new(|x: &[f64]| -0.5 * (x[0] * x[0] + x[1] * x[1]));
    let mut sampler = Sampler::new(["x", "y"], model, NCHAINS, Vec::new(), Some(SEED)).unwrap();

    let mut start = HashMap::new();
    start.insert("x".to_string(), vec![0.0; NCHAINS]);
    start.insert("y".to_string(), vec![0.0; NCHAINS]);
    sampler.set_start(&start).unwrap();
    sampler.run(NSTEPS).unwrap();

    let stacked = sampler
        .positions()
        .unwrap()
        .into_shape_with_order((NCHAINS * NSTEPS as usize, 2))
        .expect("Failed to reshape samples");
    let cov = stacked.t().cov(1.0).unwrap();

    let diff = (&cov - &arr2(&[[4.0, 2.0], [2.0, 3.0]])).mapv(f64::abs);
    let max_diff = diff.iter().cloned().fold(f64::MIN, f64::max);
    assert!(
        max_diff > 1.0,
        "unit-Gaussian samples unexpectedly match the correlated covariance (max diff {max_diff})"
    );
}
