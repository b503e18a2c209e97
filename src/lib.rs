//! A compact library for embarrassingly parallel Metropolis-Hastings
//! sampling: independent chains over a named parameter space, reproducible
//! `(seed, stream)`-derived randomness, amortized history storage, and
//! pluggable serial/rayon execution. See [`sampler::Sampler`] for the main
//! entry point.

pub mod chain;
pub mod errors;
pub mod executor;
pub mod history;
pub mod model;
pub mod params;
pub mod proposals;
pub mod sampler;
pub mod stream;
