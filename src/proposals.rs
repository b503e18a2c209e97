/*!
Proposal distributions for the Metropolis-Hastings step.

A proposal governs a subset of the sampled parameters: on every chain step it
draws new values for exactly those parameters ([`Proposal::jump`]) and can
evaluate the log-density of a transition restricted to them
([`Proposal::logpdf`]). The proposals handed to a chain must partition the
full parameter set; the chain validates that at construction.

Symmetric proposals (`q(x -> y) == q(y -> x)`) declare themselves via
[`Proposal::symmetric`], which lets the chain drop the Hastings correction
term from the acceptance ratio. For non-symmetric kernels the chain adds
`logpdf(current, candidate) - logpdf(candidate, current)` to the
log-acceptance-ratio.

Every proposal owns a private [`RandomStream`]; nothing else may read or
write it. Chains hold deep copies of their proposals, so proposal-internal
random state never aliases across chains.

# Examples

```rust
use multichain_mcmc::proposals::{Normal, Proposal};
use ndarray::arr2;

// A unit-variance Gaussian step over two parameters.
let mut step: Normal<f64> = Normal::new(["x", "y"]).unwrap();
let candidate = step.jump(&[0.0, 0.0]);
assert_eq!(candidate.len(), 2);

// A correlated step with a full covariance matrix.
let cov = arr2(&[[2.0, 0.5], [0.5, 1.0]]);
let step = Normal::with_cov(["x", "y"], cov).unwrap();
assert!(step.symmetric());
```
*/

use ndarray::Array2;
use num_traits::Float;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::errors::{Error, Result};
use crate::stream::{RandomStream, StreamState};

/// A candidate-generating kernel over a subset of the sampled parameters.
pub trait Proposal<T: Float>: Send {
    /// The names of the parameters this proposal governs.
    fn parameters(&self) -> &[String];

    /// Whether the transition density satisfies `q(x -> y) == q(y -> x)`.
    ///
    /// Symmetric proposals contribute nothing to the acceptance ratio, so
    /// their [`logpdf`](Self::logpdf) is customarily only used for
    /// diagnostics.
    fn symmetric(&self) -> bool {
        false
    }

    /// Draws a candidate for the governed parameters.
    ///
    /// `from` holds the current values of the governed parameters, in the
    /// order of [`parameters`](Self::parameters). Every call advances the
    /// proposal's private random stream; the result is deterministic given
    /// the stream's state.
    fn jump(&mut self, from: &[T]) -> Vec<T>;

    /// The log-density of transitioning `from -> to`, restricted to the
    /// governed parameters.
    fn logpdf(&self, to: &[T], from: &[T]) -> T;

    /// Snapshots the internal random stream.
    fn stream_state(&self) -> StreamState;

    /// Restores the internal random stream, enabling exact resumption.
    fn set_stream_state(&mut self, state: &StreamState);

    /// Rebinds the internal stream to `(seed, stream)`.
    ///
    /// Called once per chain at sampler construction so that each chain's
    /// copy of the proposal draws from its own stream.
    fn reseed(&mut self, seed: u64, stream: u64);

    /// Deep-copies the proposal, private stream included.
    fn boxed_clone(&self) -> Box<dyn Proposal<T>>;
}

impl<T: Float> Clone for Box<dyn Proposal<T>> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/**
A symmetric Gaussian step with a fixed covariance.

Candidates are `from + L z` where `z` is standard normal and `L` is the
Cholesky factor of the covariance matrix, so the proposal is a pure additive
displacement and does not depend on the current position beyond the offset.

Construction fails with a configuration error if the covariance matrix is
not square, does not match the number of governed parameters, or is not
positive definite.

# Examples

```rust
use multichain_mcmc::proposals::{Normal, Proposal};
use ndarray::arr2;

// Unit variance by default.
let step: Normal<f64> = Normal::new(["x"]).unwrap();
assert_eq!(step.parameters(), &["x".to_string()]);

// Dimension mismatch is caught eagerly.
let cov = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
assert!(Normal::<f64>::with_cov(["x"], cov).is_err());
```
*/
#[derive(Debug, Clone)]
pub struct Normal<T> {
    parameters: Vec<String>,
    cov: Array2<T>,
    chol: Array2<T>,
    log_norm: T,
    stream: RandomStream,
}

impl<T> Normal<T>
where
    T: Float + std::fmt::Debug,
{
    /// Creates a unit-variance Gaussian step over `parameters`.
    pub fn new<I, S>(parameters: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parameters: Vec<String> = parameters.into_iter().map(Into::into).collect();
        let cov = Array2::from_diag_elem(parameters.len(), T::one());
        Self::build(parameters, cov)
    }

    /// Creates a Gaussian step with the given covariance matrix.
    ///
    /// The matrix must be `d x d` for `d` governed parameters and positive
    /// definite.
    pub fn with_cov<I, S>(parameters: I, cov: Array2<T>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parameters: Vec<String> = parameters.into_iter().map(Into::into).collect();
        Self::build(parameters, cov)
    }

    fn build(parameters: Vec<String>, cov: Array2<T>) -> Result<Self> {
        let ndim = parameters.len();
        if ndim == 0 {
            return Err(Error::Configuration(
                "a proposal must govern at least one parameter".to_string(),
            ));
        }
        if cov.nrows() != ndim || cov.ncols() != ndim {
            return Err(Error::Configuration(format!(
                "dimension of covariance matrix ({}x{}) does not match given number \
                 of parameters ({ndim})",
                cov.nrows(),
                cov.ncols(),
            )));
        }
        let chol = cholesky(&cov)?;
        // log-normalization: -d/2 ln(2 pi) - 1/2 ln det(cov), with
        // ln det(cov) = 2 sum_i ln L_ii.
        let two_pi = T::from(2.0 * std::f64::consts::PI).unwrap();
        let half = T::from(0.5).unwrap();
        let mut log_det = T::zero();
        for ii in 0..ndim {
            log_det = log_det + chol[(ii, ii)].ln();
        }
        log_det = log_det + log_det;
        let log_norm = -half * (T::from(ndim).unwrap() * two_pi.ln() + log_det);
        let seed = rand::thread_rng().gen::<u64>();
        Ok(Self {
            parameters,
            cov,
            chol,
            log_norm,
            stream: RandomStream::derive(seed, 0),
        })
    }

    /// The covariance matrix of the step.
    pub fn cov(&self) -> &Array2<T> {
        &self.cov
    }
}

impl<T> Proposal<T> for Normal<T>
where
    T: Float + std::fmt::Debug + Send + 'static,
    StandardNormal: Distribution<T>,
{
    fn parameters(&self) -> &[String] {
        &self.parameters
    }

    fn symmetric(&self) -> bool {
        true
    }

    fn jump(&mut self, from: &[T]) -> Vec<T> {
        let ndim = self.parameters.len();
        let z: Vec<T> = (0..ndim)
            .map(|_| StandardNormal.sample(&mut self.stream))
            .collect();
        (0..ndim)
            .map(|ii| {
                let mut dx = T::zero();
                for kk in 0..=ii {
                    dx = dx + self.chol[(ii, kk)] * z[kk];
                }
                from[ii] + dx
            })
            .collect()
    }

    fn logpdf(&self, to: &[T], from: &[T]) -> T {
        let ndim = self.parameters.len();
        // Solve L y = (to - from) by forward substitution; the quadratic
        // form is then y . y.
        let mut y = vec![T::zero(); ndim];
        for ii in 0..ndim {
            let mut sum = to[ii] - from[ii];
            for kk in 0..ii {
                sum = sum - self.chol[(ii, kk)] * y[kk];
            }
            y[ii] = sum / self.chol[(ii, ii)];
        }
        let mut quad = T::zero();
        for &v in &y {
            quad = quad + v * v;
        }
        self.log_norm - T::from(0.5).unwrap() * quad
    }

    fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    fn set_stream_state(&mut self, state: &StreamState) {
        self.stream.set_state(state);
    }

    fn reseed(&mut self, seed: u64, stream: u64) {
        self.stream = RandomStream::derive(seed, stream);
    }

    fn boxed_clone(&self) -> Box<dyn Proposal<T>> {
        Box::new(self.clone())
    }
}

/// Lower-triangular Cholesky factor of a positive-definite matrix.
fn cholesky<T: Float>(matrix: &Array2<T>) -> Result<Array2<T>> {
    let n = matrix.nrows();
    let mut lower = Array2::from_diag_elem(n, T::zero());
    for ii in 0..n {
        for jj in 0..=ii {
            let mut sum = matrix[(ii, jj)];
            for kk in 0..jj {
                sum = sum - lower[(ii, kk)] * lower[(jj, kk)];
            }
            if ii == jj {
                if sum <= T::zero() {
                    return Err(Error::Configuration(
                        "covariance matrix is not positive definite".to_string(),
                    ));
                }
                lower[(ii, jj)] = sum.sqrt();
            } else {
                lower[(ii, jj)] = sum / lower[(jj, jj)];
            }
        }
    }
    Ok(lower)
}
