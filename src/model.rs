/*!
The contract for the user-supplied posterior model.

The engine only ever asks a model one question: "what is the log-posterior at
this position?". Models may attach an arbitrary auxiliary payload (a "blob")
to every evaluation; blobs ride along with the accepted/rejected position and
end up in the chain history.

Models are shared immutably across chains, so they must be `Send + Sync`.
A model returning `-inf` (or being handed a NaN/inf candidate and returning
`-inf` for it) is a valid outcome that forces rejection; returning an error
aborts the in-flight run.
*/

use num_traits::Float;

use crate::errors::Result;

/// The result of evaluating a model at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<T, B> {
    /// The (unnormalized) log-posterior at the evaluated position.
    pub log_posterior: T,
    /// Optional auxiliary payload. A model either always or never returns
    /// one; presence is decided by the evaluation of the start position.
    pub blob: Option<B>,
}

impl<T, B> Evaluation<T, B> {
    /// An evaluation carrying only a log-posterior.
    pub fn new(log_posterior: T) -> Self {
        Self {
            log_posterior,
            blob: None,
        }
    }

    /// An evaluation carrying a log-posterior and a blob.
    pub fn with_blob(log_posterior: T, blob: B) -> Self {
        Self {
            log_posterior,
            blob: Some(blob),
        }
    }
}

/// A target posterior density, evaluated at positions laid out in
/// [`ParamSet`](crate::params::ParamSet) order.
pub trait Model<T: Float>: Send + Sync {
    /// The auxiliary payload type. Use `()` for models without blobs.
    type Blob: Clone + Send + 'static;

    /// Evaluates the log-posterior (and optional blob) at `position`.
    fn evaluate(&self, position: &[T]) -> Result<Evaluation<T, Self::Blob>>;
}

/// Adapts a plain `Fn(&[T]) -> T` log-density into a blobless [`Model`].
///
/// # Examples
///
/// ```rust
/// use multichain_mcmc::model::{LogDensityFn, Model};
///
/// let model = LogDensityFn::new(|x: &[f64]| -0.5 * x[0] * x[0]);
/// let eval = model.evaluate(&[2.0]).unwrap();
/// assert_eq!(eval.log_posterior, -2.0);
/// assert!(eval.blob.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct LogDensityFn<F>(F);

impl<F> LogDensityFn<F> {
    /// Wraps `f` as a model.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> Model<T> for LogDensityFn<F>
where
    T: Float,
    F: Fn(&[T]) -> T + Send + Sync,
{
    type Blob = ();

    fn evaluate(&self, position: &[T]) -> Result<Evaluation<T, ()>> {
        Ok(Evaluation::new((self.0)(position)))
    }
}
