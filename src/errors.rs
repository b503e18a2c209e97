//! Error types for the sampling engine.

use thiserror::Error;

/// General error class for everything that can go wrong while building or
/// running a sampler.
///
/// Configuration problems are raised eagerly at construction time, before any
/// chain executes. State errors cover operations that require a start
/// position (e.g. [`run`](crate::sampler::Sampler::run)) being invoked before
/// `set_start`. Model errors wrap whatever the user's model returned and are
/// propagated unmodified; they abort the in-flight run but leave the history
/// of already-completed steps intact.
///
/// A model returning `-inf` is *not* an error: the acceptance rule turns it
/// into a guaranteed rejection.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid constructor arguments (zero chains, overlapping proposals,
    /// covariance dimension mismatch, ...).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An operation was invoked in the wrong lifecycle phase.
    #[error("invalid state: {0}")]
    State(String),

    /// The user's model failed to evaluate.
    #[error("model evaluation failed: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary model failure in [`Error::Model`].
    pub fn model<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Model(err.into())
    }
}

/// Result alias which wraps [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
