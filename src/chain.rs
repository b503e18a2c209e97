/*!
# The Metropolis-Hastings chain

A [`Chain`] owns everything one Markov chain needs: its copy of the proposal
set, a private [`RandomStream`] for the accept/reject uniforms, the current
position, and the growable history buffer. Chains never share mutable state,
which is what lets the orchestrator evolve them on worker threads without
synchronization.

The lifecycle is: construct, [`set_start`](Chain::set_start) (which evaluates
the model once so the current stats default to the start position's), then
any number of [`step`](Chain::step) calls. [`clear`](Chain::clear) truncates
history without touching the current position or any random stream, and
[`state`](Chain::state) / [`set_state`](Chain::set_state) snapshot and
restore the whole chain for exact resumption.
*/

use std::sync::Arc;

use ndarray::ArrayView2;
use num_traits::Float;
use rand::Rng;

use crate::errors::{Error, Result};
use crate::history::History;
use crate::model::Model;
use crate::params::ParamSet;
use crate::proposals::Proposal;
use crate::stream::{RandomStream, StreamState};

/// The position the chain currently sits at, with the stats and blob of the
/// model evaluation that produced it.
#[derive(Debug, Clone, PartialEq)]
struct Point<T, B> {
    position: Vec<T>,
    log_posterior: T,
    blob: Option<B>,
}

/// A serializable snapshot of one chain, sufficient for exact resumption.
///
/// Restoring a snapshot behaves like [`Chain::clear`] at the recorded
/// iteration: the restored chain resumes with an empty history window, the
/// recorded current point, and every random stream positioned exactly where
/// it was. `lastclear` records where the snapshot's own history window
/// began.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState<T, B> {
    /// Which chain this snapshot belongs to.
    pub chain_id: u64,
    /// The iteration the chain had reached.
    pub iteration: u64,
    /// Where the snapshot's history window began.
    pub lastclear: u64,
    /// The allocated history capacity, in steps.
    pub scratchlen: usize,
    /// The current position.
    pub position: Vec<T>,
    /// The log-posterior at the current position.
    pub log_posterior: T,
    /// The blob at the current position, if the model produces blobs.
    pub blob: Option<B>,
    /// The chain's own (acceptance-uniform) stream.
    pub stream: StreamState,
    /// One stream token per proposal, in proposal order.
    pub proposal_streams: Vec<StreamState>,
}

/// A single Metropolis-Hastings Markov chain.
pub struct Chain<T: Float, M: Model<T>> {
    params: Arc<ParamSet>,
    model: Arc<M>,
    proposals: Vec<Box<dyn Proposal<T>>>,
    /// Position indices governed by each proposal, parallel to `proposals`.
    governed: Vec<Vec<usize>>,
    chain_id: u64,
    stream: RandomStream,
    iteration: u64,
    lastclear: u64,
    start_position: Option<Vec<T>>,
    current: Option<Point<T, M::Blob>>,
    history: History<T, M::Blob>,
}

impl<T, M> Chain<T, M>
where
    T: Float,
    M: Model<T>,
    rand_distr::Standard: rand_distr::Distribution<T>,
{
    /// Creates a chain from its proposal set and private stream.
    ///
    /// The proposals must partition the sampled parameters: every parameter
    /// governed by exactly one proposal. An unmapped or doubly-mapped
    /// parameter is a configuration error.
    pub fn new(
        params: Arc<ParamSet>,
        model: Arc<M>,
        proposals: Vec<Box<dyn Proposal<T>>>,
        stream: RandomStream,
        chain_id: u64,
    ) -> Result<Self> {
        let mut covered = vec![false; params.len()];
        let mut governed = Vec::with_capacity(proposals.len());
        for proposal in &proposals {
            let indices = params.resolve(proposal.parameters())?;
            for &ii in &indices {
                if covered[ii] {
                    return Err(Error::Configuration(format!(
                        "parameter {:?} is governed by more than one proposal",
                        params.names()[ii]
                    )));
                }
                covered[ii] = true;
            }
            governed.push(indices);
        }
        if let Some(ii) = covered.iter().position(|&c| !c) {
            return Err(Error::Configuration(format!(
                "parameter {:?} is not governed by any proposal",
                params.names()[ii]
            )));
        }
        let nparams = params.len();
        Ok(Self {
            params,
            model,
            proposals,
            governed,
            chain_id,
            stream,
            iteration: 0,
            lastclear: 0,
            start_position: None,
            current: None,
            history: History::new(nparams),
        })
    }

    /// Sets the start position and evaluates the model there, so that the
    /// current stats and blob default to the start position's.
    pub fn set_start(&mut self, position: Vec<T>) -> Result<()> {
        if position.len() != self.params.len() {
            return Err(Error::Configuration(format!(
                "start position has {} values but {} parameters are sampled",
                position.len(),
                self.params.len()
            )));
        }
        let eval = self.model.evaluate(&position)?;
        self.start_position = Some(position.clone());
        self.current = Some(Point {
            position,
            log_posterior: eval.log_posterior,
            blob: eval.blob,
        });
        Ok(())
    }

    /// Whether a start position has been set.
    pub fn started(&self) -> bool {
        self.current.is_some()
    }

    /**
    Performs one Metropolis-Hastings update.

    Every proposal draws a candidate for its governed parameters; the
    merged candidate is handed to the model unfiltered (a NaN/inf position
    is the model's to judge, typically by returning `-inf`). The
    log-acceptance-ratio is

    ```text
    log a = [logp(candidate) - logp(current)]
          + sum over non-symmetric proposals of
            [log q(current | candidate) - log q(candidate | current)]
    ```

    One uniform `u` is drawn from the chain's own stream every step
    (whether or not the ratio already guarantees acceptance, so the stream
    position stays a pure function of the iteration count), and the
    candidate is accepted iff `log a >= 0` or `ln(u) <= log a`. On
    rejection the previous position, stats and blob are repeated. Either
    way one history row is appended and the iteration counter advances.

    A model error propagates unmodified; the iteration count, history, and
    current point are left as they were before the call. The proposal
    streams have already advanced by then, so retrying the step draws a
    fresh candidate.
    */
    pub fn step(&mut self) -> Result<()> {
        let (current_position, current_logp) = match &self.current {
            Some(point) => (point.position.clone(), point.log_posterior),
            None => {
                return Err(Error::State(
                    "set_start must be called before stepping a chain".to_string(),
                ))
            }
        };

        let mut candidate = current_position.clone();
        let mut correction = T::zero();
        for (proposal, governed) in self.proposals.iter_mut().zip(&self.governed) {
            let from: Vec<T> = governed.iter().map(|&ii| current_position[ii]).collect();
            let to = proposal.jump(&from);
            for (&ii, &value) in governed.iter().zip(&to) {
                candidate[ii] = value;
            }
            if !proposal.symmetric() {
                correction =
                    correction + proposal.logpdf(&from, &to) - proposal.logpdf(&to, &from);
            }
        }

        let eval = self.model.evaluate(&candidate)?;
        let log_ratio = eval.log_posterior - current_logp + correction;
        let u: T = self.stream.gen();
        let accepted = log_ratio >= T::zero() || u.ln() <= log_ratio;
        if accepted {
            self.current = Some(Point {
                position: candidate,
                log_posterior: eval.log_posterior,
                blob: eval.blob,
            });
        }
        let ratio = if log_ratio >= T::zero() {
            T::one()
        } else {
            log_ratio.exp()
        };
        if let Some(point) = &self.current {
            self.history.push(
                &point.position,
                point.log_posterior,
                ratio,
                accepted,
                point.blob.clone(),
            );
        }
        self.iteration += 1;
        Ok(())
    }

    /// Discards stored history and marks this iteration as the clear point.
    ///
    /// The current position and every random stream are untouched, so
    /// subsequent steps continue seamlessly.
    pub fn clear(&mut self) {
        self.history.clear();
        self.lastclear = self.iteration;
    }

    /// Ensures history capacity for `additional` more steps.
    pub fn reserve(&mut self, additional: usize) {
        self.history.reserve(additional);
    }

    /// Snapshots the chain as one atomic unit.
    ///
    /// Fails with a state error before `set_start`.
    pub fn state(&self) -> Result<ChainState<T, M::Blob>> {
        let point = self.current.as_ref().ok_or_else(|| {
            Error::State("cannot snapshot a chain before set_start".to_string())
        })?;
        Ok(ChainState {
            chain_id: self.chain_id,
            iteration: self.iteration,
            lastclear: self.lastclear,
            scratchlen: self.history.scratchlen(),
            position: point.position.clone(),
            log_posterior: point.log_posterior,
            blob: point.blob.clone(),
            stream: self.stream.state(),
            proposal_streams: self.proposals.iter().map(|p| p.stream_state()).collect(),
        })
    }

    /// Restores the chain from a snapshot.
    ///
    /// The chain resumes at the snapshot's iteration with an empty history
    /// window (as if [`clear`](Self::clear) had just run) and every random
    /// stream positioned exactly where it was; stepping from here
    /// reproduces the original continuation bit for bit.
    pub fn set_state(&mut self, state: &ChainState<T, M::Blob>) -> Result<()> {
        if state.position.len() != self.params.len() {
            return Err(Error::Configuration(format!(
                "snapshot position has {} values but {} parameters are sampled",
                state.position.len(),
                self.params.len()
            )));
        }
        if state.proposal_streams.len() != self.proposals.len() {
            return Err(Error::Configuration(format!(
                "snapshot has {} proposal streams but the chain owns {} proposals",
                state.proposal_streams.len(),
                self.proposals.len()
            )));
        }
        self.stream.set_state(&state.stream);
        for (proposal, token) in self.proposals.iter_mut().zip(&state.proposal_streams) {
            proposal.set_stream_state(token);
        }
        self.iteration = state.iteration;
        self.lastclear = state.iteration;
        self.history.clear();
        self.history.reserve(state.scratchlen);
        if self.start_position.is_none() {
            self.start_position = Some(state.position.clone());
        }
        self.current = Some(Point {
            position: state.position.clone(),
            log_posterior: state.log_posterior,
            blob: state.blob.clone(),
        });
        Ok(())
    }

    /// This chain's identifier (also its stream index).
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The sampled parameters.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// The total number of steps taken since construction or `set_state`.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The iteration at which history was last truncated.
    pub fn lastclear(&self) -> u64 {
        self.lastclear
    }

    /// The number of steps currently held in history
    /// (`iteration - lastclear`).
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the history window is empty.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The allocated history capacity, in steps.
    pub fn scratchlen(&self) -> usize {
        self.history.scratchlen()
    }

    /// Whether the model attaches blobs to its evaluations.
    pub fn hasblobs(&self) -> bool {
        match &self.current {
            Some(point) => point.blob.is_some(),
            None => false,
        }
    }

    /// The start position, if one has been set.
    pub fn start_position(&self) -> Result<&[T]> {
        self.start_position.as_deref().ok_or_else(|| {
            Error::State("set_start has not been called on this chain".to_string())
        })
    }

    /// The current position: the last accepted point, or the start position
    /// before any step has been taken.
    pub fn current_position(&self) -> Result<&[T]> {
        self.point().map(|p| p.position.as_slice())
    }

    /// The log-posterior at the current position.
    pub fn current_log_posterior(&self) -> Result<T> {
        self.point().map(|p| p.log_posterior)
    }

    /// The blob at the current position, if the model produces blobs.
    pub fn current_blob(&self) -> Result<Option<&M::Blob>> {
        self.point().map(|p| p.blob.as_ref())
    }

    /// Recorded positions as a `(len, nparams)` view.
    pub fn positions(&self) -> ArrayView2<'_, T> {
        self.history.positions()
    }

    /// Recorded per-step log-posteriors.
    pub fn log_posteriors(&self) -> &[T] {
        self.history.log_posteriors()
    }

    /// Recorded per-step acceptance ratios, clipped to `[0, 1]`.
    pub fn acceptance_ratios(&self) -> &[T] {
        self.history.acceptance_ratios()
    }

    /// Recorded per-step accepted flags.
    pub fn accepted(&self) -> &[bool] {
        self.history.accepted()
    }

    /// Recorded per-step blobs.
    pub fn blobs(&self) -> &[Option<M::Blob>] {
        self.history.blobs()
    }

    pub(crate) fn raw_positions(&self) -> &[T] {
        self.history.raw_positions()
    }

    fn point(&self) -> Result<&Point<T, M::Blob>> {
        self.current.as_ref().ok_or_else(|| {
            Error::State("set_start has not been called on this chain".to_string())
        })
    }
}
