/*!
# The multi-chain sampler

A [`Sampler`] owns `nchains` independent Metropolis-Hastings chains over a
named parameter space. Each chain gets its own random stream derived from the
one global seed (chain `i` uses stream index `i`) and its own deep copy of
every proposal, each copy bound to a further distinct stream — see
[`stream`](crate::stream) for the derivation scheme. Given a fixed seed, a
run is bit-reproducible, and the serial and rayon executors produce identical
histories.

## Example usage

```rust
use std::collections::HashMap;
use multichain_mcmc::model::LogDensityFn;
use multichain_mcmc::sampler::Sampler;

// Sample a standard 2D Gaussian with 4 chains and the default unit-variance
// Normal proposal over all parameters.
let model = LogDensityFn::new(|x: &[f64]| -0.5 * (x[0] * x[0] + x[1] * x[1]));
let mut sampler = Sampler::new(["x", "y"], model, 4, Vec::new(), Some(42)).unwrap();

let mut start = HashMap::new();
start.insert("x".to_string(), vec![0.0; 4]);
start.insert("y".to_string(), vec![0.0; 4]);
sampler.set_start(&start).unwrap();

sampler.run(100).unwrap();
assert_eq!(sampler.positions().unwrap().shape(), &[4, 100, 2]);
```
*/

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};
use num_traits::Float;
use rand::Rng;

use crate::chain::{Chain, ChainState};
use crate::errors::{Error, Result};
use crate::executor::{Executor, SerialExecutor};
use crate::model::Model;
use crate::params::ParamSet;
use crate::proposals::{Normal, Proposal};
use crate::stream::{proposal_stream_index, RandomStream};

/**
The multi-chain Metropolis-Hastings orchestrator.

Construction validates the whole configuration eagerly: `nchains >= 1`, the
supplied proposals must govern pairwise-disjoint subsets of the sampled
parameters, and any parameter left unassigned is given to one default
proposal (a unit-variance [`Normal`] unless
[`with_default_proposal`](Sampler::with_default_proposal) is used). No chain
executes before all of that has been checked.

Chains advance through an injected [`Executor`]; the default is the
single-threaded [`SerialExecutor`], and
[`with_executor`](Sampler::with_executor) swaps in the rayon one (or anything
else implementing the trait).
*/
pub struct Sampler<T: Float, M: Model<T>> {
    params: Arc<ParamSet>,
    model: Arc<M>,
    seed: u64,
    chains: Vec<Chain<T, M>>,
    executor: Box<dyn Executor<T, M>>,
}

impl<T, M> Sampler<T, M>
where
    T: Float + std::fmt::Debug + Send + Sync + 'static,
    M: Model<T> + 'static,
    rand_distr::Standard: rand_distr::Distribution<T>,
    rand_distr::StandardNormal: rand_distr::Distribution<T>,
{
    /// Constructs a sampler with `nchains` independent chains.
    ///
    /// `proposals` may cover any disjoint subsets of `parameters`; whatever
    /// is left over is governed by one default unit-variance [`Normal`]
    /// proposal. Passing `None` for `seed` generates a fresh seed from
    /// entropy.
    pub fn new<I, S>(
        parameters: I,
        model: M,
        nchains: usize,
        proposals: Vec<Box<dyn Proposal<T>>>,
        seed: Option<u64>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_default_proposal(parameters, model, nchains, proposals, seed, |missing| {
            Ok(Box::new(Normal::new(missing)?))
        })
    }

    /// Like [`new`](Self::new), but parameters not covered by `proposals`
    /// are handed to `default_proposal` instead of a unit-variance
    /// [`Normal`].
    pub fn with_default_proposal<I, S, F>(
        parameters: I,
        model: M,
        nchains: usize,
        mut proposals: Vec<Box<dyn Proposal<T>>>,
        seed: Option<u64>,
        default_proposal: F,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Vec<String>) -> Result<Box<dyn Proposal<T>>>,
    {
        let params = Arc::new(ParamSet::new(parameters)?);
        if nchains < 1 {
            return Err(Error::Configuration("nchains must be >= 1".to_string()));
        }
        // Check the supplied proposals against the parameter list and find
        // what is left for the default proposal.
        let mut covered = vec![false; params.len()];
        for proposal in &proposals {
            for index in params.resolve(proposal.parameters())? {
                if covered[index] {
                    return Err(Error::Configuration(format!(
                        "parameter {:?} is governed by more than one proposal",
                        params.names()[index]
                    )));
                }
                covered[index] = true;
            }
        }
        let missing: Vec<String> = params
            .names()
            .iter()
            .zip(&covered)
            .filter(|(_, &c)| !c)
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() {
            let proposal = default_proposal(missing.clone())?;
            if proposal.parameters() != missing.as_slice() {
                return Err(Error::Configuration(
                    "default proposal does not govern exactly the unassigned parameters"
                        .to_string(),
                ));
            }
            proposals.push(proposal);
        }

        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        let model = Arc::new(model);
        let chains = (0..nchains)
            .map(|cid| {
                // Deep-copy the proposal set and bind every copy to its own
                // stream, so proposal-internal random state never aliases
                // across chains.
                let mut copies = proposals.clone();
                for (jj, proposal) in copies.iter_mut().enumerate() {
                    proposal.reseed(seed, proposal_stream_index(nchains, cid, jj));
                }
                Chain::new(
                    params.clone(),
                    model.clone(),
                    copies,
                    RandomStream::derive(seed, cid as u64),
                    cid as u64,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            params,
            model,
            seed,
            chains,
            executor: Box::new(SerialExecutor),
        })
    }

    /// Replaces the execution strategy (e.g. with
    /// [`RayonExecutor`](crate::executor::RayonExecutor)).
    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: Executor<T, M> + 'static,
    {
        self.executor = Box::new(executor);
        self
    }

    /// Sets the starting position of all of the chains.
    ///
    /// `positions` maps every sampled parameter name to `nchains` values;
    /// element `i` goes to chain `i`. Evaluates the model once per chain, so
    /// the chains' current stats default to their start positions'.
    pub fn set_start(&mut self, positions: &HashMap<String, Vec<T>>) -> Result<()> {
        for key in positions.keys() {
            if self.params.index_of(key).is_none() {
                return Err(Error::Configuration(format!(
                    "start values given for {key:?}, which is not a sampled parameter"
                )));
            }
        }
        let nchains = self.chains.len();
        let mut columns = Vec::with_capacity(self.params.len());
        for name in self.params.names() {
            let values = positions.get(name).ok_or_else(|| {
                Error::Configuration(format!("no start values given for parameter {name:?}"))
            })?;
            if values.len() != nchains {
                return Err(Error::Configuration(format!(
                    "{} start values given for parameter {name:?} but there are {nchains} chains",
                    values.len()
                )));
            }
            columns.push(values);
        }
        for (ii, chain) in self.chains.iter_mut().enumerate() {
            let position: Vec<T> = columns.iter().map(|values| values[ii]).collect();
            chain.set_start(position)?;
        }
        Ok(())
    }

    /// Evolves all of the chains by `niterations` steps.
    ///
    /// Tops up every chain's scratch capacity first, then delegates to the
    /// injected executor. A model error aborts the run; history recorded by
    /// already-completed steps is kept.
    pub fn run(&mut self, niterations: u64) -> Result<()> {
        self.require_started()?;
        for chain in &mut self.chains {
            chain.reserve(niterations as usize);
        }
        self.executor.evolve(&mut self.chains, niterations)
    }

    /// Clears the history of all of the chains.
    pub fn clear(&mut self) {
        for chain in &mut self.chains {
            chain.clear();
        }
    }

    /// The global seed chain streams were derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The sampled parameters.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// The model being sampled.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The number of chains.
    pub fn nchains(&self) -> usize {
        self.chains.len()
    }

    /// Read access to the individual chains.
    pub fn chains(&self) -> &[Chain<T, M>] {
        &self.chains
    }

    /// The number of iterations the chains have been run for.
    pub fn niterations(&self) -> u64 {
        // All chains advance in lockstep, so just use the first one.
        self.chains[0].iteration()
    }

    /// The iteration at which the last clear occurred.
    pub fn lastclear(&self) -> u64 {
        self.chains[0].lastclear()
    }

    /// The history of positions from all of the chains, stacked into a
    /// `(nchains, niterations - lastclear, nparams)` array.
    ///
    /// After an aborted run the chains may hold unequal numbers of steps;
    /// every stacked accessor then truncates to the shortest chain's
    /// history.
    pub fn positions(&self) -> Result<Array3<T>> {
        self.require_started()?;
        let len = self.common_len();
        let nparams = self.params.len();
        let mut flat = Vec::with_capacity(self.chains.len() * len * nparams);
        for chain in &self.chains {
            flat.extend_from_slice(&chain.raw_positions()[..len * nparams]);
        }
        Ok(Array3::from_shape_vec((self.chains.len(), len, nparams), flat)
            .expect("buffer holds nchains * len * nparams values"))
    }

    /// The history of log-posteriors, shape `(nchains, len)`.
    pub fn log_posteriors(&self) -> Result<Array2<T>> {
        self.stack_steps(Chain::log_posteriors)
    }

    /// The history of acceptance ratios (clipped to `[0, 1]`), shape
    /// `(nchains, len)`.
    pub fn acceptance_ratios(&self) -> Result<Array2<T>> {
        self.stack_steps(Chain::acceptance_ratios)
    }

    /// The history of accepted flags, shape `(nchains, len)`.
    pub fn accepted(&self) -> Result<Array2<bool>> {
        self.require_started()?;
        let len = self.common_len();
        let mut flat = Vec::with_capacity(self.chains.len() * len);
        for chain in &self.chains {
            flat.extend_from_slice(&chain.accepted()[..len]);
        }
        Ok(Array2::from_shape_vec((self.chains.len(), len), flat)
            .expect("buffer holds nchains * len values"))
    }

    /// The start positions of the chains, shape `(nchains, nparams)`.
    pub fn start_positions(&self) -> Result<Array2<T>> {
        let mut flat = Vec::with_capacity(self.chains.len() * self.params.len());
        for chain in &self.chains {
            flat.extend_from_slice(chain.start_position()?);
        }
        Ok(Array2::from_shape_vec((self.chains.len(), self.params.len()), flat)
            .expect("every start position has nparams values"))
    }

    /// The current position of the chains, shape `(nchains, nparams)`.
    ///
    /// Defaults to the start positions if the chains haven't been run yet.
    pub fn current_positions(&self) -> Result<Array2<T>> {
        let mut flat = Vec::with_capacity(self.chains.len() * self.params.len());
        for chain in &self.chains {
            flat.extend_from_slice(chain.current_position()?);
        }
        Ok(Array2::from_shape_vec((self.chains.len(), self.params.len()), flat)
            .expect("every position has nparams values"))
    }

    /// The current log-posterior of every chain.
    pub fn current_log_posteriors(&self) -> Result<Array1<T>> {
        let values = self
            .chains
            .iter()
            .map(Chain::current_log_posterior)
            .collect::<Result<Vec<T>>>()?;
        Ok(Array1::from_vec(values))
    }

    /// The history of blobs from all of the chains, one slice per chain.
    ///
    /// `Ok(None)` if the model does not produce blobs; a state error before
    /// `set_start`.
    pub fn blobs(&self) -> Result<Option<Vec<&[Option<M::Blob>]>>> {
        self.require_started()?;
        if !self.chains[0].hasblobs() {
            return Ok(None);
        }
        Ok(Some(self.chains.iter().map(Chain::blobs).collect()))
    }

    /// The current blob of every chain, or `Ok(None)` for blobless models.
    pub fn current_blobs(&self) -> Result<Option<Vec<&M::Blob>>> {
        self.require_started()?;
        if !self.chains[0].hasblobs() {
            return Ok(None);
        }
        let mut blobs = Vec::with_capacity(self.chains.len());
        for chain in &self.chains {
            match chain.current_blob()? {
                Some(blob) => blobs.push(blob),
                None => return Ok(None),
            }
        }
        Ok(Some(blobs))
    }

    /// Snapshots every chain, indexed by chain id.
    pub fn state(&self) -> Result<Vec<ChainState<T, M::Blob>>> {
        self.chains.iter().map(Chain::state).collect()
    }

    /// Restores every chain from the snapshots produced by
    /// [`state`](Self::state).
    pub fn set_state(&mut self, states: &[ChainState<T, M::Blob>]) -> Result<()> {
        if states.len() != self.chains.len() {
            return Err(Error::Configuration(format!(
                "{} chain snapshots given but the sampler has {} chains",
                states.len(),
                self.chains.len()
            )));
        }
        for (chain, state) in self.chains.iter_mut().zip(states) {
            if state.chain_id != chain.chain_id() {
                return Err(Error::Configuration(format!(
                    "snapshot for chain {} given at index {}",
                    state.chain_id,
                    chain.chain_id()
                )));
            }
            chain.set_state(state)?;
        }
        Ok(())
    }

    fn require_started(&self) -> Result<()> {
        if self.chains.iter().all(Chain::started) {
            Ok(())
        } else {
            Err(Error::State(
                "set_start must be called before running or reading the sampler".to_string(),
            ))
        }
    }

    /// The number of steps held by every chain: the shortest chain's
    /// history length. The chains only diverge when a run aborts partway.
    fn common_len(&self) -> usize {
        self.chains.iter().map(Chain::len).min().unwrap_or(0)
    }

    fn stack_steps(&self, getter: impl Fn(&Chain<T, M>) -> &[T]) -> Result<Array2<T>> {
        self.require_started()?;
        let len = self.common_len();
        let mut flat = Vec::with_capacity(self.chains.len() * len);
        for chain in &self.chains {
            flat.extend_from_slice(&getter(chain)[..len]);
        }
        Ok(Array2::from_shape_vec((self.chains.len(), len), flat)
            .expect("buffer holds nchains * len values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Evaluation, LogDensityFn};

    fn gaussian_model() -> LogDensityFn<fn(&[f64]) -> f64> {
        fn logp(x: &[f64]) -> f64 {
            -0.5 * (x[0] * x[0] + x[1] * x[1])
        }
        LogDensityFn::new(logp as fn(&[f64]) -> f64)
    }

    fn start_for(nchains: usize) -> HashMap<String, Vec<f64>> {
        let mut start = HashMap::new();
        start.insert("x".to_string(), vec![0.0; nchains]);
        start.insert("y".to_string(), vec![0.0; nchains]);
        start
    }

    #[test]
    fn zero_chains_is_a_configuration_error() {
        let result = Sampler::new(["x", "y"], gaussian_model(), 0, Vec::new(), Some(1));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn unknown_proposal_parameter_is_a_configuration_error() {
        let proposal: Box<dyn Proposal<f64>> = Box::new(Normal::new(["z"]).unwrap());
        let result = Sampler::new(["x", "y"], gaussian_model(), 2, vec![proposal], Some(1));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn overlapping_proposals_are_a_configuration_error() {
        let a: Box<dyn Proposal<f64>> = Box::new(Normal::new(["x", "y"]).unwrap());
        let b: Box<dyn Proposal<f64>> = Box::new(Normal::new(["y"]).unwrap());
        let result = Sampler::new(["x", "y"], gaussian_model(), 2, vec![a, b], Some(1));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn run_before_set_start_is_a_state_error() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 2, Vec::new(), Some(1)).unwrap();
        assert!(matches!(sampler.run(10), Err(Error::State(_))));
        assert!(matches!(sampler.positions(), Err(Error::State(_))));
    }

    #[test]
    fn set_start_validates_names_and_lengths() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 2, Vec::new(), Some(1)).unwrap();

        let mut missing = HashMap::new();
        missing.insert("x".to_string(), vec![0.0, 0.0]);
        assert!(sampler.set_start(&missing).is_err());

        let mut extra = start_for(2);
        extra.insert("z".to_string(), vec![0.0, 0.0]);
        assert!(sampler.set_start(&extra).is_err());

        let mut short = start_for(2);
        short.insert("y".to_string(), vec![0.0]);
        assert!(sampler.set_start(&short).is_err());
    }

    #[test]
    fn fixed_seed_runs_are_bit_identical() {
        let run = || {
            let mut sampler =
                Sampler::new(["x", "y"], gaussian_model(), 3, Vec::new(), Some(42)).unwrap();
            sampler.set_start(&start_for(3)).unwrap();
            sampler.run(200).unwrap();
            (
                sampler.positions().unwrap(),
                sampler.log_posteriors().unwrap(),
                sampler.acceptance_ratios().unwrap(),
            )
        };
        let (p1, l1, a1) = run();
        let (p2, l2, a2) = run();
        assert_eq!(p1, p2);
        assert_eq!(l1, l2);
        assert_eq!(a1, a2);
    }

    #[test]
    fn history_shapes_follow_the_run() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 4, Vec::new(), Some(7)).unwrap();
        sampler.set_start(&start_for(4)).unwrap();
        sampler.run(50).unwrap();
        assert_eq!(sampler.positions().unwrap().shape(), &[4, 50, 2]);
        assert_eq!(sampler.log_posteriors().unwrap().shape(), &[4, 50]);
        assert_eq!(sampler.acceptance_ratios().unwrap().shape(), &[4, 50]);
        assert_eq!(sampler.accepted().unwrap().shape(), &[4, 50]);
        assert_eq!(sampler.current_positions().unwrap().shape(), &[4, 2]);
        assert_eq!(sampler.start_positions().unwrap().shape(), &[4, 2]);
        assert_eq!(sampler.niterations(), 50);
        assert_eq!(sampler.current_log_posteriors().unwrap().len(), 4);
    }

    #[test]
    fn clear_resets_history_but_not_progress() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 2, Vec::new(), Some(5)).unwrap();
        sampler.set_start(&start_for(2)).unwrap();
        sampler.run(30).unwrap();
        sampler.clear();
        assert_eq!(sampler.lastclear(), 30);
        assert_eq!(sampler.positions().unwrap().shape(), &[2, 0, 2]);
        sampler.run(20).unwrap();
        assert_eq!(sampler.niterations(), 50);
        assert_eq!(sampler.positions().unwrap().shape(), &[2, 20, 2]);
    }

    #[test]
    fn blobs_are_absent_for_blobless_models() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 2, Vec::new(), Some(5)).unwrap();
        assert!(matches!(sampler.blobs(), Err(Error::State(_))));
        assert!(matches!(sampler.current_blobs(), Err(Error::State(_))));
        sampler.set_start(&start_for(2)).unwrap();
        sampler.run(5).unwrap();
        assert!(sampler.blobs().unwrap().is_none());
        assert!(sampler.current_blobs().unwrap().is_none());
    }

    struct BlobModel;

    impl Model<f64> for BlobModel {
        type Blob = f64;

        fn evaluate(&self, position: &[f64]) -> crate::errors::Result<Evaluation<f64, f64>> {
            let logp = -0.5 * position.iter().map(|x| x * x).sum::<f64>();
            Ok(Evaluation::with_blob(logp, position[0] + position[1]))
        }
    }

    #[test]
    fn blobs_are_stacked_per_chain() {
        let mut sampler = Sampler::new(["x", "y"], BlobModel, 2, Vec::new(), Some(5)).unwrap();
        sampler.set_start(&start_for(2)).unwrap();
        sampler.run(12).unwrap();
        let blobs = sampler.blobs().unwrap().unwrap();
        assert_eq!(blobs.len(), 2);
        assert!(blobs.iter().all(|chain| chain.len() == 12));
        assert_eq!(sampler.current_blobs().unwrap().unwrap().len(), 2);
    }

    /// A model with a fixed evaluation budget; the call past the budget
    /// fails.
    struct FailsAfter {
        limit: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FailsAfter {
        fn new(limit: usize) -> Self {
            Self {
                limit,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl Model<f64> for FailsAfter {
        type Blob = ();

        fn evaluate(&self, position: &[f64]) -> crate::errors::Result<Evaluation<f64, ()>> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n >= self.limit {
                return Err(Error::model("evaluation budget exhausted"));
            }
            Ok(Evaluation::new(-0.5 * position.iter().map(|x| x * x).sum::<f64>()))
        }
    }

    #[test]
    fn aborted_run_keeps_completed_steps_readable() {
        // 2 start evaluations, then chain 0 completes all 50 steps and
        // chain 1 fails on its 9th, leaving the chains at unequal lengths.
        let mut sampler =
            Sampler::new(["x", "y"], FailsAfter::new(60), 2, Vec::new(), Some(13)).unwrap();
        sampler.set_start(&start_for(2)).unwrap();
        assert!(matches!(sampler.run(50), Err(Error::Model(_))));
        assert_eq!(sampler.chains()[0].len(), 50);
        assert_eq!(sampler.chains()[1].len(), 8);

        // Stacked accessors truncate to the shortest chain instead of
        // failing.
        assert_eq!(sampler.positions().unwrap().shape(), &[2, 8, 2]);
        assert_eq!(sampler.log_posteriors().unwrap().shape(), &[2, 8]);
        assert_eq!(sampler.acceptance_ratios().unwrap().shape(), &[2, 8]);
        assert_eq!(sampler.accepted().unwrap().shape(), &[2, 8]);
        // The per-chain accessors still expose the full histories.
        assert_eq!(sampler.chains()[0].positions().shape(), &[50, 2]);
    }

    #[test]
    fn state_roundtrip_reproduces_the_continuation() {
        let mut sampler =
            Sampler::new(["x", "y"], gaussian_model(), 3, Vec::new(), Some(21)).unwrap();
        sampler.set_start(&start_for(3)).unwrap();
        sampler.run(40).unwrap();
        let snapshots = sampler.state().unwrap();
        sampler.run(25).unwrap();
        let reference = sampler.positions().unwrap();

        let mut restored =
            Sampler::new(["x", "y"], gaussian_model(), 3, Vec::new(), Some(21)).unwrap();
        restored.set_state(&snapshots).unwrap();
        assert_eq!(restored.niterations(), 40);
        restored.run(25).unwrap();
        let replay = restored.positions().unwrap();
        // The restored window holds exactly the post-snapshot steps.
        assert_eq!(replay.shape(), &[3, 25, 2]);
        for cc in 0..3 {
            for tt in 0..25 {
                for pp in 0..2 {
                    assert_eq!(replay[(cc, tt, pp)], reference[(cc, 40 + tt, pp)]);
                }
            }
        }
    }

    #[test]
    fn custom_default_proposal_covers_the_leftovers() {
        let supplied: Box<dyn Proposal<f64>> = Box::new(Normal::new(["x"]).unwrap());
        let mut sampler = Sampler::with_default_proposal(
            ["x", "y"],
            gaussian_model(),
            2,
            vec![supplied],
            Some(3),
            |missing| {
                assert_eq!(missing, vec!["y".to_string()]);
                Ok(Box::new(Normal::new(missing)?))
            },
        )
        .unwrap();
        sampler.set_start(&start_for(2)).unwrap();
        sampler.run(10).unwrap();
        assert_eq!(sampler.positions().unwrap().shape(), &[2, 10, 2]);
    }
}
