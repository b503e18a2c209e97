/*!
Pluggable chain evolution.

The sampler never advances chains itself: it hands them to an [`Executor`],
which evolves every chain by the requested number of steps. Chains are fully
self-contained (no shared mutable state), so the parallel executor can farm
them out to rayon workers without synchronization; each worker exclusively
owns its chain for the duration of the batch. Because every chain draws from
its own `(seed, stream)` random streams, scheduling order has no effect on
the result: a serial and a parallel run with the same seed produce
bit-identical histories.

A model error from any chain aborts the batch with that error. Chains that
already completed steps keep them; there is no rollback and no retry.
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use num_traits::Float;
use rayon::prelude::*;

use crate::chain::Chain;
use crate::errors::Result;
use crate::model::Model;

/// Evolves a set of independent chains by a fixed number of steps.
pub trait Executor<T, M>: Send + Sync
where
    T: Float,
    M: Model<T>,
{
    /// Advances every chain in `chains` by `niterations` steps.
    fn evolve(&self, chains: &mut [Chain<T, M>], niterations: u64) -> Result<()>;
}

/// Single-threaded, in-order chain evolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl<T, M> Executor<T, M> for SerialExecutor
where
    T: Float,
    M: Model<T>,
    rand_distr::Standard: rand_distr::Distribution<T>,
{
    fn evolve(&self, chains: &mut [Chain<T, M>], niterations: u64) -> Result<()> {
        for chain in chains.iter_mut() {
            for _ in 0..niterations {
                chain.step()?;
            }
        }
        Ok(())
    }
}

/// Rayon-pooled chain evolution, optionally with per-chain progress bars.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonExecutor {
    progress: bool,
}

impl RayonExecutor {
    /// A pooled executor without progress reporting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables one progress bar per chain.
    pub fn with_progress(mut self) -> Self {
        self.progress = true;
        self
    }
}

impl<T, M> Executor<T, M> for RayonExecutor
where
    T: Float + Send + Sync,
    M: Model<T>,
    rand_distr::Standard: rand_distr::Distribution<T>,
{
    fn evolve(&self, chains: &mut [Chain<T, M>], niterations: u64) -> Result<()> {
        let multi = if self.progress {
            Some(MultiProgress::new())
        } else {
            None
        };
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-");

        let results: Vec<Result<()>> = chains
            .par_iter_mut()
            .enumerate()
            .map(|(ii, chain)| {
                let pb = multi.as_ref().map(|m| {
                    let pb = m.add(ProgressBar::new(niterations));
                    pb.set_prefix(format!("Chain {ii}"));
                    pb.set_style(style.clone());
                    pb
                });
                for _ in 0..niterations {
                    chain.step()?;
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                }
                if let Some(pb) = &pb {
                    pb.finish_with_message("Done!");
                }
                Ok(())
            })
            .collect();
        results.into_iter().collect()
    }
}
