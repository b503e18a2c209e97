/*!
Amortized-growth storage for chain history.

A [`History`] keeps one flat buffer per recorded quantity: positions
(`len * nparams` scalars, row-major), per-step log-posteriors, clipped
acceptance ratios, accepted flags, and optional blobs. The logical length is
kept separate from the allocated capacity (`scratchlen`): the orchestrator
tops the capacity up once per `run` call, so appends inside the hot loop
never reallocate. A step that somehow outruns the reservation grows the
buffers geometrically instead of per-step.
*/

use ndarray::ArrayView2;
use num_traits::Float;

/// Growable per-chain history with explicit capacity accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct History<T, B> {
    nparams: usize,
    positions: Vec<T>,
    log_posteriors: Vec<T>,
    acceptance_ratios: Vec<T>,
    accepted: Vec<bool>,
    blobs: Vec<Option<B>>,
    scratchlen: usize,
}

impl<T: Float, B: Clone> History<T, B> {
    /// An empty history for positions of `nparams` values.
    pub fn new(nparams: usize) -> Self {
        Self {
            nparams,
            positions: Vec::new(),
            log_posteriors: Vec::new(),
            acceptance_ratios: Vec::new(),
            accepted: Vec::new(),
            blobs: Vec::new(),
            scratchlen: 0,
        }
    }

    /// The number of recorded steps.
    pub fn len(&self) -> usize {
        self.log_posteriors.len()
    }

    /// Whether any steps have been recorded.
    pub fn is_empty(&self) -> bool {
        self.log_posteriors.is_empty()
    }

    /// The allocated capacity, in steps.
    pub fn scratchlen(&self) -> usize {
        self.scratchlen
    }

    /// Ensures capacity for `additional` more steps.
    ///
    /// Tops the capacity up by exactly the shortfall
    /// (`additional - (scratchlen - len)` when positive), so repeated
    /// `reserve(n); n pushes` cycles reuse the same allocation.
    pub fn reserve(&mut self, additional: usize) {
        let target = self.len() + additional;
        if target <= self.scratchlen {
            return;
        }
        self.scratchlen = target;
        self.positions
            .reserve_exact(target * self.nparams - self.positions.len());
        self.log_posteriors
            .reserve_exact(target - self.log_posteriors.len());
        self.acceptance_ratios
            .reserve_exact(target - self.acceptance_ratios.len());
        self.accepted.reserve_exact(target - self.accepted.len());
        self.blobs.reserve_exact(target - self.blobs.len());
    }

    /// Appends one step.
    pub fn push(
        &mut self,
        position: &[T],
        log_posterior: T,
        acceptance_ratio: T,
        accepted: bool,
        blob: Option<B>,
    ) {
        debug_assert_eq!(position.len(), self.nparams);
        if self.len() == self.scratchlen {
            // Unreserved append: grow geometrically so a long unreserved
            // sequence of steps stays amortized O(1).
            let grown = (self.scratchlen * 2).max(self.len() + 1);
            self.reserve(grown - self.len());
        }
        self.positions.extend_from_slice(position);
        self.log_posteriors.push(log_posterior);
        self.acceptance_ratios.push(acceptance_ratio);
        self.accepted.push(accepted);
        self.blobs.push(blob);
    }

    /// Discards all recorded steps. Capacity is retained.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.log_posteriors.clear();
        self.acceptance_ratios.clear();
        self.accepted.clear();
        self.blobs.clear();
    }

    /// The `i`-th recorded position.
    pub fn position(&self, i: usize) -> &[T] {
        &self.positions[i * self.nparams..(i + 1) * self.nparams]
    }

    /// All recorded positions as a `(len, nparams)` view.
    pub fn positions(&self) -> ArrayView2<'_, T> {
        ArrayView2::from_shape((self.len(), self.nparams), &self.positions)
            .expect("history position buffer always holds len * nparams values")
    }

    /// The flat position buffer, row-major.
    pub(crate) fn raw_positions(&self) -> &[T] {
        &self.positions
    }

    /// Per-step log-posteriors.
    pub fn log_posteriors(&self) -> &[T] {
        &self.log_posteriors
    }

    /// Per-step acceptance ratios, clipped to `[0, 1]`.
    pub fn acceptance_ratios(&self) -> &[T] {
        &self.acceptance_ratios
    }

    /// Per-step accepted flags.
    pub fn accepted(&self) -> &[bool] {
        &self.accepted
    }

    /// Per-step blobs. Entries are `None` for blobless models.
    pub fn blobs(&self) -> &[Option<B>] {
        &self.blobs
    }
}
