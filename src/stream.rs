/*!
Reproducible random streams.

Every chain and every proposal owns exactly one [`RandomStream`], a ChaCha
generator keyed by a `(seed, stream)` pair. ChaCha treats the stream index as
part of its nonce, so two streams derived from the same seed with different
indices never produce overlapping sequences, while the same pair always
reproduces the same sequence. That single derivation rule is what makes
multi-chain runs both reproducible and statistically independent, no matter
how chain execution is scheduled.

The derivation used by [`Sampler`](crate::sampler::Sampler) is:

- chain `i` draws its acceptance uniforms from stream index `i`;
- proposal `j` of chain `i` draws its jumps from stream index
  [`proposal_stream_index(nchains, i, j)`](proposal_stream_index), which is
  `(j + 1) * nchains + i`.

All indices are distinct across the whole sampler, so no two owned streams
ever alias.
*/

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// The stream index for proposal `proposal_index` of chain `chain_id`.
///
/// Offsets by `nchains` so that proposal streams can never collide with the
/// chain streams `0..nchains`, and strides by `nchains` so that the same
/// proposal on two different chains gets two different streams.
pub fn proposal_stream_index(nchains: usize, chain_id: usize, proposal_index: usize) -> u64 {
    ((proposal_index + 1) * nchains + chain_id) as u64
}

/// A serializable snapshot of a [`RandomStream`].
///
/// Restoring a stream from its state reproduces the exact continuation of
/// the sequence, which is what makes whole-run checkpoints possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    /// The global seed the stream was derived from.
    pub seed: u64,
    /// The stream index within that seed.
    pub stream: u64,
    /// How far into the stream the generator has advanced.
    pub word_pos: u128,
}

/// A reproducible pseudo-random stream keyed by `(seed, stream index)`.
///
/// # Examples
///
/// ```rust
/// use multichain_mcmc::stream::RandomStream;
/// use rand::RngCore;
///
/// let mut a = RandomStream::derive(42, 0);
/// let mut b = RandomStream::derive(42, 0);
/// assert_eq!(a.next_u64(), b.next_u64());
///
/// let mut c = RandomStream::derive(42, 1);
/// assert_ne!(a.next_u64(), c.next_u64());
/// ```
#[derive(Debug, Clone)]
pub struct RandomStream {
    seed: u64,
    stream: u64,
    rng: ChaCha8Rng,
}

impl RandomStream {
    /// Derives the stream for `(seed, stream)`.
    pub fn derive(seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { seed, stream, rng }
    }

    /// The seed this stream was derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The stream index this stream was derived with.
    pub fn stream(&self) -> u64 {
        self.stream
    }

    /// Snapshots the generator as an explicit, serializable token.
    pub fn state(&self) -> StreamState {
        StreamState {
            seed: self.seed,
            stream: self.stream,
            word_pos: self.rng.get_word_pos(),
        }
    }

    /// Restores the generator from a token produced by [`state`](Self::state).
    pub fn set_state(&mut self, state: &StreamState) {
        let mut rng = ChaCha8Rng::seed_from_u64(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(state.word_pos);
        self.seed = state.seed;
        self.stream = state.stream;
        self.rng = rng;
    }
}

impl RngCore for RandomStream {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}
