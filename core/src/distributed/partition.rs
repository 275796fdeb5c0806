use super::backend::CollectiveBackend;
use crate::tensor::{Result, Tensor, TensorElem, TensorError};

/// How a vocabulary of `global_vocab_size` ids is split across a process group.
///
/// Every rank owns a contiguous slice of width `delta = ceil(global / world_size)`:
/// rank `r` owns ids `[r * delta, (r + 1) * delta)`. When the vocabulary does not
/// divide evenly, the last shard is padded: its columns past `global_vocab_size`
/// exist in the local logits buffer but correspond to no token.
///
/// ```rust
/// use shardformer::distributed::partition::VocabPartition;
///
/// let part = VocabPartition::new(1, 2, 8).unwrap();
/// assert_eq!(part.delta(), 4);
/// assert_eq!(part.start(), 4);
/// assert!(part.owns(4) && part.owns(7));
/// assert!(!part.owns(3) && !part.owns(8));
/// assert_eq!(part.local_index(6), Some(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabPartition {
    rank: usize,
    world_size: usize,
    global_vocab_size: usize,
    delta: usize,
}

impl VocabPartition {
    /// Partition of a `global_vocab_size` vocabulary as seen from `rank`.
    ///
    /// # Errors
    ///
    /// `Unsupported` if `world_size` or `global_vocab_size` is zero, `IndexOutOfBounds`
    /// if `rank >= world_size`.
    pub fn new(rank: usize, world_size: usize, global_vocab_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(TensorError::Unsupported(
                "process group must have at least one rank".into(),
            ));
        }
        if rank >= world_size {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![rank],
                shape: vec![world_size],
            });
        }
        if global_vocab_size == 0 {
            return Err(TensorError::Unsupported("vocabulary is empty".into()));
        }

        Ok(Self {
            rank,
            world_size,
            global_vocab_size,
            delta: global_vocab_size.div_ceil(world_size),
        })
    }

    /// Evenly sharded vocabulary: `global = local_vocab_size * world_size`.
    pub fn even(rank: usize, world_size: usize, local_vocab_size: usize) -> Result<Self> {
        Self::new(rank, world_size, local_vocab_size * world_size)
    }

    /// Partition for the calling rank of `backend`'s group.
    pub fn for_backend<B: CollectiveBackend>(backend: &B, global_vocab_size: usize) -> Result<Self> {
        Self::new(backend.rank(), backend.world_size(), global_vocab_size)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn global_vocab_size(&self) -> usize {
        self.global_vocab_size
    }

    /// Shard width. Every rank's local logits have exactly this many columns.
    pub fn delta(&self) -> usize {
        self.delta
    }

    /// First global id owned by this rank.
    pub fn start(&self) -> usize {
        self.rank * self.delta
    }

    /// One past the last id of this rank's slice, padding included.
    pub fn end(&self) -> usize {
        self.start() + self.delta
    }

    /// Number of local columns that map to real tokens.
    ///
    /// Equals `delta` except on a padded last shard.
    pub fn owned_len(&self) -> usize {
        self.global_vocab_size
            .saturating_sub(self.start())
            .min(self.delta)
    }

    /// Whether this rank holds the logit for `target`.
    ///
    /// Exact integer comparison against `[start, start + owned_len)`. Negative ids and ids
    /// past the vocabulary are owned by nobody.
    pub fn owns(&self, target: i64) -> bool {
        let Ok(target) = usize::try_from(target) else {
            return false;
        };
        target >= self.start() && target < self.start() + self.owned_len()
    }

    /// Column of `target` in the local shard, if this rank owns it.
    pub fn local_index(&self, target: i64) -> Option<usize> {
        self.owns(target).then(|| target as usize - self.start())
    }

    /// Slices this rank's shard out of dense `[B, S, V]` logits.
    ///
    /// The result is `[B, S, delta]`. Padding columns of the last shard are filled with
    /// zero; the loss never reads them.
    pub fn shard<T: TensorElem>(&self, full: &Tensor<T, 3>) -> Result<Tensor<T, 3>> {
        let [batch, seq, vocab] = *full.shape();
        if vocab != self.global_vocab_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, seq, self.global_vocab_size],
                got: vec![batch, seq, vocab],
            });
        }

        let start = self.start();
        let owned = self.owned_len();
        let mut out = vec![T::zero(); batch * seq * self.delta];
        // A rank past the end of the vocabulary owns nothing; its shard is all padding.
        if owned > 0 {
            for (dst, src) in out
                .chunks_mut(self.delta)
                .zip(full.data().chunks(vocab))
            {
                dst[..owned].copy_from_slice(&src[start..start + owned]);
            }
        }
        Tensor::new(out, [batch, seq, self.delta])
    }
}
