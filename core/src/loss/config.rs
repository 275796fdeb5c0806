use serde::{Deserialize, Serialize};

/// How per-position losses are combined into the scalar loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Average over counted positions.
    #[default]
    Mean,
    /// Sum over counted positions.
    Sum,
}

/// Configuration for the vocabulary-sharded cross-entropy.
///
/// The default reproduces plain mean cross-entropy over every position with an evenly
/// sharded vocabulary.
///
/// ```rust
/// use shardformer::loss::{CrossEntropyConfig, Reduction};
///
/// let config = CrossEntropyConfig::new()
///     .with_ignore_index(-100)
///     .with_reduction(Reduction::Sum);
/// assert_eq!(config.ignore_index, Some(-100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEntropyConfig {
    /// Target id that marks padding (commonly -100).
    ///
    /// `None`: a target outside the vocabulary is owned by no rank; it still counts
    /// toward the mean and contributes `logsumexp - max`.
    ///
    /// `Some(i)`: positions whose target is `i` contribute neither loss nor gradient
    /// and are left out of the mean. Any other out-of-vocabulary target is an error.
    pub ignore_index: Option<i64>,
    /// Reduction over positions.
    pub reduction: Reduction,
    /// Full vocabulary size, for vocabularies that do not split evenly.
    ///
    /// `None` means `local_vocab_size * world_size`. When set, every rank's local
    /// logits must be `ceil(global / world_size)` wide and the last shard's trailing
    /// columns are treated as padding.
    pub global_vocab_size: Option<usize>,
}

impl CrossEntropyConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ignore index.
    pub fn with_ignore_index(mut self, index: i64) -> Self {
        self.ignore_index = Some(index);
        self
    }

    /// Set the reduction.
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// Set the full vocabulary size.
    pub fn with_global_vocab_size(mut self, size: usize) -> Self {
        self.global_vocab_size = Some(size);
        self
    }
}
