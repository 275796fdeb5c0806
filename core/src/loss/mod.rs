//! Loss functions for vocabulary-parallel language models.
//!
//! # Why a dedicated loss?
//!
//! With the LM head split along the vocabulary, each rank holds logits for only
//! `V / world_size` token ids. Gathering the full `[B, S, V]` tensor onto one rank just to
//! run a softmax would undo the memory savings of the split (for a 150k vocabulary and
//! 8k tokens that is several gigabytes per step). [`DistCrossEntropy`] instead rewrites
//!
//! `loss = -log(exp(x_t) / sum_i exp(x_i)) = log(sum_i exp(x_i)) - x_t`
//!
//! so that every term is either a per-row reduction (`max`, `sum`) that can be all-reduced,
//! or a single value (`x_t`) that exactly one rank owns.
//!
//! # Entry points
//!
//! - [`DistCrossEntropy::forward`] / [`DistCrossEntropy::backward`]: explicit pair over
//!   plain tensors, with the saved state passed between them by value.
//! - [`dist_cross_entropy`] / [`apply_dist_cross_entropy`]: the same computation as a node
//!   on the autograd tape.

mod config;
mod dist_cross_entropy;
mod node;

pub use config::{CrossEntropyConfig, Reduction};
pub use dist_cross_entropy::{CrossEntropyContext, DistCrossEntropy};
pub use node::{apply_dist_cross_entropy, dist_cross_entropy};
