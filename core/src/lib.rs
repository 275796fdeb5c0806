//! # shardformer
//!
//! Tensor-parallel building blocks for training language models whose output projection
//! is split along the vocabulary. The centerpiece is [`loss::DistCrossEntropy`]: a
//! cross-entropy loss that runs on vocabulary shards and produces the same loss and
//! gradients as the dense version, without any rank ever holding the full logits.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: contiguous N-dimensional tensors and the row operations the loss needs.
//! - [`distributed`]: collective backends (single rank, threaded ring) and vocabulary
//!   partitioning.
//! - [`loss`]: the sharded cross-entropy, its configuration and its autograd hook.
//! - [`autograd`]: the reverse-mode tape.
//!
//! ## Example
//!
//! Two ranks, each holding half of an 8-token vocabulary:
//!
//! ```rust
//! use shardformer::distributed::run_spmd;
//! use shardformer::loss::DistCrossEntropy;
//! use shardformer::tensor::Tensor;
//!
//! let losses = run_spmd(2, |backend| {
//!     let shard = Tensor::<f64, 3>::zeros([1, 2, 4]);
//!     let target = Tensor::<i64, 2>::new(vec![2, 5], [1, 2]).unwrap();
//!     let (loss, _ctx) = DistCrossEntropy::default()
//!         .forward(shard, &target, &backend)
//!         .unwrap();
//!     loss
//! })
//! .unwrap();
//!
//! // Uniform logits: loss = ln(8) on every rank.
//! assert!((losses[0] - 8f64.ln()).abs() < 1e-12);
//! assert_eq!(losses[0], losses[1]);
//! ```

pub mod autograd;
pub mod distributed;
pub mod loss;
pub mod tensor;

pub use autograd::Variable;
pub use distributed::{CollectiveBackend, VocabPartition};
pub use loss::{CrossEntropyConfig, DistCrossEntropy, Reduction};
pub use tensor::{Cpu, Device, FloatElem, Storage, Tensor, TensorElem, TensorError};
