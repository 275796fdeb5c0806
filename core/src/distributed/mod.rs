//! # Distributed collectives and vocabulary sharding
//!
//! Tensor parallelism splits a layer's weights across devices. For the output
//! projection of a language model the split runs along the vocabulary: rank `r` computes
//! logits only for its slice of token ids, and nobody holds the full `[B, S, V]` tensor.
//! The loss in [`crate::loss`] then has to work on those slices, talking to its peers
//! only through collective reductions.
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): in-place `all_reduce` with
//!     [`ReduceOp::Sum`](backend::ReduceOp) or `Max`, plus `rank`/`world_size`.
//! *   [`LocalBackend`](local_backend::LocalBackend): a group of one.
//! *   [`CpuBackend`](cpu_backend::CpuBackend): Ring All-Reduce between threads.
//! *   [`run_spmd`](launch::run_spmd): spawns one thread per rank on a wired ring.
//! *   [`VocabPartition`](partition::VocabPartition): which ids each rank owns.
//!
//! Rank and world size are never read from global state. They come from the backend
//! passed into each call, so a test can run any number of ranks inside one process.

pub mod backend;
pub mod cpu_backend;
pub mod launch;
pub mod local_backend;
pub mod partition;

pub use backend::{CollectiveBackend, ReduceOp};
pub use cpu_backend::CpuBackend;
pub use launch::run_spmd;
pub use local_backend::LocalBackend;
pub use partition::VocabPartition;
