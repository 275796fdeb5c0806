use crate::tensor::{Result, Tensor, TensorElem};
use serde::{Deserialize, Serialize};

/// Element-wise combination applied by an all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    /// Every rank receives the element-wise sum of all contributions.
    Sum,
    /// Every rank receives the element-wise maximum of all contributions.
    Max,
}

impl ReduceOp {
    /// Combines two contributions.
    pub fn combine<T: TensorElem>(self, acc: T, value: T) -> T {
        match self {
            ReduceOp::Sum => acc + value,
            ReduceOp::Max => {
                if value > acc {
                    value
                } else {
                    acc
                }
            }
        }
    }
}

/// Abstraction for a distributed communication backend.
///
/// One backend value belongs to exactly one rank. Every collective is a blocking
/// barrier: all ranks of the group must issue the same operations, with the same
/// reduce op and tensor shape, in the same order. Violating that deadlocks the group
/// or corrupts data. Nothing here times out or retries; an `Err` from a collective is
/// fatal for the whole job.
///
/// Implementations:
/// - [`LocalBackend`](super::local_backend::LocalBackend): a group of one, all reductions are no-ops.
/// - [`CpuBackend`](super::cpu_backend::CpuBackend): ring all-reduce between threads.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Reduces `tensor` across all ranks in place.
    ///
    /// On return every rank holds the same combined values.
    fn all_reduce<T: TensorElem, const RANK: usize>(
        &self,
        tensor: &mut Tensor<T, RANK>,
        op: ReduceOp,
    ) -> Result<()>;

    /// Shorthand for `all_reduce(tensor, ReduceOp::Sum)`.
    fn all_reduce_sum<T: TensorElem, const RANK: usize>(
        &self,
        tensor: &mut Tensor<T, RANK>,
    ) -> Result<()> {
        self.all_reduce(tensor, ReduceOp::Sum)
    }

    /// Shorthand for `all_reduce(tensor, ReduceOp::Max)`.
    fn all_reduce_max<T: TensorElem, const RANK: usize>(
        &self,
        tensor: &mut Tensor<T, RANK>,
    ) -> Result<()> {
        self.all_reduce(tensor, ReduceOp::Max)
    }
}
