//! Device abstraction for Tensor storage.
//!
//! A device decides where tensor data is allocated. Each rank in a tensor-parallel group
//! normally drives its own accelerator; the collectives in [`crate::distributed`] move
//! reduced rows between those devices. Only the host CPU is implemented.

use crate::tensor::{Storage, TensorElem};
use std::fmt::Debug;

/// A trait representing the underlying storage device for a Tensor.
///
/// The `Storage` associated type lets each device choose its own memory container
/// (e.g., `Vec<T>` for CPU, a device buffer for a GPU).
pub trait Device: Clone + Debug + PartialEq + Send + Sync {
    /// The type of storage used by this device.
    type Storage<T>: Storage<T>
    where
        T: TensorElem;

    /// Returns the name of the device.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shardformer::tensor::{Cpu, Device};
    /// let device = Cpu;
    /// assert_eq!(device.name(), "CPU");
    /// ```
    fn name(&self) -> &'static str;
}

/// A CPU Device.
///
/// Data is stored in system RAM using `Vec<T>`. Element-wise and row-wise operations
/// are parallelized across cores with `rayon`.
#[derive(Clone, Debug, PartialEq)]
pub struct Cpu;

impl Device for Cpu {
    type Storage<T>
        = Vec<T>
    where
        T: TensorElem;

    fn name(&self) -> &'static str {
        "CPU"
    }
}
