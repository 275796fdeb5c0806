//! Storage abstraction for Tensors.
//!
//! A `Tensor` holds shape and strides; its `Storage` holds the elements. Storage must be
//! contiguous and expose itself as a slice, which is what the row kernels and the
//! collectives operate on.

use crate::tensor::TensorElem;
use std::fmt::Debug;

/// A trait for the underlying data storage.
pub trait Storage<T>: Clone + Debug + Send + Sync {
    /// Returns the data as an immutable slice.
    fn as_slice(&self) -> &[T];

    /// Returns the data as a mutable slice.
    fn as_mut_slice(&mut self) -> &mut [T];

    /// Returns the number of elements in the storage.
    fn len(&self) -> usize;

    /// Returns `true` if the storage contains no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host storage for CPU tensors.
impl<T: TensorElem> Storage<T> for Vec<T> {
    fn as_slice(&self) -> &[T] {
        self
    }
    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }
    fn len(&self) -> usize {
        self.len()
    }
}
