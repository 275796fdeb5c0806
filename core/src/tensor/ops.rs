//! Tensor operations.
//!
//! # Overview
//!
//! - **Element-wise Arithmetic**: `+` and `*` on `&Tensor` (shapes must match exactly).
//! - **Maps**: `map_inplace` and `scale_inplace`.
//! - **Row reductions**: `row_max`, `row_sum` and `gather_rows` on `[rows, cols]`
//!   matrices, backed by the `shardformer-kernels` crate.
//!
//! # Parallelism
//!
//! > [!TIP]
//! > **Efficiency Note**: Operations are parallelized using `rayon`. For small tensors the
//! > thread hand-off can cost more than the arithmetic; the loss is sized for
//! > `batch * seq` rows of several thousand vocabulary columns, where it pays off.
//!
//! # Examples
//!
//! ```rust
//! use shardformer::tensor::Tensor;
//!
//! let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{Cpu, FloatElem, Result, Tensor, TensorElem, TensorError};

use rayon::prelude::*;
use std::ops::{Add, Mul};

/// Implements a binary arithmetic operation trait (`Add`, `Mul`) for `&Tensor`.
///
/// Checks shape compatibility, allocates the output and runs the element-wise
/// operation in parallel.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK, Cpu>
        where
            T: TensorElem,
        {
            type Output = crate::tensor::Result<Tensor<T, RANK, Cpu>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.to_vec(),
                        got: rhs.shape.to_vec(),
                    });
                }

                let mut out = Tensor::zeros(self.shape);
                out.data
                    .as_mut_slice()
                    .par_iter_mut()
                    .zip(self.data.as_slice().par_iter())
                    .zip(rhs.data.as_slice().par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Mul, mul);

impl<T, const RANK: usize> Tensor<T, RANK, Cpu>
where
    T: TensorElem,
{
    /// Applies a function element-wise, overwriting the tensor.
    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(T) -> T + Sync + Send,
    {
        self.data.par_iter_mut().for_each(|x| *x = f(*x));
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale_inplace(&mut self, factor: T) {
        self.map_inplace(|x| x * factor);
    }
}

impl<T> Tensor<T, 2, Cpu>
where
    T: FloatElem,
{
    /// Maximum of the first `valid_cols` columns of every row.
    ///
    /// Returns a `[rows]` tensor. Rows with no valid columns reduce to negative infinity.
    pub fn row_max(&self, valid_cols: usize) -> Result<Tensor<T, 1, Cpu>> {
        let [rows, cols] = self.shape;
        let out = shardformer_kernels::row_max(self.data(), cols, valid_cols)?;
        Tensor::new(out, [rows])
    }

    /// Sum of the first `valid_cols` columns of every row.
    pub fn row_sum(&self, valid_cols: usize) -> Result<Tensor<T, 1, Cpu>> {
        let [rows, cols] = self.shape;
        let out = shardformer_kernels::row_sum(self.data(), cols, valid_cols)?;
        Tensor::new(out, [rows])
    }

    /// Picks `self[r, indices[r]]` for every row `r`.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `indices.len()` differs from the row count, `IndexOutOfBounds`
    /// if any index is past the last column.
    pub fn gather_rows(&self, indices: &[usize]) -> Result<Tensor<T, 1, Cpu>> {
        let [rows, cols] = self.shape;
        if indices.len() != rows {
            return Err(TensorError::ShapeMismatch {
                expected: vec![rows],
                got: vec![indices.len()],
            });
        }
        let out = shardformer_kernels::gather_rows(self.data(), cols, indices)?;
        Tensor::new(out, [rows])
    }

    /// Applies `f(row_index, row)` to every row in parallel.
    pub fn for_each_row_mut<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let cols = self.shape[1];
        if cols == 0 {
            return;
        }
        self.data
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(r, row)| f(r, row));
    }
}
