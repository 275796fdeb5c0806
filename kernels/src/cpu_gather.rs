use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// CPU implementation of a per-row gather.
///
/// Treats `data` as a row-major `[rows, cols]` matrix and picks `data[r, indices[r]]`
/// for every row `r`. This is `torch.gather(x, -1, idx.unsqueeze(-1)).squeeze(-1)`
/// on a 2D view.
///
/// # Errors
///
/// - `ShapeMismatch` if `data` is not `indices.len()` rows of `cols` elements.
/// - `IndexOutOfBounds` if any index is `>= cols`. The check runs before any value is
///   read, so a bad index never produces a partial result.
pub fn gather_rows<T>(data: &[T], cols: usize, indices: &[usize]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    if data.len() != indices.len() * cols {
        return Err(KernelError::ShapeMismatch {
            expected: vec![indices.len(), cols],
            got: vec![data.len()],
        });
    }
    if let Some((row, &index)) = indices.iter().enumerate().find(|(_, i)| **i >= cols) {
        return Err(KernelError::IndexOutOfBounds {
            row,
            index,
            len: cols,
        });
    }

    let out = indices
        .par_iter()
        .enumerate()
        .map(|(row, &col)| data[row * cols + col])
        .collect();

    Ok(out)
}
