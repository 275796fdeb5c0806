use crate::{KernelElem, KernelError, Result};
use num_traits::Float;
use rayon::prelude::*;

/// Checks that `data` is a whole number of `cols`-wide rows and that
/// `valid_cols` fits inside a row. Returns the row count.
pub(crate) fn row_count<T>(data: &[T], cols: usize, valid_cols: usize) -> Result<usize> {
    if cols == 0 || data.len() % cols != 0 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![cols],
            got: vec![data.len()],
        });
    }
    if valid_cols > cols {
        return Err(KernelError::ShapeMismatch {
            expected: vec![cols],
            got: vec![valid_cols],
        });
    }
    Ok(data.len() / cols)
}

/// CPU implementation of a row-wise maximum.
///
/// Treats `data` as a row-major `[rows, cols]` matrix and returns the maximum of the
/// first `valid_cols` entries of every row. Columns past `valid_cols` are padding and
/// are skipped. A row with no valid columns reduces to negative infinity, the identity
/// of `max`.
///
/// # SOTA Integration Guide
///
/// Vendor libraries expose this as a "reduce max along last axis" primitive
/// (e.g. cuDNN `ReduceTensor` with `CUDNN_REDUCE_TENSOR_MAX`). Keep the padding
/// semantics when swapping implementations: padded columns must never win.
pub fn row_max<T>(data: &[T], cols: usize, valid_cols: usize) -> Result<Vec<T>>
where
    T: KernelElem + Float,
{
    let rows = row_count(data, cols, valid_cols)?;
    let mut out = vec![T::neg_infinity(); rows];

    out.par_iter_mut()
        .zip(data.par_chunks(cols))
        .for_each(|(o, row)| {
            *o = row[..valid_cols]
                .iter()
                .fold(T::neg_infinity(), |acc, &x| acc.max(x));
        });

    Ok(out)
}

/// CPU implementation of a row-wise sum over the first `valid_cols` columns.
pub fn row_sum<T>(data: &[T], cols: usize, valid_cols: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let rows = row_count(data, cols, valid_cols)?;
    let mut out = vec![T::zero(); rows];

    out.par_iter_mut()
        .zip(data.par_chunks(cols))
        .for_each(|(o, row)| {
            let mut sum = T::zero();
            for &x in &row[..valid_cols] {
                sum += x;
            }
            *o = sum;
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_max() {
        let data = vec![1.0f32, 5.0, 3.0, -2.0, -7.0, -1.0];
        let result = row_max(&data, 3, 3).unwrap();
        assert_eq!(result, vec![5.0, -1.0]);
    }

    #[test]
    fn test_row_max_skips_padding() {
        // Last column of every row is padding and holds the largest value.
        let data = vec![1.0f32, 2.0, 100.0, 4.0, 3.0, 100.0];
        let result = row_max(&data, 3, 2).unwrap();
        assert_eq!(result, vec![2.0, 4.0]);
    }

    #[test]
    fn test_row_max_no_valid_columns() {
        let data = vec![1.0f64, 2.0];
        let result = row_max(&data, 2, 0).unwrap();
        assert_eq!(result, vec![f64::NEG_INFINITY]);
    }

    #[test]
    fn test_row_sum() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(row_sum(&data, 3, 3).unwrap(), vec![6.0, 15.0]);
        assert_eq!(row_sum(&data, 3, 1).unwrap(), vec![1.0, 4.0]);
        assert_eq!(row_sum(&data, 3, 0).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_ragged_data_rejected() {
        let data = vec![1.0f32; 5];
        assert!(matches!(
            row_sum(&data, 2, 2),
            Err(KernelError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            row_max(&data, 0, 0),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_valid_cols_larger_than_row() {
        let data = vec![1.0f32; 4];
        assert!(matches!(
            row_sum(&data, 2, 3),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }
}
