use super::config::{CrossEntropyConfig, Reduction};
use crate::distributed::backend::CollectiveBackend;
use crate::distributed::partition::VocabPartition;
use crate::tensor::{FloatElem, Result, Tensor, TensorError};

/// Cross-entropy over a vocabulary sharded across a process group.
///
/// Each rank passes its own `[B, S, V_local]` logits shard and the full `[B, S]` target
/// ids. The loss is
///
/// `loss = log(sum_i exp(x_i)) - x_target`
///
/// evaluated without any rank seeing the other shards. Three collectives are issued per
/// forward, always in this order:
///
/// 1. `Max` of the per-row local maxima, so every rank subtracts the same global max
///    and `exp` cannot overflow anywhere. The shard width travels in the same reduce,
///    so ranks with mismatched shards all fail here instead of diverging silently;
/// 2. `Sum` of the gathered target logits. Only the owning rank contributes a non-zero
///    value, so the sum is the target logit itself;
/// 3. `Sum` of the per-row `sum(exp)`.
///
/// Every rank computes the same loss. The backward pass is purely local.
#[derive(Debug, Clone, Default)]
pub struct DistCrossEntropy {
    config: CrossEntropyConfig,
}

/// State retained between a forward and its backward.
///
/// Holds the caller's logits buffer, now turned into the global softmax restricted to
/// the local shard. Consumed by [`DistCrossEntropy::backward`], so it can only ever be
/// paired with the forward that produced it.
#[derive(Debug)]
pub struct CrossEntropyContext<T: FloatElem> {
    exp_logits: Tensor<T, 3>,
    mask: Vec<bool>,
    masked_target_1d: Vec<usize>,
    ignored: Vec<bool>,
    grad_scale: T,
}

impl<T: FloatElem> CrossEntropyContext<T> {
    /// Softmax probabilities over the global vocabulary, local columns only.
    pub fn probabilities(&self) -> &Tensor<T, 3> {
        &self.exp_logits
    }

    /// Per flattened position: `true` where this rank does not own the target.
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Per flattened position: target column in the local shard, `0` where masked.
    pub fn masked_target(&self) -> &[usize] {
        &self.masked_target_1d
    }
}

impl DistCrossEntropy {
    pub fn new(config: CrossEntropyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CrossEntropyConfig {
        &self.config
    }

    /// Computes the loss for this rank's shard.
    ///
    /// Takes ownership of `vocab_logits`: the buffer is shifted, exponentiated and
    /// normalized in place and handed back inside the returned context.
    ///
    /// # Errors
    ///
    /// Shape and target validation runs before the first collective and fails the same
    /// way on every rank (all ranks see the same targets):
    /// - `ShapeMismatch` if `target` is not `[B, S]` or `V_local` differs from the
    ///   partition width;
    /// - `InvalidTarget` for an out-of-vocabulary target when an ignore index is set.
    ///
    /// The first collective also compares shard widths across the group and returns
    /// `ShapeMismatch` on every rank if they differ. Beyond that only collective
    /// failures (`Communication`) can occur.
    pub fn forward<T, B>(
        &self,
        vocab_logits: Tensor<T, 3>,
        target: &Tensor<i64, 2>,
        backend: &B,
    ) -> Result<(T, CrossEntropyContext<T>)>
    where
        T: FloatElem,
        B: CollectiveBackend,
    {
        let [batch, seq, local_vocab] = *vocab_logits.shape();
        if target.shape() != &[batch, seq] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, seq],
                got: target.shape().to_vec(),
            });
        }

        let world_size = backend.world_size();
        let global_vocab = self
            .config
            .global_vocab_size
            .unwrap_or(local_vocab * world_size);
        let partition = VocabPartition::new(backend.rank(), world_size, global_vocab)?;
        if partition.delta() != local_vocab {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, seq, partition.delta()],
                got: vec![batch, seq, local_vocab],
            });
        }

        let rows = batch * seq;
        let owned = partition.owned_len();
        tracing::debug!(
            rank = partition.rank(),
            world_size,
            rows,
            local_vocab,
            global_vocab,
            "dist cross entropy forward"
        );

        let ignored = self.ignored_positions(target, global_vocab)?;

        // [start, end) => unmasked; other ranks' ids, out-of-range ids and ignored
        // positions => masked. Masked rows gather column 0, which always exists.
        let (mask, masked_target_1d): (Vec<bool>, Vec<usize>) = target
            .data()
            .iter()
            .zip(&ignored)
            .map(|(&t, &ignore)| match partition.local_index(t) {
                Some(col) if !ignore => (false, col),
                _ => (true, 0),
            })
            .unzip();

        let mut logits = vocab_logits.reshape([rows, local_vocab])?;

        // Global max per row, with the shard width riding along as `[V_local, -V_local]`
        // so ranks that disagree on it all see the disagreement after the reduce.
        let width = from_count::<T>(local_vocab)?;
        let mut stats = logits.row_max(owned)?.into_data();
        stats.extend([width, -width]);
        let mut logits_max = Tensor::new(stats, [rows + 2])?;
        backend.all_reduce_max(&mut logits_max)?;

        let (maxes, widths) = logits_max.data().split_at(rows);
        let (widest, narrowest) = (widths[0], -widths[1]);
        if widest != narrowest {
            let other = if width == widest { narrowest } else { widest };
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, seq, other.to_usize().unwrap_or(0)],
                got: vec![batch, seq, local_vocab],
            });
        }
        logits.for_each_row_mut(|r, row| {
            let m = maxes[r];
            for x in row.iter_mut() {
                *x = *x - m;
            }
        });

        // Shifted target logit, contributed by the owning rank only.
        let mut pred_logits = logits.gather_rows(&masked_target_1d)?;
        for (p, &masked) in pred_logits.data_mut().iter_mut().zip(&mask) {
            if masked {
                *p = T::zero();
            }
        }
        backend.all_reduce_sum(&mut pred_logits)?;

        // exp in place; padding columns become zero and stay out of the softmax.
        logits.for_each_row_mut(|_, row| {
            for (col, x) in row.iter_mut().enumerate() {
                *x = if col < owned { x.exp() } else { T::zero() };
            }
        });
        let mut sum_exp_logits = logits.row_sum(owned)?;
        backend.all_reduce_sum(&mut sum_exp_logits)?;

        let mut total = T::zero();
        let mut counted = 0usize;
        for ((&sum_exp, &pred), &ignore) in sum_exp_logits
            .data()
            .iter()
            .zip(pred_logits.data())
            .zip(&ignored)
        {
            if !ignore {
                total += sum_exp.ln() - pred;
                counted += 1;
            }
        }

        let (loss, grad_scale) = match self.config.reduction {
            Reduction::Mean => {
                let denom = from_count::<T>(counted.max(1))?;
                (total / denom, T::one() / denom)
            }
            Reduction::Sum => (total, T::one()),
        };

        // Softmax.
        let sums = sum_exp_logits.data();
        logits.for_each_row_mut(|r, row| {
            let s = sums[r];
            for x in row.iter_mut() {
                *x = *x / s;
            }
        });

        tracing::debug!(rank = partition.rank(), ?loss, counted, "dist cross entropy loss");

        let ctx = CrossEntropyContext {
            exp_logits: logits.reshape([batch, seq, local_vocab])?,
            mask,
            masked_target_1d,
            ignored,
            grad_scale,
        };
        Ok((loss, ctx))
    }

    /// Gradient of the loss with respect to this rank's logits shard.
    ///
    /// `softmax - one_hot(target)`, where the one-hot part only exists on the rank that
    /// owns the target, scaled by `grad_output` and by the reduction (`1 / count` for
    /// `Mean`). Ignored positions get a zero gradient. No communication.
    pub fn backward<T: FloatElem>(
        &self,
        ctx: CrossEntropyContext<T>,
        grad_output: T,
    ) -> Result<Tensor<T, 3>> {
        let CrossEntropyContext {
            exp_logits,
            mask,
            masked_target_1d,
            ignored,
            grad_scale,
        } = ctx;

        let [batch, seq, local_vocab] = *exp_logits.shape();
        let mut grad_logits = exp_logits.reshape([batch * seq, local_vocab])?;
        let scale = grad_output * grad_scale;

        grad_logits.for_each_row_mut(|r, row| {
            if ignored[r] {
                row.fill(T::zero());
                return;
            }
            if !mask[r] {
                row[masked_target_1d[r]] -= T::one();
            }
        });
        grad_logits.scale_inplace(scale);

        grad_logits.reshape([batch, seq, local_vocab])
    }

    /// Marks positions excluded by the ignore index and rejects targets that belong to
    /// no rank. Without an ignore index nothing is excluded or rejected.
    fn ignored_positions(&self, target: &Tensor<i64, 2>, global_vocab: usize) -> Result<Vec<bool>> {
        let Some(ignore_index) = self.config.ignore_index else {
            return Ok(vec![false; target.size()]);
        };

        target
            .data()
            .iter()
            .enumerate()
            .map(|(position, &t)| {
                if t == ignore_index {
                    Ok(true)
                } else if usize::try_from(t).is_ok_and(|t| t < global_vocab) {
                    Ok(false)
                } else {
                    Err(TensorError::InvalidTarget {
                        position,
                        target: t,
                        vocab_size: global_vocab,
                    })
                }
            })
            .collect()
    }
}

fn from_count<T: FloatElem>(count: usize) -> Result<T> {
    T::from_usize(count)
        .ok_or_else(|| TensorError::Unsupported(format!("count {} not representable", count)))
}
