use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shardformer::distributed::{CollectiveBackend, LocalBackend, VocabPartition, run_spmd};
use shardformer::loss::{CrossEntropyConfig, DistCrossEntropy, Reduction};
use shardformer::tensor::{Tensor, TensorError};

/// Plain cross-entropy over full logits: (mean loss, gradient of the mean loss).
fn dense_reference(logits: &[f64], vocab: usize, targets: &[i64]) -> (f64, Vec<f64>) {
    let rows = targets.len();
    let mut loss = 0.0;
    let mut grad = vec![0.0; logits.len()];
    for (r, row) in logits.chunks(vocab).enumerate() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = row.iter().map(|x| (x - max).exp()).sum();
        let t = targets[r] as usize;
        loss += sum.ln() + max - row[t];
        for (c, x) in row.iter().enumerate() {
            let p = (x - max).exp() / sum;
            let onehot = if c == t { 1.0 } else { 0.0 };
            grad[r * vocab + c] = (p - onehot) / rows as f64;
        }
    }
    (loss / rows as f64, grad)
}

fn random_problem(seed: u64, batch: usize, seq: usize, vocab: usize) -> (Tensor<f64, 3>, Tensor<i64, 2>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let logits = (0..batch * seq * vocab).map(|_| rng.random_range(-4.0..4.0)).collect();
    let targets = (0..batch * seq).map(|_| rng.random_range(0..vocab as i64)).collect();
    (
        Tensor::new(logits, [batch, seq, vocab]).unwrap(),
        Tensor::new(targets, [batch, seq]).unwrap(),
    )
}

/// Runs forward and backward on `world_size` ranks; returns per-rank (loss, grad shard).
fn run_sharded(
    world_size: usize,
    full: &Tensor<f64, 3>,
    target: &Tensor<i64, 2>,
    config: CrossEntropyConfig,
) -> Vec<(f64, Tensor<f64, 3>)> {
    let vocab = full.shape()[2];
    run_spmd(world_size, |backend| {
        let part = VocabPartition::for_backend(&backend, vocab).unwrap();
        let engine = DistCrossEntropy::new(config.clone().with_global_vocab_size(vocab));
        let (loss, ctx) = engine
            .forward(part.shard(full).unwrap(), target, &backend)
            .unwrap();
        (loss, engine.backward(ctx, 1.0).unwrap())
    })
    .unwrap()
}

/// Concatenates the owned columns of every shard back into `[rows, vocab]`.
fn unshard(shards: &[Tensor<f64, 3>], vocab: usize) -> Vec<f64> {
    let world_size = shards.len();
    let rows = shards[0].shape()[0] * shards[0].shape()[1];
    let mut out = Vec::with_capacity(rows * vocab);
    for r in 0..rows {
        for (rank, shard) in shards.iter().enumerate() {
            let part = VocabPartition::new(rank, world_size, vocab).unwrap();
            let delta = part.delta();
            out.extend_from_slice(&shard.data()[r * delta..r * delta + part.owned_len()]);
        }
    }
    out
}

#[test]
fn test_single_rank_equals_dense() {
    let (logits, target) = random_problem(7, 2, 3, 11);
    let (want_loss, want_grad) = dense_reference(logits.data(), 11, target.data());

    let engine = DistCrossEntropy::default();
    let (loss, ctx) = engine.forward(logits, &target, &LocalBackend).unwrap();
    let grad = engine.backward(ctx, 1.0).unwrap();

    assert!((loss - want_loss).abs() < 1e-12);
    for (g, w) in grad.data().iter().zip(&want_grad) {
        assert!((g - w).abs() < 1e-12);
    }
}

#[test]
fn test_shift_invariance() {
    let (logits, target) = random_problem(3, 1, 4, 6);
    let shifted = Tensor::new(
        logits.data().iter().map(|x| x + 1000.0).collect(),
        *logits.shape(),
    )
    .unwrap();

    let engine = DistCrossEntropy::default();
    let (a, _) = engine.forward(logits, &target, &LocalBackend).unwrap();
    let (b, _) = engine.forward(shifted, &target, &LocalBackend).unwrap();
    assert!((a - b).abs() < 1e-9);
}

#[test]
fn test_multi_rank_equals_dense() {
    for (world_size, vocab) in [(2, 8), (3, 12), (4, 16), (4, 10), (3, 7), (4, 5)] {
        let (full, target) = random_problem(world_size as u64 * 100 + vocab as u64, 2, 5, vocab);
        let (want_loss, want_grad) = dense_reference(full.data(), vocab, target.data());

        let results = run_sharded(world_size, &full, &target, CrossEntropyConfig::default());

        // Every rank reports the same loss, bit for bit.
        for (loss, _) in &results {
            assert_eq!(loss.to_bits(), results[0].0.to_bits());
        }
        assert!(
            (results[0].0 - want_loss).abs() < 1e-10,
            "k = {}, V = {}: {} vs {}",
            world_size,
            vocab,
            results[0].0,
            want_loss
        );

        let shards: Vec<_> = results.into_iter().map(|(_, g)| g).collect();
        for (g, w) in unshard(&shards, vocab).iter().zip(&want_grad) {
            assert!((g - w).abs() < 1e-12, "k = {}, V = {}", world_size, vocab);
        }
    }
}

#[test]
fn test_padding_columns_get_zero_gradient() {
    // 10 ids over 4 ranks: delta = 3, rank 3 owns one real column.
    let (full, target) = random_problem(11, 1, 6, 10);
    let results = run_sharded(4, &full, &target, CrossEntropyConfig::default());

    let last = &results[3].1;
    for row in last.data().chunks(3) {
        assert_eq!(row[1], 0.0);
        assert_eq!(row[2], 0.0);
    }
}

#[test]
fn test_softmax_sums_to_one_across_ranks() {
    let (full, target) = random_problem(5, 1, 3, 12);
    let sums = run_spmd(3, |backend| {
        let part = VocabPartition::for_backend(&backend, 12).unwrap();
        let (_, ctx) = DistCrossEntropy::default()
            .forward(part.shard(&full).unwrap(), &target, &backend)
            .unwrap();
        ctx.probabilities()
            .data()
            .chunks(4)
            .map(|row| row.iter().sum::<f64>())
            .collect::<Vec<_>>()
    })
    .unwrap();

    for r in 0..3 {
        let total: f64 = sums.iter().map(|s| s[r]).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_gradient_matches_finite_differences() {
    let (logits, target) = random_problem(17, 1, 2, 5);
    let engine = DistCrossEntropy::default();
    let (_, ctx) = engine.forward(logits.clone(), &target, &LocalBackend).unwrap();
    let grad = engine.backward(ctx, 1.0).unwrap();

    let eps = 1e-6;
    let loss_at = |data: Vec<f64>| {
        let t = Tensor::new(data, [1, 2, 5]).unwrap();
        engine.forward(t, &target, &LocalBackend).unwrap().0
    };
    for i in 0..logits.size() {
        let mut plus = logits.data().to_vec();
        let mut minus = logits.data().to_vec();
        plus[i] += eps;
        minus[i] -= eps;
        let numeric = (loss_at(plus) - loss_at(minus)) / (2.0 * eps);
        assert!(
            (numeric - grad.data()[i]).abs() < 1e-6,
            "element {}: numeric {} vs analytic {}",
            i,
            numeric,
            grad.data()[i]
        );
    }
}

#[test]
fn test_shard_boundary_targets() {
    // delta = 4: ids 3 and 4 straddle the boundary, 0 and 7 are the extremes.
    let vocab = 8;
    let (full, _) = random_problem(23, 1, 4, vocab);
    let target = Tensor::<i64, 2>::new(vec![0, 3, 4, 7], [1, 4]).unwrap();
    let (want_loss, want_grad) = dense_reference(full.data(), vocab, target.data());

    let results = run_sharded(2, &full, &target, CrossEntropyConfig::default());
    assert!((results[0].0 - want_loss).abs() < 1e-12);

    let shards: Vec<_> = results.into_iter().map(|(_, g)| g).collect();
    for (g, w) in unshard(&shards, vocab).iter().zip(&want_grad) {
        assert!((g - w).abs() < 1e-12);
    }

    // Each target is owned by exactly one rank.
    let masks = run_spmd(2, |backend| {
        let part = VocabPartition::for_backend(&backend, vocab).unwrap();
        let (_, ctx) = DistCrossEntropy::default()
            .forward(part.shard(&full).unwrap(), &target, &backend)
            .unwrap();
        (ctx.mask().to_vec(), ctx.masked_target().to_vec())
    })
    .unwrap();
    assert_eq!(masks[0], (vec![false, false, true, true], vec![0, 3, 0, 0]));
    assert_eq!(masks[1], (vec![true, true, false, false], vec![0, 0, 0, 3]));
}

#[test]
fn test_concrete_two_rank_scenario() {
    let losses = run_spmd(2, |backend| {
        let shard = if backend.rank() == 0 {
            vec![1.0, 2.0, 3.0, 4.0]
        } else {
            vec![5.0, 6.0, 7.0, 8.0]
        };
        let logits = Tensor::<f64, 3>::new(shard, [1, 1, 4]).unwrap();
        let target = Tensor::<i64, 2>::new(vec![6], [1, 1]).unwrap();
        DistCrossEntropy::default()
            .forward(logits, &target, &backend)
            .unwrap()
            .0
    })
    .unwrap();

    // Global logit for id 6 is 7.0.
    let sum: f64 = (1..=8).map(|x| (x as f64 - 8.0).exp()).sum();
    let expected = sum.ln() + 8.0 - 7.0;
    assert!((losses[0] - expected).abs() < 1e-12);
    assert_eq!(losses[0].to_bits(), losses[1].to_bits());
}

#[test]
fn test_ignore_index_across_ranks() {
    let vocab = 8;
    let (full, _) = random_problem(31, 1, 4, vocab);
    let target = Tensor::<i64, 2>::new(vec![1, -100, 6, -100], [1, 4]).unwrap();
    let config = CrossEntropyConfig::new().with_ignore_index(-100);

    let results = run_sharded(2, &full, &target, config);

    // Same as the dense loss over the two counted rows.
    let kept: Vec<f64> = [0usize, 2]
        .iter()
        .flat_map(|&r| full.data()[r * vocab..(r + 1) * vocab].to_vec())
        .collect();
    let (want_loss, want_grad) = dense_reference(&kept, vocab, &[1, 6]);
    assert!((results[0].0 - want_loss).abs() < 1e-12);
    assert_eq!(results[0].0.to_bits(), results[1].0.to_bits());

    let shards: Vec<_> = results.into_iter().map(|(_, g)| g).collect();
    let grad = unshard(&shards, vocab);
    for (i, &r) in [0usize, 2].iter().enumerate() {
        for c in 0..vocab {
            assert!((grad[r * vocab + c] - want_grad[i * vocab + c]).abs() < 1e-12);
        }
    }
    for r in [1usize, 3] {
        assert!(grad[r * vocab..(r + 1) * vocab].iter().all(|&g| g == 0.0));
    }
}

#[test]
fn test_sum_reduction_across_ranks() {
    let vocab = 6;
    let (full, target) = random_problem(41, 2, 2, vocab);
    let (mean_loss, _) = dense_reference(full.data(), vocab, target.data());

    let results = run_sharded(
        3,
        &full,
        &target,
        CrossEntropyConfig::new().with_reduction(Reduction::Sum),
    );
    assert!((results[0].0 - mean_loss * 4.0).abs() < 1e-10);
}

#[test]
fn test_invalid_target_fails_before_communicating() {
    let config = CrossEntropyConfig::new().with_ignore_index(-100);
    let results = run_spmd(2, |backend| {
        let logits = Tensor::<f64, 3>::zeros([1, 2, 4]);
        let target = Tensor::<i64, 2>::new(vec![1, 8], [1, 2]).unwrap();
        DistCrossEntropy::new(config.clone())
            .forward(logits, &target, &backend)
            .map(|(loss, _)| loss)
    })
    .unwrap();

    for result in results {
        assert!(matches!(
            result,
            Err(TensorError::InvalidTarget { position: 1, target: 8, vocab_size: 8 })
        ));
    }
}

#[test]
fn test_inconsistent_shards_surface_as_errors() {
    // Global vocabulary of 8 over 2 ranks requires 4 columns each; rank 1 brings 3.
    let config = CrossEntropyConfig::new().with_global_vocab_size(8);
    let results = run_spmd(2, |backend| {
        let width = if backend.rank() == 0 { 4 } else { 3 };
        let logits = Tensor::<f64, 3>::zeros([1, 2, width]);
        let target = Tensor::<i64, 2>::new(vec![1, 5], [1, 2]).unwrap();
        DistCrossEntropy::new(config.clone())
            .forward(logits, &target, &backend)
            .map(|(loss, _)| loss)
    })
    .unwrap();

    // Rank 1 rejects its shard locally; rank 0 loses its peer mid-collective.
    assert!(matches!(results[0], Err(TensorError::Communication(_))));
    assert!(matches!(results[1], Err(TensorError::ShapeMismatch { .. })));
}

#[test]
fn test_inconsistent_shards_detected_without_global_size() {
    let results = run_spmd(3, |backend| {
        let width = if backend.rank() == 2 { 3 } else { 4 };
        let logits = Tensor::<f64, 3>::zeros([1, 2, width]);
        let target = Tensor::<i64, 2>::new(vec![1, 5], [1, 2]).unwrap();
        DistCrossEntropy::default()
            .forward(logits, &target, &backend)
            .map(|(loss, _)| loss)
    })
    .unwrap();

    for result in results {
        assert!(matches!(result, Err(TensorError::ShapeMismatch { .. })));
    }
}

#[test]
fn test_mismatched_batch_across_ranks_is_a_communication_error() {
    let results = run_spmd(2, |backend| {
        let rows = if backend.rank() == 0 { 2 } else { 3 };
        let logits = Tensor::<f64, 3>::zeros([1, rows, 4]);
        let target = Tensor::<i64, 2>::zeros([1, rows]);
        DistCrossEntropy::default()
            .forward(logits, &target, &backend)
            .map(|(loss, _)| loss)
    })
    .unwrap();

    for result in results {
        assert!(matches!(result, Err(TensorError::Communication(_))));
    }
}

#[test]
fn test_f32_logits_on_four_ranks() {
    let vocab = 16;
    let (full64, target) = random_problem(59, 1, 3, vocab);
    let (want_loss, _) = dense_reference(full64.data(), vocab, target.data());
    let full = Tensor::<f32, 3>::new(
        full64.data().iter().map(|&x| x as f32).collect(),
        [1, 3, vocab],
    )
    .unwrap();

    let losses = run_spmd(4, |backend| {
        let part = VocabPartition::for_backend(&backend, vocab).unwrap();
        DistCrossEntropy::default()
            .forward(part.shard(&full).unwrap(), &target, &backend)
            .unwrap()
            .0
    })
    .unwrap();

    assert!((losses[0] as f64 - want_loss).abs() < 1e-4);
    assert!(losses.iter().all(|l| l.to_bits() == losses[0].to_bits()));
}
