use super::cpu_backend::CpuBackend;
use crate::tensor::{Result, TensorError};
use std::thread;

/// Runs `f` once per rank, each on its own thread with a ring-connected [`CpuBackend`].
///
/// This is SPMD in a single process: every thread executes the same program on its own
/// shard of the data, and the threads meet only inside collectives. Results come back
/// indexed by rank.
///
/// # Errors
///
/// `Communication` if any rank panics. A panicking rank drops its backend, which makes
/// its neighbours' collectives fail instead of hang.
///
/// ```rust
/// use shardformer::distributed::backend::CollectiveBackend;
/// use shardformer::distributed::launch::run_spmd;
/// use shardformer::tensor::Tensor;
///
/// let sums = run_spmd(3, |backend| {
///     let mut t = Tensor::<f32, 1>::new(vec![backend.rank() as f32], [1]).unwrap();
///     backend.all_reduce_sum(&mut t).unwrap();
///     t.data()[0]
/// })
/// .unwrap();
/// assert_eq!(sums, vec![3.0, 3.0, 3.0]);
/// ```
pub fn run_spmd<F, R>(world_size: usize, f: F) -> Result<Vec<R>>
where
    F: Fn(CpuBackend) -> R + Sync,
    R: Send,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = CpuBackend::ring(world_size)
            .into_iter()
            .map(|backend| scope.spawn(move || f(backend)))
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| TensorError::Communication(format!("rank {} panicked", rank)))
            })
            .collect()
    })
}
