use super::backend::{CollectiveBackend, ReduceOp};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use crossbeam::channel::{Receiver, Sender, unbounded};

/// Wire format for one chunk of a ring step.
///
/// Elements travel as `f64`, which holds every `f32`, every `f64` and every integer
/// below 2^53 exactly, so reductions over `f32` logits are bit-identical on all ranks.
type Chunk = Vec<f64>;

/// A CPU collective backend where each rank is a thread.
///
/// Implements **Ring All-Reduce** over `crossbeam` channels, the same data movement
/// NCCL performs between GPUs: rank `r` only ever sends to `r + 1` and receives from
/// `r - 1` (mod `world_size`).
///
/// Dropping a backend closes its outgoing channel. A rank that fails or exits early
/// therefore turns its neighbours' pending receives into `Communication` errors
/// instead of leaving them blocked, and the failure travels around the ring.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Chunk>, // Receive from rank - 1
    right_tx: Sender<Chunk>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Chunk>,
        right_tx: Sender<Chunk>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Builds a fully wired ring of `world_size` backends, indexed by rank.
    ///
    /// Channel `i` carries traffic from rank `i` to rank `i + 1`.
    pub fn ring(world_size: usize) -> Vec<CpuBackend> {
        let (txs, mut rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        // Rank r receives on channel r - 1.
        rxs.rotate_right(1);

        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (tx, rx))| CpuBackend::new(rank, world_size, rx, tx))
            .collect()
    }

    /// Index of the chunk this rank handles at `step`, shifted by `offset`.
    fn chunk_index(&self, step: usize, offset: isize) -> usize {
        (self.rank as isize - step as isize + offset).rem_euclid(self.world_size as isize) as usize
    }

    fn send(&self, chunk: &[f64]) -> Result<()> {
        self.right_tx.send(chunk.to_vec()).map_err(|_| {
            TensorError::Communication(format!(
                "rank {}: right neighbour disconnected",
                self.rank
            ))
        })
    }

    fn recv(&self, expected_len: usize) -> Result<Chunk> {
        let chunk = self.left_rx.recv().map_err(|_| {
            TensorError::Communication(format!(
                "rank {}: left neighbour disconnected",
                self.rank
            ))
        })?;
        if chunk.len() != expected_len {
            // Peers entered the collective with differently shaped tensors.
            return Err(TensorError::Communication(format!(
                "rank {}: received chunk of {} elements, expected {}",
                self.rank,
                chunk.len(),
                expected_len
            )));
        }
        Ok(chunk)
    }
}

/// Bounds of chunk `idx` when `total` elements are split into `chunk_size` pieces.
fn chunk_bounds(idx: usize, chunk_size: usize, total: usize) -> (usize, usize) {
    let start = (idx * chunk_size).min(total);
    let end = (start + chunk_size).min(total);
    (start, end)
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce<T: TensorElem, const RANK: usize>(
        &self,
        tensor: &mut Tensor<T, RANK>,
        op: ReduceOp,
    ) -> Result<()> {
        tracing::trace!(
            rank = self.rank,
            world_size = self.world_size,
            ?op,
            len = tensor.size(),
            "ring all_reduce"
        );

        let mut data: Chunk = tensor
            .data()
            .iter()
            .map(|v| {
                v.to_f64().ok_or_else(|| {
                    TensorError::Unsupported("element not representable as f64".into())
                })
            })
            .collect::<Result<_>>()?;
        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size);

        // --- Phase 1: Scatter-Reduce ---
        // Each step sends one chunk right and folds the chunk arriving from the left
        // into the local buffer. After world_size - 1 steps rank r holds the fully
        // reduced chunk r + 1.
        for step in 0..self.world_size - 1 {
            let (start, end) = chunk_bounds(self.chunk_index(step, 0), chunk_size, total_elements);
            self.send(&data[start..end])?;

            let (recv_start, recv_end) =
                chunk_bounds(self.chunk_index(step, -1), chunk_size, total_elements);
            let recv_data = self.recv(recv_end - recv_start)?;
            for (slot, val) in data[recv_start..recv_end].iter_mut().zip(recv_data) {
                *slot = op.combine(*slot, val);
            }
        }

        // --- Phase 2: All-Gather ---
        // Circulate the reduced chunks so every rank ends with every chunk.
        for step in 0..self.world_size - 1 {
            let (start, end) = chunk_bounds(self.chunk_index(step, 1), chunk_size, total_elements);
            self.send(&data[start..end])?;

            let (recv_start, recv_end) =
                chunk_bounds(self.chunk_index(step, 0), chunk_size, total_elements);
            let recv_data = self.recv(recv_end - recv_start)?;
            data[recv_start..recv_end].copy_from_slice(&recv_data);
        }

        for (out, val) in tensor.data_mut().iter_mut().zip(data) {
            *out = T::from_f64(val).ok_or_else(|| {
                TensorError::Unsupported(format!("reduced value {} does not fit element type", val))
            })?;
        }

        Ok(())
    }
}
