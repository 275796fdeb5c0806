//! Autograd integration for [`DistCrossEntropy`].
//!
//! Registers the sharded loss as one node of the tape: one input (the logits shard),
//! one scalar output. The target ids are plain data and receive no gradient.

use super::config::CrossEntropyConfig;
use super::dist_cross_entropy::{CrossEntropyContext, DistCrossEntropy};
use crate::autograd::{GraphNode, Variable};
use crate::distributed::backend::CollectiveBackend;
use crate::tensor::{Cpu, FloatElem, Result, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct DistCrossEntropyNode<T: FloatElem> {
    engine: DistCrossEntropy,
    /// Saved forward state, taken by the first backward.
    ctx: RefCell<Option<CrossEntropyContext<T>>>,
    /// Gradient of the logits shard.
    input_grad: Rc<RefCell<Option<Tensor<T, 3, Cpu>>>>,
    /// Gradient of the scalar loss.
    out_grad: Rc<RefCell<Option<Tensor<T, 0, Cpu>>>>,
    parents: Vec<Rc<dyn GraphNode>>,
}

impl<T: FloatElem + 'static> GraphNode for DistCrossEntropyNode<T> {
    fn backward(&self) {
        let Some(grad_output) = self.out_grad.borrow().as_ref().map(|g| g.data()[0]) else {
            return;
        };
        let Some(ctx) = self.ctx.borrow_mut().take() else {
            tracing::warn!("dist cross entropy backward ran twice; saved state already released");
            return;
        };

        match self.engine.backward(ctx, grad_output) {
            Ok(dx) => {
                let mut input = self.input_grad.borrow_mut();
                match input.as_mut() {
                    Some(acc) => match &*acc + &dx {
                        Ok(sum) => *acc = sum,
                        Err(err) => tracing::error!(%err, "failed to accumulate logits gradient"),
                    },
                    None => *input = Some(dx),
                }
            }
            Err(err) => tracing::error!(%err, "dist cross entropy backward failed"),
        }
    }

    fn parents(&self) -> Vec<Rc<dyn GraphNode>> {
        self.parents.clone()
    }
}

/// Sharded cross-entropy as a differentiable operation.
///
/// Runs the forward immediately (issuing its three collectives) and returns the scalar
/// loss as a [`Variable`]. Calling `backward()` on it, or on anything computed from
/// it, accumulates the local-shard gradient into `logits.grad`.
///
/// The logits data is cloned: the `Variable` keeps its value while the engine consumes
/// the copy as its softmax buffer.
///
/// ```rust
/// use shardformer::autograd::Variable;
/// use shardformer::distributed::LocalBackend;
/// use shardformer::loss::{CrossEntropyConfig, dist_cross_entropy};
/// use shardformer::tensor::Tensor;
///
/// let logits = Variable::new(Tensor::<f32, 3>::zeros([1, 1, 4]));
/// let target = Tensor::<i64, 2>::new(vec![2], [1, 1]).unwrap();
///
/// let loss = dist_cross_entropy(&logits, &target, &LocalBackend, &CrossEntropyConfig::default())
///     .unwrap();
/// loss.backward();
///
/// let grad = logits.grad.borrow();
/// assert!((grad.as_ref().unwrap().data()[2] + 0.75).abs() < 1e-6);
/// ```
pub fn dist_cross_entropy<T, B>(
    logits: &Variable<T, 3>,
    target: &Tensor<i64, 2>,
    backend: &B,
    config: &CrossEntropyConfig,
) -> Result<Variable<T, 0>>
where
    T: FloatElem + 'static,
    B: CollectiveBackend,
{
    let engine = DistCrossEntropy::new(config.clone());
    let (loss, ctx) = engine.forward(logits.data.clone(), target, backend)?;

    let out_grad = Rc::new(RefCell::new(None));
    let node = Rc::new(DistCrossEntropyNode {
        engine,
        ctx: RefCell::new(Some(ctx)),
        input_grad: logits.grad.clone(),
        out_grad: out_grad.clone(),
        parents: logits.node.iter().cloned().collect(),
    });

    Ok(Variable {
        data: Tensor::new(vec![loss], [])?,
        grad: out_grad,
        node: Some(node),
    })
}

/// Drop-in replacement for a dense cross-entropy call: default configuration.
pub fn apply_dist_cross_entropy<T, B>(
    logits: &Variable<T, 3>,
    target: &Tensor<i64, 2>,
    backend: &B,
) -> Result<Variable<T, 0>>
where
    T: FloatElem + 'static,
    B: CollectiveBackend,
{
    dist_cross_entropy(logits, target, backend, &CrossEntropyConfig::default())
}
