//! Reverse-mode automatic differentiation.
//!
//! A tape of [`GraphNode`]s is built as operations run. Each [`Variable`] holds its value, a
//! shared gradient cell and the node that produced it. [`Variable::backward`] seeds the
//! root gradient with ones and replays the tape in reverse topological order; every node
//! reads the gradient of its output and accumulates into the gradient cells of its inputs.
//!
//! The sharded loss registers itself here through [`crate::loss::dist_cross_entropy`], so
//! its gradient flows into an LM head the same way any other operation's would.
//!
//! ```rust
//! use shardformer::autograd::Variable;
//! use shardformer::tensor::Tensor;
//!
//! // y = x * x at x = 3, dy/dx = 6
//! let x = Variable::new(Tensor::<f64, 0>::new(vec![3.0], []).unwrap());
//! let y = (x.clone() * x.clone()).unwrap();
//! y.backward();
//!
//! let grad = x.grad.borrow();
//! assert_eq!(grad.as_ref().unwrap().data()[0], 6.0);
//! ```
//!
//! > [!TIP]
//! > **Expert Note: Define-by-Run**
//! > The tape is implicit in the `Rc<dyn GraphNode>` links. Nodes are `Rc`, not `Arc`: a
//! > tape lives on one rank's thread, and ranks only meet inside collectives.

use crate::tensor::{Cpu, Tensor, TensorElem};
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

pub mod engine;
pub mod ops;

/// A node in the computation graph.
///
/// This trait represents an operation that can be backpropagated through.
pub trait GraphNode: Debug {
    /// Computes the gradient for this node and propagates it to its parents.
    fn backward(&self);
    /// Returns the parent nodes of this node.
    fn parents(&self) -> Vec<Rc<dyn GraphNode>>;
}

/// A variable in the computation graph.
///
/// Wraps a `Tensor` and tracks its gradient and the operation that created it.
#[derive(Clone, Debug)]
pub struct Variable<T, const RANK: usize>
where
    T: TensorElem,
{
    /// The actual tensor data.
    pub data: Tensor<T, RANK, Cpu>,
    /// The gradient of the loss with respect to this variable.
    pub grad: Rc<RefCell<Option<Tensor<T, RANK, Cpu>>>>,
    /// The node in the computation graph that produced this variable.
    pub node: Option<Rc<dyn GraphNode>>,
}

impl<T, const RANK: usize> Variable<T, RANK>
where
    T: TensorElem + 'static,
{
    /// Creates a new leaf variable.
    ///
    /// Leaf variables are the inputs to the computation graph (e.g., weights, input data).
    /// They do not have a parent node.
    pub fn new(data: Tensor<T, RANK, Cpu>) -> Self {
        Self {
            data,
            grad: Rc::new(RefCell::new(None)),
            node: None,
        }
    }

    /// Triggers the backward pass starting from this variable.
    ///
    /// This variable is typically the loss value (a scalar).
    /// The gradient of this variable is seeded with 1.0.
    pub fn backward(&self) {
        if self.grad.borrow().is_none() {
            *self.grad.borrow_mut() = Some(Tensor::ones(*self.data.shape()));
        }

        engine::backward(self.node.clone());
    }
}
