//! Element-wise arithmetic on [`Variable`]s.
//!
//! Enough to combine losses on the tape: summing several loss terms, or weighting one by
//! a constant held in another `Variable`. Both operators return a `Result` because the
//! underlying tensor arithmetic checks shapes.

use super::{GraphNode, Variable};
use crate::tensor::{Cpu, Result, Tensor, TensorElem};
use std::cell::RefCell;
use std::ops::{Add, Mul};
use std::rc::Rc;

type GradCell<T, const RANK: usize> = Rc<RefCell<Option<Tensor<T, RANK, Cpu>>>>;

/// Adds `grad` into `cell`, initializing it on first use.
fn accumulate<T: TensorElem, const RANK: usize>(cell: &GradCell<T, RANK>, grad: Tensor<T, RANK, Cpu>) {
    let mut slot = cell.borrow_mut();
    match slot.as_mut() {
        Some(acc) => match &*acc + &grad {
            Ok(sum) => *acc = sum,
            Err(err) => tracing::error!(%err, "gradient accumulation failed"),
        },
        None => *slot = Some(grad),
    }
}

fn parents_of<T: TensorElem, const RANK: usize>(
    lhs: &Variable<T, RANK>,
    rhs: &Variable<T, RANK>,
) -> Vec<Rc<dyn GraphNode>> {
    lhs.node.iter().chain(rhs.node.iter()).cloned().collect()
}

// --- Add Node ---
#[derive(Debug)]
struct AddNode<T: TensorElem, const RANK: usize> {
    lhs_grad: GradCell<T, RANK>,
    rhs_grad: GradCell<T, RANK>,
    /// Gradient of the sum, written by whatever consumes it.
    out_grad: GradCell<T, RANK>,
    parents: Vec<Rc<dyn GraphNode>>,
}

impl<T: TensorElem, const RANK: usize> GraphNode for AddNode<T, RANK> {
    fn backward(&self) {
        let Some(grad) = self.out_grad.borrow().clone() else {
            return;
        };
        // d(x+y)/dx = d(x+y)/dy = 1
        accumulate(&self.lhs_grad, grad.clone());
        accumulate(&self.rhs_grad, grad);
    }

    fn parents(&self) -> Vec<Rc<dyn GraphNode>> {
        self.parents.clone()
    }
}

impl<T: TensorElem + 'static, const RANK: usize> Add for Variable<T, RANK> {
    type Output = Result<Variable<T, RANK>>;

    fn add(self, rhs: Self) -> Self::Output {
        let data = (&self.data + &rhs.data)?;
        let out_grad = Rc::new(RefCell::new(None));
        let node = Rc::new(AddNode {
            lhs_grad: self.grad.clone(),
            rhs_grad: rhs.grad.clone(),
            out_grad: out_grad.clone(),
            parents: parents_of(&self, &rhs),
        });

        Ok(Variable {
            data,
            grad: out_grad,
            node: Some(node),
        })
    }
}

// --- Mul Node ---
#[derive(Debug)]
struct MulNode<T: TensorElem, const RANK: usize> {
    /// Operand values saved for the product rule.
    lhs_data: Tensor<T, RANK, Cpu>,
    rhs_data: Tensor<T, RANK, Cpu>,
    lhs_grad: GradCell<T, RANK>,
    rhs_grad: GradCell<T, RANK>,
    out_grad: GradCell<T, RANK>,
    parents: Vec<Rc<dyn GraphNode>>,
}

impl<T: TensorElem, const RANK: usize> GraphNode for MulNode<T, RANK> {
    fn backward(&self) {
        let Some(grad) = self.out_grad.borrow().clone() else {
            return;
        };
        // d(x*y)/dx = y, d(x*y)/dy = x
        match (&grad * &self.rhs_data, &grad * &self.lhs_data) {
            (Ok(dx), Ok(dy)) => {
                accumulate(&self.lhs_grad, dx);
                accumulate(&self.rhs_grad, dy);
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::error!(%err, "mul backward failed");
            }
        }
    }

    fn parents(&self) -> Vec<Rc<dyn GraphNode>> {
        self.parents.clone()
    }
}

impl<T: TensorElem + 'static, const RANK: usize> Mul for Variable<T, RANK> {
    type Output = Result<Variable<T, RANK>>;

    fn mul(self, rhs: Self) -> Self::Output {
        let data = (&self.data * &rhs.data)?;
        let out_grad = Rc::new(RefCell::new(None));
        let node = Rc::new(MulNode {
            lhs_data: self.data.clone(),
            rhs_data: rhs.data.clone(),
            lhs_grad: self.grad.clone(),
            rhs_grad: rhs.grad.clone(),
            out_grad: out_grad.clone(),
            parents: parents_of(&self, &rhs),
        });

        Ok(Variable {
            data,
            grad: out_grad,
            node: Some(node),
        })
    }
}
