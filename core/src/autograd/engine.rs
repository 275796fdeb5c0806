use super::GraphNode;
use std::collections::HashSet;
use std::rc::Rc;

/// Runs every node reachable from `root`, outputs before inputs.
pub fn backward(root: Option<Rc<dyn GraphNode>>) {
    let Some(root) = root else { return };

    let mut topo = Vec::new();
    let mut visited = HashSet::new();
    build_topo(root, &mut topo, &mut visited);

    tracing::trace!(nodes = topo.len(), "replaying tape");
    for node in topo.into_iter().rev() {
        node.backward();
    }
}

fn build_topo(
    node: Rc<dyn GraphNode>,
    topo: &mut Vec<Rc<dyn GraphNode>>,
    visited: &mut HashSet<*const ()>,
) {
    // Node identity is the data pointer; the vtable half of the fat pointer is dropped.
    let ptr = Rc::as_ptr(&node) as *const ();
    if !visited.insert(ptr) {
        return;
    }

    for parent in node.parents() {
        build_topo(parent, topo, visited);
    }

    topo.push(node);
}
