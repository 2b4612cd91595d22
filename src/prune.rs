use crate::tree::{NodeId, Tree};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    entropy_floor: Option<f64>,
    min_occupancy: Option<f64>,
}

impl PruneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse internal nodes whose own weighted entropy is below `floor`.
    pub fn entropy_floor(mut self, floor: f64) -> Self {
        self.entropy_floor = Some(floor);
        self
    }

    /// Collapse internal nodes with a child whose occupancy is below `min`.
    pub fn min_occupancy(mut self, min: f64) -> Self {
        self.min_occupancy = Some(min);
        self
    }
}

/// Removes the subtrees of every node failing `options`, top-down. Returns
/// the number of nodes removed.
///
/// Internal nodes read back from a tree file have no entropy, so only the
/// occupancy rule applies to them.
pub fn prune_tree(tree: &mut Tree, options: &PruneOptions) -> usize {
    let mut removed = 0;
    let mut stack = vec![0];
    while let Some(id) = stack.pop() {
        let node = match tree.node(id) {
            Some(n) => n,
            None => continue,
        };
        let c = match node.children() {
            Some(c) => c,
            None => continue,
        };
        let low_entropy = options.entropy_floor.map_or(false, |f| node.entropy() < f);
        let low_count = options.min_occupancy.map_or(false, |min| {
            [c.yes, c.no]
                .iter()
                .any(|&child| tree.node(child).map_or(false, |n| n.occupancy() < min))
        });
        if low_entropy || low_count {
            let n = tree.detach_children(id);
            debug!("pruned {} nodes below node {}", n, id);
            removed += n;
        } else {
            stack.push(c.no);
            stack.push(c.yes);
        }
    }
    removed
}

/// Collapses twigs across `trees`, cheapest split first, until at most
/// `wanted` leaves remain or no twig is left. Returns the final leaf count.
pub fn prune_to_leaf_count(trees: &mut [Tree], wanted: usize) -> usize {
    let mut leaves = trees.iter().map(Tree::count_leaves).sum::<usize>();
    info!("{} leaves before pruning, {} wanted", leaves, wanted);
    if leaves <= wanted {
        return leaves;
    }

    let mut heap = BinaryHeap::new();
    for (t, tree) in trees.iter().enumerate() {
        for id in tree.preorder() {
            if tree.is_twig(id) {
                heap.push(twig_key(tree, t, id));
            }
        }
    }

    while leaves > wanted {
        let Reverse((_, t, id)) = match heap.pop() {
            Some(k) => k,
            None => {
                warn!("ran out of twigs with {} leaves left, {} wanted", leaves, wanted);
                break;
            }
        };
        let tree = &mut trees[t];
        tree.detach_children(id);
        leaves -= 1;

        match tree.node(id).and_then(|n| n.parent()) {
            Some(parent) if tree.is_twig(parent) => heap.push(twig_key(tree, t, parent)),
            Some(_) => {}
            None => info!("tree {} reduced to its root", t),
        }
    }
    leaves
}

fn twig_key(tree: &Tree, t: usize, id: NodeId) -> Reverse<(OrderedFloat<f64>, usize, NodeId)> {
    let decrease = tree.node(id).map_or(f64::INFINITY, |n| n.entropy_decrease());
    Reverse((OrderedFloat(decrease), t, id))
}
