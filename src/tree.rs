use crate::distribution::{Distribution, Merged};
use crate::question::{Context, Question};
use crate::serialize::Sci;
use crate::stats::UnitId;
use std::fmt;
use thiserror::Error;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Children {
    pub yes: NodeId,
    pub no: NodeId,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) members: Vec<UnitId>,
    pub(crate) distribution: Option<Distribution>,
    pub(crate) entropy: f64,
    pub(crate) occupancy: f64,
    pub(crate) question: Option<Question>,
    pub(crate) entropy_decrease: f64,
    pub(crate) children: Option<Children>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) cluster: Option<u32>,
}

impl Node {
    pub fn new(members: Vec<UnitId>, entropy: f64, occupancy: f64) -> Self {
        Self {
            id: 0,
            members,
            distribution: None,
            entropy,
            occupancy,
            question: None,
            entropy_decrease: 0.0,
            children: None,
            parent: None,
            cluster: None,
        }
    }

    pub fn from_merged(members: Vec<UnitId>, merged: Merged) -> Self {
        let mut node = Self::new(members, merged.weighted_entropy, merged.occupancy);
        node.distribution = Some(merged.distribution);
        node
    }

    /// Records the best question found for this node without splitting it.
    pub fn with_candidate(mut self, question: Question, entropy_decrease: f64) -> Self {
        self.question = Some(question);
        self.entropy_decrease = entropy_decrease;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn members(&self) -> &[UnitId] {
        &self.members
    }

    pub fn distribution(&self) -> Option<&Distribution> {
        self.distribution.as_ref()
    }

    /// Weighted entropy of the unsplit node. `NaN` for internal nodes read
    /// back from a tree file, which only records their decrease.
    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    pub fn occupancy(&self) -> f64 {
        self.occupancy
    }

    /// The splitting question of an internal node, or the best candidate of
    /// a leaf.
    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn entropy_decrease(&self) -> f64 {
        self.entropy_decrease
    }

    pub fn children(&self) -> Option<Children> {
        self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn cluster(&self) -> Option<u32> {
        self.cluster
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Arena of nodes. The root is always node 0 and ids are never reused.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    capacity: usize,
}

impl Tree {
    pub fn new(mut root: Node, capacity: usize) -> Self {
        root.id = 0;
        root.parent = None;
        Self {
            nodes: vec![Some(root)],
            capacity: capacity.max(1),
        }
    }

    /// `nodes[i]` must carry id `i` and consistent links.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        let capacity = nodes.len();
        Self {
            nodes: nodes.into_iter().map(Some).collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids handed out so far, including pruned ones.
    pub fn slots(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> &Node {
        self.nodes[0].as_ref().expect("never fails")
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut())
    }

    fn get(&self, id: NodeId) -> &Node {
        self.node(id).expect("never fails")
    }

    /// Turns leaf `id` into an internal node asking `question`.
    pub fn split(
        &mut self,
        id: NodeId,
        question: Question,
        mut yes: Node,
        mut no: Node,
    ) -> Result<Children, CapacityError> {
        let requested = self.nodes.len() + 2;
        if requested > self.capacity {
            return Err(CapacityError {
                requested,
                available: self.capacity,
            });
        }
        let children = Children {
            yes: self.nodes.len(),
            no: self.nodes.len() + 1,
        };
        yes.id = children.yes;
        no.id = children.no;
        yes.parent = Some(id);
        no.parent = Some(id);
        self.nodes.push(Some(yes));
        self.nodes.push(Some(no));

        let parent = self.node_mut(id).expect("never fails");
        parent.question = Some(question);
        parent.children = Some(children);
        Ok(children)
    }

    /// Deletes both subtrees of `id`, making it a leaf. Returns the number of
    /// nodes removed.
    pub fn detach_children(&mut self, id: NodeId) -> usize {
        let children = match self.node_mut(id).and_then(|n| n.children.take()) {
            Some(c) => c,
            None => return 0,
        };
        let mut removed = 0;
        let mut stack = vec![children.yes, children.no];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(id).and_then(Option::take) {
                removed += 1;
                if let Some(c) = node.children {
                    stack.push(c.yes);
                    stack.push(c.no);
                }
            }
        }
        removed
    }

    /// Reachable node ids, parent first, yes subtree before no subtree.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(c) = self.get(id).children {
                stack.push(c.no);
                stack.push(c.yes);
            }
        }
        order
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.get(id).is_leaf())
            .collect()
    }

    pub fn count_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn count_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// A twig is an internal node whose children are both leaves.
    pub fn is_twig(&self, id: NodeId) -> bool {
        match self.node(id).and_then(|n| n.children) {
            Some(c) => self.get(c.yes).is_leaf() && self.get(c.no).is_leaf(),
            None => false,
        }
    }

    pub fn count_twigs(&self) -> usize {
        self.preorder()
            .into_iter()
            .filter(|&id| self.is_twig(id))
            .count()
    }

    /// The leaf a unit with `context` ends up in.
    pub fn route(&self, context: &Context) -> NodeId {
        let mut id = 0;
        loop {
            let node = self.get(id);
            match (node.children, &node.question) {
                (Some(c), Some(q)) => id = if q.evaluate(context) { c.yes } else { c.no },
                _ => return id,
            }
        }
    }

    pub fn tied_state(&self, context: &Context) -> Option<u32> {
        self.get(self.route(context)).cluster
    }

    /// Numbers the leaves `first, first + 1, ...` in pre-order and returns
    /// the next free number.
    pub fn label_leaves(&mut self, first: u32) -> u32 {
        let mut next = first;
        for id in self.leaves() {
            self.nodes[id].as_mut().expect("never fails").cluster = Some(next);
            next += 1;
        }
        next
    }

    /// Renumbers the reachable nodes in pre-order, dropping pruned slots.
    pub fn reindex(&mut self) {
        let order = self.preorder();
        let mut new_id = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            new_id[old] = new;
        }
        let mut nodes = Vec::with_capacity(order.len());
        for &old in &order {
            let mut node = self.nodes[old].take().expect("never fails");
            node.id = new_id[old];
            node.parent = node.parent.map(|p| new_id[p]);
            node.children = node.children.map(|c| Children {
                yes: new_id[c.yes],
                no: new_id[c.no],
            });
            nodes.push(Some(node));
        }
        self.nodes = nodes;
    }

    pub fn display(&self) -> TreeDisplay<'_> {
        TreeDisplay { tree: self }
    }
}

/// Indented rendering of a tree, one node per line.
#[derive(Debug)]
pub struct TreeDisplay<'a> {
    tree: &'a Tree,
}

impl fmt::Display for TreeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(0, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = self.tree.get(id);
            write!(f, "{:width$}({} ", "", id, width = depth * 4)?;
            match (node.children, &node.question) {
                (Some(c), Some(q)) => {
                    writeln!(
                        f,
                        "{} {} {} {})",
                        q,
                        Sci::new(node.entropy, 3),
                        Sci::new(node.entropy_decrease, 3),
                        Sci::new(node.occupancy, 3)
                    )?;
                    stack.push((c.no, depth + 1));
                    stack.push((c.yes, depth + 1));
                }
                _ => {
                    write!(
                        f,
                        "- {} {} {}",
                        Sci::new(node.entropy, 3),
                        node.members.len(),
                        Sci::new(node.occupancy, 3)
                    )?;
                    if let Some(c) = node.cluster {
                        write!(f, " [{}]", c)?;
                    }
                    writeln!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("node arena is full: {requested} nodes requested, {available} available")]
pub struct CapacityError {
    pub requested: usize,
    pub available: usize,
}
