use crate::builder::Warning;
use crate::distribution::{combine, split_gain, Distribution, MergeError, MergeOptions};
use crate::tree::{NodeId, Tree};
use itertools::Itertools as _;
use thiserror::Error;
use tracing::{debug, warn};

/// Leaf assignment produced by a [`TwoClassClusterer`]: `classes[i]` is 1
/// for leaves of class A and 0 for class B.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoClass {
    pub classes: Vec<u32>,
    pub entropy_decrease: f64,
}

pub trait TwoClassClusterer {
    fn two_class(
        &self,
        leaves: &[&Distribution],
        options: &MergeOptions,
    ) -> Result<TwoClass, ClassifyError>;
}

/// Scores every split of the leaves into two non-empty groups.
#[derive(Debug, Clone)]
pub struct ExhaustiveTwoClass {
    max_leaves: usize,
}

impl ExhaustiveTwoClass {
    pub fn new() -> Self {
        Self::default()
    }

    /// The search visits `2^n` subsets, so larger inputs are refused.
    pub fn max_leaves(mut self, n: usize) -> Self {
        self.max_leaves = n;
        self
    }
}

impl Default for ExhaustiveTwoClass {
    fn default() -> Self {
        Self { max_leaves: 16 }
    }
}

impl TwoClassClusterer for ExhaustiveTwoClass {
    fn two_class(
        &self,
        leaves: &[&Distribution],
        options: &MergeOptions,
    ) -> Result<TwoClass, ClassifyError> {
        let n = leaves.len();
        if n < 2 {
            return Ok(TwoClass {
                classes: vec![0; n],
                entropy_decrease: 0.0,
            });
        }
        if n > self.max_leaves {
            return Err(ClassifyError::TooManyLeaves {
                leaves: n,
                max: self.max_leaves,
            });
        }

        let parent = combine(leaves, options)?;
        let mut best: Option<(f64, Vec<bool>)> = None;
        for size in 1..n {
            for subset in (0..n).combinations(size) {
                let mut in_a = vec![false; n];
                for i in subset {
                    in_a[i] = true;
                }
                let (a, b): (Vec<_>, Vec<_>) = leaves
                    .iter()
                    .zip(&in_a)
                    .partition_map(|(&d, &in_a)| {
                        if in_a {
                            itertools::Either::Left(d)
                        } else {
                            itertools::Either::Right(d)
                        }
                    });
                let a = combine(&a, options)?;
                let b = combine(&b, options)?;
                let gain = split_gain(
                    options.kind(),
                    parent.weighted_entropy,
                    a.weighted_entropy,
                    b.weighted_entropy,
                );
                if best.as_ref().map_or(true, |(g, _)| *g < gain) {
                    best = Some((gain, in_a));
                }
            }
        }

        let (entropy_decrease, in_a) = best.expect("never fails");
        Ok(TwoClass {
            classes: in_a.into_iter().map(u32::from).collect(),
            entropy_decrease,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Leaves of class A (cluster 1) after merging.
    pub class_a: usize,
    /// Leaves of class B (cluster 0) after merging.
    pub class_b: usize,
    pub entropy_decrease: f64,
    /// Nodes removed by the sibling merge.
    pub merged: usize,
    pub warning: Option<Warning>,
}

/// Assigns every leaf of `tree` to one of two classes, then collapses
/// siblings that ended up in the same class.
///
/// Leaves must carry their distributions, as built trees do. Trees read back
/// from a file have none and fail with
/// [`ClassifyError::MissingStatistics`]; the distributions are not
/// recomputed here.
pub fn classify_leaves<C>(
    tree: &mut Tree,
    options: &MergeOptions,
    clusterer: &C,
) -> Result<Classification, ClassifyError>
where
    C: TwoClassClusterer + ?Sized,
{
    let leaves = tree.leaves();
    let distributions = leaves
        .iter()
        .map(|&id| {
            tree.node(id)
                .and_then(|n| n.distribution())
                .ok_or(ClassifyError::MissingStatistics { node: id })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let two = clusterer.two_class(&distributions, options)?;
    if two.classes.len() != leaves.len() {
        return Err(ClassifyError::BadAssignment {
            expected: leaves.len(),
            actual: two.classes.len(),
        });
    }

    for (&id, &class) in leaves.iter().zip(&two.classes) {
        if let Some(node) = tree.node_mut(id) {
            node.cluster = Some(class);
        }
    }
    let merged = merge_same_class_siblings(tree);
    let (class_a, class_b) = count_classes(tree);
    debug!(
        "{} leaves -> {} in class A, {} in class B, decrease {:e}",
        leaves.len(),
        class_a,
        class_b,
        two.entropy_decrease
    );

    let warning = if class_a == 0 || class_b == 0 {
        warn!("{}", Warning::SingleClass);
        Some(Warning::SingleClass)
    } else {
        None
    };
    Ok(Classification {
        class_a,
        class_b,
        entropy_decrease: two.entropy_decrease,
        merged,
        warning,
    })
}

/// Bottom-up: a node whose children are leaves of the same cluster becomes
/// a leaf of that cluster. Returns the number of nodes removed.
pub fn merge_same_class_siblings(tree: &mut Tree) -> usize {
    let mut removed = 0;
    for id in tree.preorder().into_iter().rev() {
        let cluster = match same_class_children(tree, id) {
            Some(c) => c,
            None => continue,
        };
        removed += tree.detach_children(id);
        if let Some(node) = tree.node_mut(id) {
            node.cluster = Some(cluster);
        }
    }
    removed
}

fn same_class_children(tree: &Tree, id: NodeId) -> Option<u32> {
    let c = tree.node(id)?.children()?;
    let (yes, no) = (tree.node(c.yes)?, tree.node(c.no)?);
    if !yes.is_leaf() || !no.is_leaf() {
        return None;
    }
    match (yes.cluster(), no.cluster()) {
        (Some(a), Some(b)) if a == b => Some(a),
        _ => None,
    }
}

/// Leaf counts of (class A, class B); leaves without a non-zero cluster
/// count as class B.
pub fn count_classes(tree: &Tree) -> (usize, usize) {
    tree.leaves()
        .into_iter()
        .filter_map(|id| tree.node(id))
        .fold((0, 0), |(a, b), n| match n.cluster() {
            Some(c) if c != 0 => (a + 1, b),
            _ => (a, b + 1),
        })
}

#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    #[error(transparent)]
    Merge(MergeError),

    #[error("leaf {node} carries no statistics to cluster")]
    MissingStatistics { node: NodeId },

    #[error("{leaves} leaves exceed the exhaustive search limit of {max}")]
    TooManyLeaves { leaves: usize, max: usize },

    #[error("clusterer assigned {actual} leaves, expected {expected}")]
    BadAssignment { expected: usize, actual: usize },
}

impl From<MergeError> for ClassifyError {
    fn from(f: MergeError) -> Self {
        Self::Merge(f)
    }
}
