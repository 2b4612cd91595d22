use crate::classify::ClassifyError;
use crate::compile::CompileError;
use crate::distribution::{merge, MergeError, MergeOptions};
use crate::oracle::QuestionOracle;
use crate::question::Question;
use crate::stats::{UnitId, Units};
use crate::tree::{CapacityError, Node, NodeId, Tree};
use ordered_float::OrderedFloat;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Stopping policy and merge settings of a greedy tree build.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    min_splits: usize,
    max_splits: usize,
    split_threshold: f64,
    stop_on_nonpositive_gain: bool,
    relative_floor: bool,
    merge: MergeOptions,
}

impl TreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of splits after which the relative floor applies.
    pub fn min_splits(mut self, n: usize) -> Self {
        self.min_splits = n;
        self
    }

    pub fn max_splits(mut self, n: usize) -> Self {
        self.max_splits = n;
        self
    }

    /// Fraction of a node's own entropy its split must gain.
    pub fn split_threshold(mut self, threshold: f64) -> Self {
        self.split_threshold = threshold;
        self
    }

    pub fn stop_on_nonpositive_gain(mut self, enabled: bool) -> Self {
        self.stop_on_nonpositive_gain = enabled;
        self
    }

    pub fn relative_floor(mut self, enabled: bool) -> Self {
        self.relative_floor = enabled;
        self
    }

    pub fn merge(mut self, options: MergeOptions) -> Self {
        self.merge = options;
        self
    }

    pub fn merge_options(&self) -> &MergeOptions {
        &self.merge
    }

    /// Grows a tree over `members` by repeatedly splitting the leaf whose
    /// candidate question gains the most.
    pub fn build<O>(
        &self,
        members: &[UnitId],
        units: Units<'_>,
        oracle: &O,
    ) -> Result<BuildOutcome, BuildError>
    where
        O: QuestionOracle + ?Sized,
    {
        if members.is_empty() {
            return Err(BuildError::EmptyMembers);
        }

        let root = self.mk_node(members.to_vec(), units, oracle)?;
        let mut tree = Tree::new(root, 2 * self.max_splits + 1);
        let mut warnings = Vec::new();
        if tree.root().question().is_none() {
            warn!("no question splits the {} root units", members.len());
            warnings.push(Warning::NoRootQuestion);
            return Ok(BuildOutcome {
                tree,
                warnings,
                stop: StopReason::NoCandidate,
            });
        }

        let mut stop = StopReason::MaxSplits;
        for i in 0..self.max_splits {
            let id = match best_leaf(&tree) {
                Some(id) => id,
                None => {
                    info!("stop after {} splits: no leaf has a candidate question", i);
                    stop = StopReason::NoCandidate;
                    break;
                }
            };
            let node = tree.node(id).expect("never fails");
            let decrease = node.entropy_decrease();
            if self.stop_on_nonpositive_gain && decrease <= 0.0 {
                info!("stop after {} splits: best decrease {:e} <= 0", i, decrease);
                stop = StopReason::NonPositiveGain;
                break;
            }
            if self.relative_floor
                && i > self.min_splits
                && decrease < self.split_threshold * node.entropy()
            {
                info!(
                    "stop after {} splits: best decrease {:e} < {:e} * {:e}",
                    i,
                    decrease,
                    self.split_threshold,
                    node.entropy()
                );
                stop = StopReason::RelativeFloor;
                break;
            }

            info!("split {}: node {} gains {:e}", i, id, decrease);
            self.split_leaf(&mut tree, id, units, oracle)?;
        }

        Ok(BuildOutcome {
            tree,
            warnings,
            stop,
        })
    }

    fn mk_node<O>(&self, members: Vec<UnitId>, units: Units<'_>, oracle: &O) -> Result<Node, BuildError>
    where
        O: QuestionOracle + ?Sized,
    {
        let merged = merge(&members, units.stats(), &self.merge)?;
        let candidate = oracle.best_question(&members, &merged)?;
        let node = Node::from_merged(members, merged);
        Ok(match candidate {
            Some(c) => {
                debug!(
                    "{} units, entropy {:e}: best question {} gains {:e}",
                    node.members().len(),
                    node.entropy(),
                    c.question,
                    c.entropy_decrease
                );
                node.with_candidate(c.question, c.entropy_decrease)
            }
            None => node,
        })
    }

    fn split_leaf<O>(
        &self,
        tree: &mut Tree,
        id: NodeId,
        units: Units<'_>,
        oracle: &O,
    ) -> Result<(), BuildError>
    where
        O: QuestionOracle + ?Sized,
    {
        let node = tree.node(id).expect("never fails");
        let question: Question = node.question().cloned().expect("never fails");
        let (yes, no): (Vec<UnitId>, Vec<UnitId>) = node
            .members()
            .iter()
            .partition(|&&u| question.evaluate(units.context(u)));
        if yes.is_empty() || no.is_empty() {
            return Err(BuildError::InvalidPartition {
                node: id,
                question: question.to_string(),
            });
        }

        let yes = self.mk_node(yes, units, oracle)?;
        let no = self.mk_node(no, units, oracle)?;
        tree.split(id, question, yes, no)?;
        Ok(())
    }
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            min_splits: 1,
            max_splits: 5,
            split_threshold: 8e-4,
            stop_on_nonpositive_gain: true,
            relative_floor: true,
            merge: MergeOptions::default(),
        }
    }
}

/// The leaf with a candidate question and the highest decrease; the lowest
/// id wins ties.
fn best_leaf(tree: &Tree) -> Option<NodeId> {
    let mut leaves = tree
        .leaves()
        .into_iter()
        .filter(|&id| tree.node(id).map_or(false, |n| n.question().is_some()))
        .collect::<Vec<_>>();
    leaves.sort_unstable();
    leaves.into_iter().rev().max_by_key(|&id| {
        OrderedFloat(tree.node(id).map_or(f64::NEG_INFINITY, Node::entropy_decrease))
    })
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub tree: Tree,
    pub warnings: Vec<Warning>,
    pub stop: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No leaf has a question that separates its units.
    NoCandidate,
    NonPositiveGain,
    RelativeFloor,
    MaxSplits,
}

/// Degenerate inputs that still produce a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    NoRootQuestion,
    SingleClass,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NoRootQuestion => write!(f, "no question splits the root; the tree is a single leaf"),
            Warning::SingleClass => write!(f, "two-class clustering produced a single class"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("cannot build a tree over zero units")]
    EmptyMembers,

    #[error(transparent)]
    Merge(MergeError),

    #[error("node arena overflow: {requested} nodes requested, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("question {question} leaves one side of node {node} empty")]
    InvalidPartition { node: NodeId, question: String },

    #[error(transparent)]
    Classify(ClassifyError),

    #[error(transparent)]
    Compile(CompileError),
}

impl From<MergeError> for BuildError {
    fn from(f: MergeError) -> Self {
        Self::Merge(f)
    }
}

impl From<CapacityError> for BuildError {
    fn from(f: CapacityError) -> Self {
        Self::CapacityExceeded {
            requested: f.requested,
            available: f.available,
        }
    }
}

impl From<ClassifyError> for BuildError {
    fn from(f: ClassifyError) -> Self {
        Self::Classify(f)
    }
}

impl From<CompileError> for BuildError {
    fn from(f: CompileError) -> Self {
        Self::Compile(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_leaves, ExhaustiveTwoClass};
    use crate::distribution::Merged;
    use crate::oracle::Candidate;
    use crate::prune::{prune_tree, PruneOptions};
    use crate::question::Context;
    use crate::serialize::write_tree;
    use crate::testing::{self, ScriptedOracle};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn one_clean_split_then_stop() -> Result<(), anyhow::Error> {
        let sets = testing::phone_sets();
        let stats = testing::discrete_units(&[[9.0, 1.0], [9.0, 1.0], [1.0, 9.0], [1.0, 9.0]]);
        let contexts = [
            testing::context(0, 5),
            testing::context(1, 5),
            testing::context(3, 5),
            testing::context(4, 5),
        ];
        let units = Units::new(&stats, &contexts)?;
        let catalogue = crate::catalogue::QuestionCatalogue::generate(&sets, false);
        let oracle = crate::oracle::SimpleQuestionOracle::new(units, &catalogue, MergeOptions::default());

        let outcome = TreeOptions::default()
            .relative_floor(false)
            .build(&[0, 1, 2, 3], units, &oracle)?;

        assert_eq!(outcome.tree.count_nodes(), 3);
        assert_eq!(outcome.stop, StopReason::NonPositiveGain);
        assert!(outcome.warnings.is_empty());
        let yes = outcome.tree.node(1).map(|n| n.members().to_vec());
        let no = outcome.tree.node(2).map(|n| n.members().to_vec());
        let mut sides = vec![yes.unwrap_or_default(), no.unwrap_or_default()];
        sides.sort();
        assert_eq!(sides, vec![vec![0, 1], vec![2, 3]]);
        Ok(())
    }

    #[test]
    fn single_unit_is_a_single_leaf() -> Result<(), anyhow::Error> {
        let sets = testing::phone_sets();
        let stats = testing::discrete_units(&[[3.0, 1.0]]);
        let contexts = [testing::context(0, 5)];
        let units = Units::new(&stats, &contexts)?;
        let oracle = ScriptedOracle {
            contexts: &contexts,
            questions: vec![testing::question(&sets, "VOWEL", -1)],
        };

        let outcome = TreeOptions::default().build(&[0], units, &oracle)?;
        assert_eq!(outcome.tree.count_nodes(), 1);
        assert_eq!(outcome.warnings, vec![Warning::NoRootQuestion]);
        assert_eq!(outcome.stop, StopReason::NoCandidate);
        Ok(())
    }

    #[test]
    fn single_leaf_survives_pruning_and_classification() -> Result<(), anyhow::Error> {
        let sets = testing::phone_sets();
        let stats = testing::discrete_units(&[[3.0, 1.0]]);
        let contexts = [testing::context(0, 5)];
        let units = Units::new(&stats, &contexts)?;
        let oracle = ScriptedOracle {
            contexts: &contexts,
            questions: vec![testing::question(&sets, "VOWEL", -1)],
        };
        let mut tree = TreeOptions::default().build(&[0], units, &oracle)?.tree;

        let options = PruneOptions::new().min_occupancy(1e6).entropy_floor(1e6);
        assert_eq!(prune_tree(&mut tree, &options), 0);
        assert_eq!(tree.count_nodes(), 1);

        let result = classify_leaves(&mut tree, &MergeOptions::default(), &ExhaustiveTwoClass::new())?;
        assert_eq!(tree.count_nodes(), 1);
        assert_eq!(result.merged, 0);
        assert_eq!((result.class_a, result.class_b), (0, 1));
        assert_eq!(result.warning, Some(Warning::SingleClass));
        Ok(())
    }

    #[test]
    fn build_is_deterministic_and_respects_max_splits() -> Result<(), anyhow::Error> {
        let sets = testing::phone_sets();
        let stats = testing::discrete_units(&[[1.0, 1.0]; 6]);
        let contexts = (0..6).map(|p| testing::context(p, p)).collect::<Vec<_>>();
        let units = Units::new(&stats, &contexts)?;
        let oracle = ScriptedOracle {
            contexts: &contexts,
            questions: ["VOWEL", "FRONT", "STOP", "NASAL"]
                .iter()
                .map(|name| testing::question(&sets, name, -1))
                .collect(),
        };
        let options = TreeOptions::default().max_splits(3);

        let a = options.build(&[0, 1, 2, 3, 4, 5], units, &oracle)?;
        let b = options.build(&[0, 1, 2, 3, 4, 5], units, &oracle)?;
        assert_eq!(a.stop, StopReason::MaxSplits);
        assert_eq!(a.tree.count_nodes(), 7);
        assert_eq!(a.tree.preorder(), b.tree.preorder());
        for id in a.tree.preorder() {
            let (x, y) = (a.tree.node(id), b.tree.node(id));
            assert_eq!(x.map(Node::members), y.map(Node::members));
        }
        let (mut text_a, mut text_b) = (Vec::new(), Vec::new());
        write_tree(&mut text_a, &a.tree)?;
        write_tree(&mut text_b, &b.tree)?;
        assert_eq!(String::from_utf8(text_a)?, String::from_utf8(text_b)?);
        Ok(())
    }

    /// Fails every split by answering the same way for every unit.
    struct BrokenOracle(Question);

    impl QuestionOracle for BrokenOracle {
        fn best_question(&self, _: &[UnitId], _: &Merged) -> Result<Option<Candidate>, BuildError> {
            Ok(Some(Candidate {
                question: self.0.clone(),
                entropy_decrease: 1.0,
            }))
        }
    }

    #[test]
    fn one_sided_split_is_rejected() -> Result<(), anyhow::Error> {
        let sets = testing::phone_sets();
        let stats = testing::discrete_units(&[[1.0, 1.0], [1.0, 1.0]]);
        let contexts = [testing::context(0, 5), testing::context(1, 5)];
        let units = Units::new(&stats, &contexts)?;
        let oracle = BrokenOracle(testing::question(&sets, "VOWEL", -1));

        let err = TreeOptions::default().build(&[0, 1], units, &oracle).err();
        assert!(matches!(err, Some(BuildError::InvalidPartition { node: 0, .. })));
        Ok(())
    }

    #[test]
    fn best_leaf_prefers_the_lowest_id_on_ties() {
        let mut tree = testing::seven_node_tree();
        let sets = testing::phone_sets();
        for id in [4, 3, 6] {
            let node = tree.node_mut(id).expect("never fails");
            node.question = Some(testing::question(&sets, "NASAL", 1));
            node.entropy_decrease = 1.0;
        }
        assert_eq!(best_leaf(&tree), Some(3));
        tree.node_mut(6).expect("never fails").entropy_decrease = 2.0;
        assert_eq!(best_leaf(&tree), Some(6));
    }

    fn check_partitions(tree: &Tree) {
        for id in tree.preorder() {
            let node = tree.node(id).expect("never fails");
            if let Some(c) = node.children() {
                let yes = tree.node(c.yes).expect("never fails").members();
                let no = tree.node(c.no).expect("never fails").members();
                let yes_set = yes.iter().copied().collect::<BTreeSet<_>>();
                let no_set = no.iter().copied().collect::<BTreeSet<_>>();
                assert!(yes_set.is_disjoint(&no_set));
                let union = yes_set.union(&no_set).copied().collect::<BTreeSet<_>>();
                assert_eq!(union, node.members().iter().copied().collect::<BTreeSet<_>>());
            }
        }
    }

    proptest! {
        #[test]
        fn children_partition_their_parent(
            phones in prop::collection::vec((0u32..6, 0u32..6), 1..24),
            max_splits in 0usize..8,
        ) {
            let sets = testing::phone_sets();
            let stats = testing::discrete_units(&vec![[1.0, 2.0]; phones.len()]);
            let contexts = phones
                .iter()
                .map(|&(l, r)| testing::context(l, r))
                .collect::<Vec<Context>>();
            let units = Units::new(&stats, &contexts).expect("never fails");
            let mut questions = Vec::new();
            for name in ["VOWEL", "FRONT", "STOP", "NASAL"] {
                questions.push(testing::question(&sets, name, -1));
                questions.push(testing::question(&sets, name, 1));
            }
            let oracle = ScriptedOracle { contexts: &contexts, questions };
            let members = (0..phones.len()).collect::<Vec<_>>();

            let outcome = TreeOptions::default()
                .max_splits(max_splits)
                .relative_floor(false)
                .build(&members, units, &oracle)
                .expect("never fails");
            prop_assert!(outcome.tree.count_nodes() <= 2 * max_splits + 1);
            check_partitions(&outcome.tree);
        }
    }
}
