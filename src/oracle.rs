use crate::builder::{BuildError, TreeOptions};
use crate::catalogue::QuestionCatalogue;
use crate::classify::{classify_leaves, TwoClassClusterer};
use crate::compile::compile;
use crate::distribution::{merge, split_gain, MergeOptions, Merged};
use crate::question::Question;
use crate::stats::{UnitId, Units};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub question: Question,
    pub entropy_decrease: f64,
}

/// Finds the question that best splits a node.
pub trait QuestionOracle {
    /// Returns `None` when no question separates `members`.
    fn best_question(
        &self,
        members: &[UnitId],
        merged: &Merged,
    ) -> Result<Option<Candidate>, BuildError>;
}

/// Tries every simple question of a catalogue.
#[derive(Debug, Clone)]
pub struct SimpleQuestionOracle<'a> {
    units: Units<'a>,
    catalogue: &'a QuestionCatalogue,
    options: MergeOptions,
}

impl<'a> SimpleQuestionOracle<'a> {
    pub fn new(units: Units<'a>, catalogue: &'a QuestionCatalogue, options: MergeOptions) -> Self {
        Self {
            units,
            catalogue,
            options,
        }
    }
}

impl QuestionOracle for SimpleQuestionOracle<'_> {
    fn best_question(
        &self,
        members: &[UnitId],
        merged: &Merged,
    ) -> Result<Option<Candidate>, BuildError> {
        let n_state = self.units.stats().shape().n_state();
        let mut best: Option<Candidate> = None;
        for q in self.catalogue.iter() {
            let (yes, no): (Vec<UnitId>, Vec<UnitId>) = members
                .iter()
                .partition(|&&u| q.evaluate(self.units.context(u)));
            if yes.is_empty() || no.is_empty() {
                continue;
            }
            let yes = merge(&yes, self.units.stats(), &self.options)?;
            let no = merge(&no, self.units.stats(), &self.options)?;
            let occupied = |m: &Merged| (0..n_state).all(|s| m.distribution.occupancy(s, 0) > 0.0);
            if !occupied(&yes) || !occupied(&no) {
                continue;
            }

            let gain = split_gain(
                self.options.kind(),
                merged.weighted_entropy,
                yes.weighted_entropy,
                no.weighted_entropy,
            );
            if best.as_ref().map_or(true, |b| b.entropy_decrease < gain) {
                best = Some(Candidate {
                    question: Question::Simple(q.clone()),
                    entropy_decrease: gain,
                });
            }
        }
        Ok(best)
    }
}

/// Builds a small tree of simple questions over the node, clusters its
/// leaves into two classes and asks whether a unit falls in the class with
/// fewer leaves.
#[derive(Debug, Clone)]
pub struct CompositeQuestionOracle<'a, C> {
    units: Units<'a>,
    simple: SimpleQuestionOracle<'a>,
    simple_tree: TreeOptions,
    clusterer: C,
}

impl<'a, C> CompositeQuestionOracle<'a, C>
where
    C: TwoClassClusterer,
{
    /// `simple_tree` bounds the inner tree and carries the merge options.
    pub fn new(
        units: Units<'a>,
        catalogue: &'a QuestionCatalogue,
        simple_tree: TreeOptions,
        clusterer: C,
    ) -> Self {
        let simple = SimpleQuestionOracle::new(units, catalogue, simple_tree.merge_options().clone());
        Self {
            units,
            simple,
            simple_tree,
            clusterer,
        }
    }
}

impl<C> QuestionOracle for CompositeQuestionOracle<'_, C>
where
    C: TwoClassClusterer,
{
    fn best_question(
        &self,
        members: &[UnitId],
        _merged: &Merged,
    ) -> Result<Option<Candidate>, BuildError> {
        let mut tree = self.simple_tree.build(members, self.units, &self.simple)?.tree;
        if tree.count_leaves() < 2 {
            return Ok(None);
        }
        debug!("simple tree for {} units:\n{}", members.len(), tree.display());

        let classification =
            classify_leaves(&mut tree, self.simple_tree.merge_options(), &self.clusterer)?;
        if classification.warning.is_some() {
            return Ok(None);
        }

        let target = if classification.class_b > classification.class_a { 1 } else { 0 };
        let mut question = compile(&tree, target)?;
        question.simplify();

        Ok(Some(Candidate {
            question: Question::Composite(question),
            entropy_decrease: classification.entropy_decrease,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ExhaustiveTwoClass;
    use crate::question::{Context, PhoneSets};
    use crate::stats::StatsTable;
    use crate::testing;

    fn fixture() -> (PhoneSets, StatsTable, Vec<Context>) {
        // Units with a vowel on the left look alike, as do units with a stop
        // on the right.
        let stats = testing::discrete_units(&[
            [9.0, 1.0],
            [9.0, 1.0],
            [1.0, 9.0],
            [1.0, 9.0],
            [5.0, 5.0],
        ]);
        let contexts = vec![
            testing::context(0, 5),
            testing::context(1, 5),
            testing::context(3, 4),
            testing::context(5, 3),
            testing::context(5, 5),
        ];
        (testing::phone_sets(), stats, contexts)
    }

    #[test]
    fn simple_oracle_finds_the_separating_question() -> Result<(), anyhow::Error> {
        let (sets, stats, contexts) = fixture();
        let units = Units::new(&stats, &contexts)?;
        let catalogue = QuestionCatalogue::generate(&sets, false);
        let options = MergeOptions::default();
        let oracle = SimpleQuestionOracle::new(units, &catalogue, options.clone());

        let members = vec![0, 1, 2, 3];
        let merged = merge(&members, &stats, &options)?;
        let best = oracle
            .best_question(&members, &merged)?
            .expect("a question separates the units");

        let yes = members
            .iter()
            .filter(|&&u| best.question.evaluate(&contexts[u]))
            .count();
        assert_eq!(yes, 2, "{} does not split 2/2", best.question);
        assert!(best.entropy_decrease > 0.0);

        let single = merge(&[0], &stats, &options)?;
        assert_eq!(oracle.best_question(&[0], &single)?, None);
        Ok(())
    }

    #[test]
    fn composite_oracle_answers_with_a_composite_question() -> Result<(), anyhow::Error> {
        let (sets, stats, contexts) = fixture();
        let units = Units::new(&stats, &contexts)?;
        let catalogue = QuestionCatalogue::generate(&sets, false);
        let oracle = CompositeQuestionOracle::new(
            units,
            &catalogue,
            TreeOptions::default(),
            ExhaustiveTwoClass::default(),
        );

        let members = vec![0, 1, 2, 3, 4];
        let merged = merge(&members, &stats, &MergeOptions::default())?;
        let best = oracle
            .best_question(&members, &merged)?
            .expect("the units form two classes");

        assert!(matches!(best.question, Question::Composite(_)));
        assert!(best.entropy_decrease > 0.0);
        let answers = members
            .iter()
            .map(|&u| best.question.evaluate(&contexts[u]))
            .collect::<Vec<_>>();
        assert_eq!(answers[0], answers[1]);
        assert_eq!(answers[2], answers[3]);
        assert_ne!(answers[0], answers[2]);
        Ok(())
    }
}
