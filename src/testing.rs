//! Fixtures shared by the unit tests.

use crate::builder::BuildError;
use crate::distribution::Merged;
use crate::oracle::{Candidate, QuestionOracle};
use crate::question::{Context, PhoneSet, PhoneSets, Question, SimpleQuestion, WordPosn};
use crate::stats::{Shape, StatsTable, UnitId};
use crate::tree::{Node, Tree};
use std::sync::Arc;

pub const N_PHONE: usize = 6;

/// Phones 0..6: `VOWEL` = {0, 1, 2}, `FRONT` = {0}, `STOP` = {3, 4},
/// `NASAL` = {5}, plus the word-initial position set `WDBNDRY_B`.
pub fn phone_sets() -> PhoneSets {
    PhoneSets::new(vec![
        PhoneSet::phones("VOWEL", N_PHONE, &[0, 1, 2]),
        PhoneSet::phones("FRONT", N_PHONE, &[0]),
        PhoneSet::phones("STOP", N_PHONE, &[3, 4]),
        PhoneSet::phones("NASAL", N_PHONE, &[5]),
        PhoneSet::positions("WDBNDRY_B", &[WordPosn::Begin]),
    ])
    .expect("never fails")
}

pub fn simple(sets: &PhoneSets, name: &str, ctxt: i32) -> SimpleQuestion {
    let set = sets.get(name).expect("never fails");
    SimpleQuestion::new(Arc::clone(set), ctxt).expect("never fails")
}

pub fn question(sets: &PhoneSets, name: &str, ctxt: i32) -> Question {
    Question::Simple(simple(sets, name, ctxt))
}

/// Root asks `VOWEL -1`; its yes child asks `FRONT -1` and its no child asks
/// `STOP 1`. Leaves are 3, 4, 5 and 6.
pub fn seven_node_tree() -> Tree {
    let sets = phone_sets();
    let mut tree = Tree::new(Node::new(vec![0, 1, 2, 3], 10.0, 40.0), 7);
    tree.split(
        0,
        question(&sets, "VOWEL", -1),
        Node::new(vec![0, 1], 4.0, 20.0),
        Node::new(vec![2, 3], 4.0, 20.0),
    )
    .expect("never fails");
    tree.split(
        1,
        question(&sets, "FRONT", -1),
        Node::new(vec![0], 1.0, 10.0),
        Node::new(vec![1], 1.5, 10.0),
    )
    .expect("never fails");
    tree.split(
        2,
        question(&sets, "STOP", 1),
        Node::new(vec![2], 2.0, 10.0),
        Node::new(vec![3], 0.5, 10.0),
    )
    .expect("never fails");
    for (id, decrease) in [(0, 2.0), (1, 1.5), (2, 1.5)] {
        tree.node_mut(id).expect("never fails").entropy_decrease = decrease;
    }
    tree
}

/// Two-density discrete statistics, one state and stream. Unit `i` has
/// context `contexts[i]` and counts `counts[i]`.
pub fn discrete_units(counts: &[[f64; 2]]) -> StatsTable {
    StatsTable::discrete(
        Shape::discrete(1, 1, 2),
        counts.iter().flatten().copied().collect(),
    )
    .expect("never fails")
}

pub fn context(left: u32, right: u32) -> Context {
    Context::new(left, 5, right, WordPosn::Internal)
}

/// Splits on a fixed list of questions, in order, as long as the question
/// separates the members. Scores decrease with depth.
#[derive(Debug)]
pub struct ScriptedOracle<'a> {
    pub contexts: &'a [Context],
    pub questions: Vec<Question>,
}

impl QuestionOracle for ScriptedOracle<'_> {
    fn best_question(
        &self,
        members: &[UnitId],
        _merged: &Merged,
    ) -> Result<Option<Candidate>, BuildError> {
        for (i, q) in self.questions.iter().enumerate() {
            let yes = members
                .iter()
                .filter(|&&u| q.evaluate(&self.contexts[u]))
                .count();
            if yes > 0 && yes < members.len() {
                return Ok(Some(Candidate {
                    question: q.clone(),
                    entropy_decrease: (self.questions.len() - i) as f64,
                }));
            }
        }
        Ok(None)
    }
}
