use crate::question::{PhoneSets, SimpleQuestion};
use std::sync::Arc;

/// The simple questions a tree may ask, in the order they are tried.
#[derive(Debug, Clone, Default)]
pub struct QuestionCatalogue {
    questions: Vec<SimpleQuestion>,
}

impl QuestionCatalogue {
    pub fn new(questions: Vec<SimpleQuestion>) -> Self {
        Self { questions }
    }

    /// Every phone set yields questions about the left and right neighbours
    /// (only the left one for `*_L*` sets, only the right one for `*_R*`
    /// sets) and, with `all_phones`, about the base phone, followed by their
    /// negations. A word-position set yields one question and its negation.
    pub fn generate(sets: &PhoneSets, all_phones: bool) -> Self {
        let mut questions = Vec::new();
        for set in sets.iter() {
            let ctxts = if set.is_word_position() {
                vec![0]
            } else {
                let left_only = set.name().contains("_L");
                let right_only = set.name().contains("_R");
                let either = !left_only && !right_only;
                let mut ctxts = Vec::with_capacity(3);
                if left_only || either {
                    ctxts.push(-1);
                }
                if right_only || either {
                    ctxts.push(1);
                }
                if all_phones && either {
                    ctxts.push(0);
                }
                ctxts
            };

            let positive = ctxts
                .into_iter()
                .map(|ctxt| SimpleQuestion::new(Arc::clone(set), ctxt).expect("never fails"))
                .collect::<Vec<_>>();
            let negative = positive.iter().cloned().map(SimpleQuestion::negate).collect::<Vec<_>>();
            questions.extend(positive);
            questions.extend(negative);
        }
        Self { questions }
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = &SimpleQuestion> {
        self.questions.iter()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
