use crate::question::{CompositeQuestion, SimpleQuestion};
use crate::tree::{NodeId, Tree};
use thiserror::Error;

/// A disjunction of conjunctions, as built up along a path.
type Dnf = Vec<Vec<SimpleQuestion>>;

/// Turns "does a unit reach a leaf of `cluster`" into one composite
/// question: the conditions on the path from the root, one disjunct per
/// matching leaf. A composite split contributes its terms on the yes side
/// and their negation on the no side.
pub fn compile(tree: &Tree, cluster: u32) -> Result<CompositeQuestion, CompileError> {
    let mut terms = Vec::new();
    let mut stack: Vec<(NodeId, Dnf)> = vec![(0, vec![Vec::new()])];
    while let Some((id, path)) = stack.pop() {
        let node = match tree.node(id) {
            Some(node) => node,
            None => continue,
        };
        let children = match node.children() {
            Some(c) => c,
            None => {
                if node.cluster() == Some(cluster) {
                    terms.extend(path);
                }
                continue;
            }
        };
        let q = node
            .question()
            .ok_or(CompileError::MissingQuestion { node: id })?
            .to_composite();

        stack.push((children.no, and(&path, &negate(q.terms()))));
        stack.push((children.yes, and(&path, q.terms())));
    }

    if terms.is_empty() {
        return Err(CompileError::NoSuchCluster { cluster });
    }
    Ok(CompositeQuestion::new(terms))
}

/// `a AND b`, distributed back into a disjunction.
fn and(a: &[Vec<SimpleQuestion>], b: &[Vec<SimpleQuestion>]) -> Dnf {
    a.iter()
        .flat_map(|x| b.iter().map(move |y| x.iter().chain(y).cloned().collect()))
        .collect()
}

/// De Morgan: `NOT (c1 OR c2 ...)` is the conjunction of the negated
/// terms, each of which is a disjunction of negated literals.
fn negate(terms: &[Vec<SimpleQuestion>]) -> Dnf {
    terms.iter().fold(vec![Vec::new()], |acc, conj| {
        let any_false = conj
            .iter()
            .map(|q| vec![q.clone().negate()])
            .collect::<Vec<_>>();
        and(&acc, &any_false)
    })
}

#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("no leaf belongs to cluster {cluster}")]
    NoSuchCluster { cluster: u32 },

    #[error("internal node {node} has no question")]
    MissingQuestion { node: NodeId },
}
