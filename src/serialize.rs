use crate::question::{CompositeQuestion, PhoneSets, Question, QuestionError};
use crate::tree::{Children, Node, NodeId, Tree};
use std::fmt;
use std::io::{self, BufRead, Write};
use thiserror::Error;

const NO_CHILD: &str = "-";

/// `printf("%.*e")`-style scientific notation (`1.500000e+00`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sci {
    value: f64,
    precision: usize,
}

impl Sci {
    pub(crate) fn new(value: f64, precision: usize) -> Self {
        Self { value, precision }
    }
}

impl fmt::Display for Sci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_nan() {
            return write!(f, "nan");
        }
        if self.value.is_infinite() {
            return write!(f, "{}", if self.value < 0.0 { "-inf" } else { "inf" });
        }
        let text = format!("{:.*e}", self.precision, self.value);
        let (mantissa, exp) = text.split_once('e').expect("never fails");
        let exp = exp.parse::<i32>().expect("never fails");
        let sign = if exp < 0 { '-' } else { '+' };
        write!(f, "{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

/// Writes `tree` in the line-oriented tree file format:
///
/// ```text
/// n_node 3
/// 0 1 2 <entropy decrease> <occupancy> <composite question>
/// 1 - - <entropy> <occupancy> [cluster]
/// 2 - - <entropy> <occupancy> [cluster]
/// ```
///
/// Reachable nodes are written in id order and renumbered densely.
pub fn write_tree<W: Write>(mut writer: W, tree: &Tree) -> io::Result<()> {
    let mut ids = tree.preorder();
    ids.sort_unstable();
    let mut dense = vec![usize::MAX; tree.slots()];
    for (i, &id) in ids.iter().enumerate() {
        dense[id] = i;
    }

    writeln!(writer, "n_node {}", ids.len())?;
    for &id in &ids {
        let node = tree.node(id).expect("never fails");
        match (node.children(), node.question()) {
            (Some(c), Some(q)) => writeln!(
                writer,
                "{} {} {} {} {} {}",
                dense[id],
                dense[c.yes],
                dense[c.no],
                Sci::new(node.entropy_decrease(), 6),
                Sci::new(node.occupancy(), 6),
                q.to_composite()
            )?,
            _ => {
                write!(
                    writer,
                    "{} {} {} {} {}",
                    dense[id],
                    NO_CHILD,
                    NO_CHILD,
                    Sci::new(node.entropy(), 6),
                    Sci::new(node.occupancy(), 6)
                )?;
                if let Some(cluster) = node.cluster() {
                    write!(writer, " {}", cluster)?;
                }
                writeln!(writer)?;
            }
        }
    }
    Ok(())
}

/// Reads a tree written by [`write_tree`]. Any defect rejects the whole
/// tree.
pub fn read_tree<R: BufRead>(reader: R, sets: &PhoneSets) -> Result<Tree, ParseError> {
    let mut lines = reader.lines().enumerate().filter_map(|(i, line)| match line {
        Ok(line) if is_blank(&line) => None,
        Ok(line) => Some(Ok((i + 1, line))),
        Err(e) => Some(Err(ParseError::Io(e))),
    });

    let (line_no, header) = lines.next().ok_or(ParseError::MissingHeader)??;
    let n_node = parse_header(&header).ok_or(ParseError::BadHeader { line: line_no })?;

    let mut slots: Vec<Option<(Node, Option<Children>)>> = vec![None; n_node];
    for _ in 0..n_node {
        let (line_no, line) = match lines.next() {
            Some(l) => l?,
            None => break,
        };
        let (node, children) = parse_node(&line, line_no, n_node, sets)?;
        let slot = &mut slots[node.id];
        if slot.is_some() {
            return Err(ParseError::DuplicateNode {
                line: line_no,
                id: node.id,
            });
        }
        *slot = Some((node, children));
    }
    if let Some(extra) = lines.next() {
        let (line_no, _) = extra?;
        return Err(ParseError::TrailingData { line: line_no });
    }

    let mut nodes = Vec::with_capacity(n_node);
    let mut links = Vec::with_capacity(n_node);
    for (id, slot) in slots.into_iter().enumerate() {
        let (node, children) = slot.ok_or(ParseError::MissingNode { id })?;
        nodes.push(node);
        links.push(children);
    }
    link(&mut nodes, &links)?;
    Ok(Tree::from_nodes(nodes))
}

fn is_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

fn parse_header(line: &str) -> Option<usize> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some("n_node"), Some(n), None) => n.parse().ok().filter(|&n| n > 0),
        _ => None,
    }
}

/// Splits off the next whitespace-separated field.
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let s = rest.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    *rest = &s[end..];
    Some(&s[..end])
}

fn parse_node(
    line: &str,
    line_no: usize,
    n_node: usize,
    sets: &PhoneSets,
) -> Result<(Node, Option<Children>), ParseError> {
    let mut rest = line;
    let mut field = |name: &'static str| {
        next_field(&mut rest).ok_or(ParseError::BadField {
            line: line_no,
            field: name,
        })
    };
    let id_text = field("node id")?;
    let yes_text = field("yes child")?;
    let no_text = field("no child")?;
    let entropy_text = field("entropy")?;
    let occupancy_text = field("occupancy")?;

    let id = parse_id(id_text, line_no, n_node, "node id")?;
    let entropy = parse_f64(entropy_text, line_no, "entropy")?;
    let occupancy = parse_f64(occupancy_text, line_no, "occupancy")?;

    if yes_text == NO_CHILD || no_text == NO_CHILD {
        if yes_text != no_text {
            return Err(ParseError::BadField {
                line: line_no,
                field: "no child",
            });
        }
        let mut node = Node::new(Vec::new(), entropy, occupancy);
        node.id = id;
        match (next_field(&mut rest), next_field(&mut rest)) {
            (None, _) => {}
            (Some(c), None) => {
                node.cluster = Some(c.parse().map_err(|_| ParseError::BadField {
                    line: line_no,
                    field: "cluster",
                })?)
            }
            (Some(_), Some(_)) => return Err(ParseError::TrailingData { line: line_no }),
        }
        return Ok((node, None));
    }

    let children = Children {
        yes: parse_id(yes_text, line_no, n_node, "yes child")?,
        no: parse_id(no_text, line_no, n_node, "no child")?,
    };
    let question = CompositeQuestion::parse(rest.trim(), sets).map_err(|source| {
        ParseError::BadQuestion {
            line: line_no,
            source,
        }
    })?;
    let mut node = Node::new(Vec::new(), f64::NAN, occupancy);
    node.id = id;
    node.question = Some(Question::Composite(question));
    node.entropy_decrease = entropy;
    Ok((node, Some(children)))
}

fn parse_id(text: &str, line: usize, n_node: usize, field: &'static str) -> Result<usize, ParseError> {
    let id = text
        .parse::<usize>()
        .map_err(|_| ParseError::BadField { line, field })?;
    if id >= n_node {
        return Err(ParseError::IdOutOfRange { line, id, n_node });
    }
    Ok(id)
}

fn parse_f64(text: &str, line: usize, field: &'static str) -> Result<f64, ParseError> {
    text.parse::<f64>()
        .map_err(|_| ParseError::BadField { line, field })
}

/// Wires parents to children and checks that the links form one tree
/// rooted at node 0.
fn link(nodes: &mut [Node], links: &[Option<Children>]) -> Result<(), ParseError> {
    for (id, children) in links.iter().enumerate() {
        let c = match children {
            Some(c) => *c,
            None => continue,
        };
        for child in [c.yes, c.no] {
            if child == 0 || child == id || c.yes == c.no || nodes[child].parent.is_some() {
                return Err(ParseError::BadLink { node: id });
            }
            nodes[child].parent = Some(id);
        }
        nodes[id].children = Some(c);
    }

    let mut seen = vec![false; nodes.len()];
    let mut stack = vec![0];
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut seen[id], true) {
            return Err(ParseError::BadLink { node: id });
        }
        if let Some(c) = nodes[id].children {
            stack.push(c.no);
            stack.push(c.yes);
        }
    }
    match seen.iter().position(|&s| !s) {
        Some(node) => Err(ParseError::Unreachable { node }),
        None => Ok(()),
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error")]
    Io(#[source] io::Error),

    #[error("the tree file is empty")]
    MissingHeader,

    #[error("line {line}: expected \"n_node <count>\" with a positive count")]
    BadHeader { line: usize },

    #[error("line {line}: missing or malformed {field}")]
    BadField { line: usize, field: &'static str },

    #[error("line {line}: node id {id} is outside [0, {n_node})")]
    IdOutOfRange { line: usize, id: NodeId, n_node: usize },

    #[error("line {line}: node {id} is defined twice")]
    DuplicateNode { line: usize, id: NodeId },

    #[error("node {id} is never defined")]
    MissingNode { id: NodeId },

    #[error("node {node} has invalid child links")]
    BadLink { node: NodeId },

    #[error("node {node} is not reachable from the root")]
    Unreachable { node: NodeId },

    #[error("line {line}: bad question")]
    BadQuestion {
        line: usize,
        #[source]
        source: QuestionError,
    },

    #[error("line {line}: unexpected trailing data")]
    TrailingData { line: usize },
}

impl From<io::Error> for ParseError {
    fn from(f: io::Error) -> Self {
        Self::Io(f)
    }
}
