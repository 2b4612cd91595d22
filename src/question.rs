use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type PhoneId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordPosn {
    Begin,
    End,
    Single,
    Internal,
    Unknown,
}

impl WordPosn {
    pub const ALL: [WordPosn; 5] = [
        WordPosn::Begin,
        WordPosn::End,
        WordPosn::Single,
        WordPosn::Internal,
        WordPosn::Unknown,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// The phonetic context of a unit: a base phone, its neighbours and where it
/// sits in the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context {
    pub left: PhoneId,
    pub base: PhoneId,
    pub right: PhoneId,
    pub posn: WordPosn,
}

impl Context {
    pub fn new(left: PhoneId, base: PhoneId, right: PhoneId, posn: WordPosn) -> Self {
        Self {
            left,
            base,
            right,
            posn,
        }
    }

    fn phone_at(&self, ctxt: i32) -> PhoneId {
        match ctxt {
            -1 => self.left,
            0 => self.base,
            _ => self.right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Membership {
    Phones(Vec<bool>),
    Positions([bool; 5]),
}

/// A named class of phones (e.g. `VOWEL`) or of word positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneSet {
    name: String,
    membership: Membership,
}

impl PhoneSet {
    pub fn phones(name: impl Into<String>, n_phone: usize, members: &[PhoneId]) -> Self {
        let mut member = vec![false; n_phone];
        for &p in members {
            if let Some(m) = member.get_mut(p as usize) {
                *m = true;
            }
        }
        Self {
            name: name.into(),
            membership: Membership::Phones(member),
        }
    }

    pub fn positions(name: impl Into<String>, members: &[WordPosn]) -> Self {
        let mut member = [false; 5];
        for &p in members {
            member[p.index()] = true;
        }
        Self {
            name: name.into(),
            membership: Membership::Positions(member),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_word_position(&self) -> bool {
        matches!(self.membership, Membership::Positions(_))
    }

    pub fn contains_phone(&self, phone: PhoneId) -> bool {
        match &self.membership {
            Membership::Phones(member) => member.get(phone as usize).copied().unwrap_or(false),
            Membership::Positions(_) => false,
        }
    }

    pub fn contains_posn(&self, posn: WordPosn) -> bool {
        match &self.membership {
            Membership::Positions(member) => member[posn.index()],
            Membership::Phones(_) => false,
        }
    }
}

/// Phone sets addressable by name, shared read-only by every question built
/// from them.
#[derive(Debug, Clone, Default)]
pub struct PhoneSets {
    sets: Vec<Arc<PhoneSet>>,
    by_name: HashMap<String, usize>,
}

impl PhoneSets {
    pub fn new(sets: Vec<PhoneSet>) -> Result<Self, QuestionError> {
        let mut by_name = HashMap::new();
        for (i, set) in sets.iter().enumerate() {
            if by_name.insert(set.name.clone(), i).is_some() {
                return Err(QuestionError::DuplicateSet(set.name.clone()));
            }
        }
        Ok(Self {
            sets: sets.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PhoneSet>> {
        self.by_name.get(name).map(|&i| &self.sets[i])
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = &Arc<PhoneSet>> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// `(context[ctxt] in SET)`, possibly negated. Word-position questions
/// always carry `ctxt == 0`.
#[derive(Debug, Clone)]
pub struct SimpleQuestion {
    set: Arc<PhoneSet>,
    ctxt: i32,
    negated: bool,
}

impl SimpleQuestion {
    pub fn new(set: Arc<PhoneSet>, ctxt: i32) -> Result<Self, QuestionError> {
        if !(-1..=1).contains(&ctxt) {
            return Err(QuestionError::UnsupportedContext(ctxt));
        }
        let ctxt = if set.is_word_position() { 0 } else { ctxt };
        Ok(Self {
            set,
            ctxt,
            negated: false,
        })
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn set(&self) -> &PhoneSet {
        &self.set
    }

    pub fn ctxt(&self) -> i32 {
        self.ctxt
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn evaluate(&self, context: &Context) -> bool {
        let answer = if self.set.is_word_position() {
            self.set.contains_posn(context.posn)
        } else {
            self.set.contains_phone(context.phone_at(self.ctxt))
        };
        answer != self.negated
    }

    /// True if every context satisfying `self` also satisfies `other`.
    /// Only phone questions about the same position are compared.
    fn implies(&self, other: &SimpleQuestion) -> bool {
        match (&self.set.membership, &other.set.membership) {
            (Membership::Phones(a), Membership::Phones(b)) if self.ctxt == other.ctxt => a
                .iter()
                .zip(b.iter())
                .all(|(&in_a, &in_b)| !(in_a != self.negated) || (in_b != other.negated)),
            _ => false,
        }
    }
}

impl PartialEq for SimpleQuestion {
    fn eq(&self, other: &Self) -> bool {
        self.set.name == other.set.name && self.ctxt == other.ctxt && self.negated == other.negated
    }
}

impl fmt::Display for SimpleQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let neg = if self.negated { "!" } else { "" };
        write!(f, "{}{} {}", neg, self.set.name, self.ctxt)
    }
}

/// A disjunction of conjunctions of simple questions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeQuestion {
    terms: Vec<Vec<SimpleQuestion>>,
}

impl CompositeQuestion {
    pub fn new(terms: Vec<Vec<SimpleQuestion>>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[Vec<SimpleQuestion>] {
        &self.terms
    }

    pub fn evaluate(&self, context: &Context) -> bool {
        self.terms
            .iter()
            .any(|conj| conj.iter().all(|q| q.evaluate(context)))
    }

    /// Drops every term of a conjunction that another remaining term of the
    /// same conjunction implies. Returns true if anything was removed.
    pub fn simplify(&mut self) -> bool {
        let mut changed = false;
        for conj in &mut self.terms {
            let mut keep = vec![true; conj.len()];
            for i in 0..conj.len() {
                if !keep[i] {
                    continue;
                }
                for j in 0..conj.len() {
                    if i != j && keep[j] && conj[i].implies(&conj[j]) {
                        keep[j] = false;
                        changed = true;
                    }
                }
            }
            let mut flags = keep.into_iter();
            conj.retain(|_| flags.next().unwrap_or(true));
        }
        changed
    }

    pub fn parse(text: &str, sets: &PhoneSets) -> Result<Self, QuestionError> {
        Parser::new(text, sets).composite()
    }
}

impl From<SimpleQuestion> for CompositeQuestion {
    fn from(q: SimpleQuestion) -> Self {
        Self { terms: vec![vec![q]] }
    }
}

impl fmt::Display for CompositeQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for conj in &self.terms {
            write!(f, "(")?;
            for (i, q) in conj.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", q)?;
            }
            write!(f, ")")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Question {
    Simple(SimpleQuestion),
    Composite(CompositeQuestion),
}

impl Question {
    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            Question::Simple(q) => q.evaluate(context),
            Question::Composite(q) => q.evaluate(context),
        }
    }

    /// The composite form used by the tree file.
    pub fn to_composite(&self) -> CompositeQuestion {
        match self {
            Question::Simple(q) => CompositeQuestion::from(q.clone()),
            Question::Composite(q) => q.clone(),
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Question::Simple(q) => q.fmt(f),
            Question::Composite(q) => q.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Word(&'a str),
}

struct Parser<'a> {
    text: &'a str,
    rest: &'a str,
    sets: &'a PhoneSets,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, sets: &'a PhoneSets) -> Self {
        Self {
            text,
            rest: text,
            sets,
        }
    }

    fn next(&mut self) -> Option<Token<'a>> {
        self.rest = self.rest.trim_start();
        let mut chars = self.rest.chars();
        let token = match chars.next()? {
            '(' => Token::Open,
            ')' => Token::Close,
            _ => {
                let end = self
                    .rest
                    .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
                    .unwrap_or(self.rest.len());
                let word = &self.rest[..end];
                self.rest = &self.rest[end..];
                return Some(Token::Word(word));
            }
        };
        self.rest = chars.as_str();
        Some(token)
    }

    fn peek(&self) -> Option<Token<'a>> {
        Parser {
            text: self.text,
            rest: self.rest,
            sets: self.sets,
        }
        .next()
    }

    fn expect(&mut self, expected: Token<'a>) -> Result<(), QuestionError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(self.syntax(match expected {
                Token::Open => "expected '('",
                _ => "expected ')'",
            })),
        }
    }

    fn syntax(&self, reason: &'static str) -> QuestionError {
        QuestionError::Syntax {
            text: self.text.to_owned(),
            reason,
        }
    }

    fn composite(&mut self) -> Result<CompositeQuestion, QuestionError> {
        self.expect(Token::Open)?;
        let mut terms = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Close) => {
                    self.next();
                    break;
                }
                Some(Token::Open) => terms.push(self.conjunction()?),
                _ => return Err(self.syntax("expected '(' or ')'")),
            }
        }
        if terms.is_empty() {
            return Err(self.syntax("empty composite question"));
        }
        if self.next().is_some() {
            return Err(self.syntax("trailing text after composite question"));
        }
        Ok(CompositeQuestion { terms })
    }

    fn conjunction(&mut self) -> Result<Vec<SimpleQuestion>, QuestionError> {
        self.expect(Token::Open)?;
        let mut conj = Vec::new();
        loop {
            match self.next() {
                Some(Token::Close) => break,
                Some(Token::Word(name)) => conj.push(self.simple(name)?),
                _ => return Err(self.syntax("unterminated conjunction")),
            }
        }
        Ok(conj)
    }

    fn simple(&mut self, word: &'a str) -> Result<SimpleQuestion, QuestionError> {
        let (negated, name) = match word.strip_prefix('!') {
            Some(name) => (true, name),
            None => (false, word),
        };
        let set = self
            .sets
            .get(name)
            .ok_or_else(|| QuestionError::UnknownSet(name.to_owned()))?;
        let ctxt = match self.next() {
            Some(Token::Word(w)) => w
                .parse::<i32>()
                .map_err(|_| self.syntax("context position must be an integer"))?,
            _ => return Err(self.syntax("expected a context position after the set name")),
        };
        let q = SimpleQuestion::new(Arc::clone(set), ctxt)?;
        Ok(if negated { q.negate() } else { q })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuestionError {
    #[error("unknown phone set {0:?}")]
    UnknownSet(String),

    #[error("phone set {0:?} is defined more than once")]
    DuplicateSet(String),

    #[error("context position {0} is not supported (expected -1, 0 or 1)")]
    UnsupportedContext(i32),

    #[error("cannot parse question {text:?}: {reason}")]
    Syntax { text: String, reason: &'static str },
}
