//! JSON inputs of the command line tool: the phone inventory with its phone
//! sets, and the accumulated statistics of every observed unit.

use crate::question::{Context, PhoneId, PhoneSet, PhoneSets, QuestionError, WordPosn};
use crate::stats::{Shape, StatsError, StatsTable, Units};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetSpec {
    pub name: String,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub positions: Vec<WordPosn>,
}

/// Phone names (their index is the [`PhoneId`]) and the named sets
/// questions are asked about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhoneInventory {
    pub phones: Vec<String>,
    #[serde(default)]
    pub phone_sets: Vec<SetSpec>,
}

impl PhoneInventory {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CorpusError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CorpusError> {
        let inventory: Self = serde_json::from_reader(reader)?;
        let mut seen = HashMap::new();
        for (i, name) in inventory.phones.iter().enumerate() {
            if seen.insert(name.as_str(), i).is_some() {
                return Err(CorpusError::DuplicatePhone(name.clone()));
            }
        }
        Ok(inventory)
    }

    pub fn phone_id(&self, name: &str) -> Result<PhoneId, CorpusError> {
        self.phones
            .iter()
            .position(|p| p == name)
            .map(|i| i as PhoneId)
            .ok_or_else(|| CorpusError::UnknownPhone(name.to_owned()))
    }

    pub fn phone_name(&self, id: PhoneId) -> Option<&str> {
        self.phones.get(id as usize).map(String::as_str)
    }

    pub fn phone_sets(&self) -> Result<PhoneSets, CorpusError> {
        let sets = self
            .phone_sets
            .iter()
            .map(|set| match (set.phones.is_empty(), set.positions.is_empty()) {
                (false, true) => {
                    let members = set
                        .phones
                        .iter()
                        .map(|p| self.phone_id(p))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(PhoneSet::phones(set.name.clone(), self.phones.len(), &members))
                }
                (true, false) => Ok(PhoneSet::positions(set.name.clone(), &set.positions)),
                _ => Err(CorpusError::BadSet(set.name.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PhoneSets::new(sets)?)
    }
}

/// One observed unit: its context and its statistics laid out as
/// `[state][stream][density]` (counts) and `[state][stream][dim]` (moments).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitRecord {
    pub base: String,
    pub left: String,
    pub right: String,
    #[serde(default = "unknown_posn")]
    pub posn: WordPosn,
    pub counts: Vec<f64>,
    #[serde(default)]
    pub means: Vec<f64>,
    #[serde(default)]
    pub vars: Vec<f64>,
}

fn unknown_posn() -> WordPosn {
    WordPosn::Unknown
}

/// Statistics file. A `veclen` entry makes it a single-Gaussian corpus with
/// one stream per entry; otherwise it holds discrete mixture counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Corpus {
    pub n_state: usize,
    #[serde(default = "one")]
    pub n_stream: usize,
    #[serde(default = "one")]
    pub n_density: usize,
    #[serde(default)]
    pub veclen: Option<Vec<usize>>,
    pub units: Vec<UnitRecord>,
}

fn one() -> usize {
    1
}

impl Corpus {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CorpusError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CorpusError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn shape(&self) -> Shape {
        match &self.veclen {
            Some(veclen) => Shape::continuous(self.n_state, veclen.clone()),
            None => Shape::discrete(self.n_state, self.n_stream, self.n_density),
        }
    }

    /// Resolves phone names and checks every unit against the corpus shape.
    pub fn load(&self, inventory: &PhoneInventory) -> Result<Loaded, CorpusError> {
        let shape = self.shape();
        let counts_len = shape.n_state() * shape.n_stream() * shape.n_density();
        let moments_len = shape.n_state() * shape.veclen().iter().sum::<usize>();

        let mut contexts = Vec::with_capacity(self.units.len());
        let (mut counts, mut means, mut vars) = (Vec::new(), Vec::new(), Vec::new());
        for (unit, record) in self.units.iter().enumerate() {
            let check = |what, values: &[f64], expected| {
                if values.len() == expected {
                    Ok(())
                } else {
                    Err(CorpusError::UnitShape {
                        unit,
                        what,
                        expected,
                        actual: values.len(),
                    })
                }
            };
            check("counts", &record.counts, counts_len)?;
            check("means", &record.means, moments_len)?;
            check("vars", &record.vars, moments_len)?;

            contexts.push(Context::new(
                inventory.phone_id(&record.left)?,
                inventory.phone_id(&record.base)?,
                inventory.phone_id(&record.right)?,
                record.posn,
            ));
            counts.extend_from_slice(&record.counts);
            means.extend_from_slice(&record.means);
            vars.extend_from_slice(&record.vars);
        }

        let stats = if shape.is_continuous() {
            StatsTable::continuous(shape, counts, means, vars)?
        } else {
            StatsTable::discrete(shape, counts)?
        };
        Ok(Loaded { stats, contexts })
    }
}

/// A corpus with phone names resolved.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub stats: StatsTable,
    pub contexts: Vec<Context>,
}

impl Loaded {
    pub fn units(&self) -> Result<Units<'_>, StatsError> {
        Units::new(&self.stats, &self.contexts)
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read the input")]
    Io(#[source] io::Error),

    #[error("malformed input")]
    Json(#[source] serde_json::Error),

    #[error("unknown phone {0:?}")]
    UnknownPhone(String),

    #[error("phone {0:?} is listed more than once")]
    DuplicatePhone(String),

    #[error("set {0:?} must list either phones or word positions")]
    BadSet(String),

    #[error("unit {unit} has {actual} {what}, expected {expected}")]
    UnitShape {
        unit: usize,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Stats(StatsError),

    #[error(transparent)]
    Question(QuestionError),
}

impl From<io::Error> for CorpusError {
    fn from(f: io::Error) -> Self {
        Self::Io(f)
    }
}

impl From<serde_json::Error> for CorpusError {
    fn from(f: serde_json::Error) -> Self {
        Self::Json(f)
    }
}

impl From<StatsError> for CorpusError {
    fn from(f: StatsError) -> Self {
        Self::Stats(f)
    }
}

impl From<QuestionError> for CorpusError {
    fn from(f: QuestionError) -> Self {
        Self::Question(f)
    }
}
