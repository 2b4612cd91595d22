use crate::builder::{BuildError, BuildOutcome};
use crate::catalogue::QuestionCatalogue;
use crate::config::Config;
use crate::oracle::CompositeQuestionOracle;
use crate::question::PhoneId;
use crate::stats::{UnitId, Units};
use crate::tree::Tree;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// The units of one base phone, to be tied for one state position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub base: PhoneId,
    pub state: usize,
    pub members: Vec<UnitId>,
}

/// Jobs ordered by base phone, then state.
pub fn jobs(units: Units<'_>) -> Vec<Job> {
    let mut by_base: BTreeMap<PhoneId, Vec<UnitId>> = BTreeMap::new();
    for unit in 0..units.len() {
        by_base.entry(units.context(unit).base).or_default().push(unit);
    }
    let n_state = units.stats().shape().n_state();
    by_base
        .into_iter()
        .flat_map(|(base, members)| {
            (0..n_state).map(move |state| Job {
                base,
                state,
                members: members.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Grown {
    pub base: PhoneId,
    pub state: usize,
    pub outcome: BuildOutcome,
}

/// Builds the composite-question tree of every job. Trees share nothing but
/// the read-only inputs, so `config.parallel` runs one build per worker.
pub fn build_forest(
    units: Units<'_>,
    catalogue: &QuestionCatalogue,
    config: &Config,
) -> Result<Vec<Grown>, ForestError> {
    let jobs = jobs(units);
    info!("{} trees to build", jobs.len());
    if config.parallel {
        jobs.par_iter()
            .map(|job| build_one(units, catalogue, config, job))
            .collect()
    } else {
        jobs.iter()
            .map(|job| build_one(units, catalogue, config, job))
            .collect()
    }
}

fn build_one(
    units: Units<'_>,
    catalogue: &QuestionCatalogue,
    config: &Config,
    job: &Job,
) -> Result<Grown, ForestError> {
    let merge = config.merge_options(units.stats().shape().n_state(), job.state);
    let oracle = CompositeQuestionOracle::new(
        units,
        catalogue,
        config.simple_tree(merge.clone()),
        config.clusterer(),
    );
    let outcome = config
        .composite_tree(merge)
        .build(&job.members, units, &oracle)
        .map_err(|source| ForestError {
            base: job.base,
            state: job.state,
            source,
        })?;
    info!(
        "phone {} state {}: {} units, {} leaves, stopped on {:?}",
        job.base,
        job.state,
        job.members.len(),
        outcome.tree.count_leaves(),
        outcome.stop
    );
    Ok(Grown {
        base: job.base,
        state: job.state,
        outcome,
    })
}

/// Numbers the leaves of every tree with tied-state ids, consecutive across
/// trees. Returns the number of tied states.
pub fn label_tied_states<'a, I>(trees: I) -> u32
where
    I: IntoIterator<Item = &'a mut Tree>,
{
    trees
        .into_iter()
        .fold(0, |next, tree| tree.label_leaves(next))
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("cannot build the tree of phone {base} state {state}")]
pub struct ForestError {
    pub base: PhoneId,
    pub state: usize,
    #[source]
    pub source: BuildError,
}
