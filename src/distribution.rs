use crate::stats::{Shape, StatsTable, UnitId};
use serde::{Deserialize, Serialize};
use std::f64::consts::{LOG2_E, PI};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Discrete or semi-continuous mixture weights.
    Discrete,
    /// One diagonal Gaussian per state and stream.
    Continuous,
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Discrete
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    kind: ModelKind,
    mixw_floor: f64,
    var_floor: f64,
    state_weights: Vec<f64>,
}

impl MergeOptions {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn mixw_floor(mut self, floor: f64) -> Self {
        self.mixw_floor = floor;
        self
    }

    pub fn var_floor(mut self, floor: f64) -> Self {
        self.var_floor = floor;
        self
    }

    /// Per-state weights of the entropy sum. When empty, every state weighs
    /// the same.
    pub fn state_weights(mut self, weights: Vec<f64>) -> Self {
        self.state_weights = weights;
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    fn weights(&self, n_state: usize) -> Result<Vec<f64>, MergeError> {
        if self.state_weights.is_empty() {
            return Ok(vec![1.0 / n_state as f64; n_state]);
        }
        if self.state_weights.len() != n_state {
            return Err(MergeError::StateWeights {
                expected: n_state,
                actual: self.state_weights.len(),
            });
        }
        Ok(self.state_weights.clone())
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            kind: ModelKind::Discrete,
            mixw_floor: 1e-4,
            var_floor: 1e-5,
            state_weights: Vec::new(),
        }
    }
}

/// Normalised weights for the tree of state position `position`: state `s`
/// gets `raw[|s - position|]` (zero past the end of `raw`).
pub fn state_weights_for(raw: &[f64], n_state: usize, position: usize) -> Vec<f64> {
    let mut weights = (0..n_state)
        .map(|s| {
            let distance = if s > position { s - position } else { position - s };
            raw.get(distance).copied().unwrap_or(0.0)
        })
        .collect::<Vec<_>>();
    let total = weights.iter().sum::<f64>();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    }
    weights
}

/// Pooled statistics of a set of units.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    shape: Shape,
    counts: Vec<f64>,
    means: Vec<f64>,
    vars: Vec<f64>,
}

impl Distribution {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn counts(&self, state: usize, stream: usize) -> &[f64] {
        let start = self.shape.count_index(state, stream);
        &self.counts[start..start + self.shape.n_density()]
    }

    pub fn occupancy(&self, state: usize, stream: usize) -> f64 {
        self.counts(state, stream).iter().sum()
    }

    pub fn mean(&self, state: usize, stream: usize) -> &[f64] {
        &self.means[self.shape.moment_range(state, stream)]
    }

    pub fn var(&self, state: usize, stream: usize) -> &[f64] {
        &self.vars[self.shape.moment_range(state, stream)]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub distribution: Distribution,
    pub weighted_entropy: f64,
    pub occupancy: f64,
}

/// Pools the statistics of `members` and scores the result.
pub fn merge(
    members: &[UnitId],
    stats: &StatsTable,
    options: &MergeOptions,
) -> Result<Merged, MergeError> {
    if members.is_empty() {
        return Err(MergeError::EmptyMembers);
    }
    if let Some(&unit) = members.iter().find(|&&u| u >= stats.units_len()) {
        return Err(MergeError::UnknownUnit(unit));
    }
    let mut acc = Accumulator::new(stats.shape(), options)?;
    for &unit in members {
        acc.add(&UnitStats { stats, unit });
    }
    acc.finish(options)
}

/// Pools already merged distributions.
pub fn combine(parts: &[&Distribution], options: &MergeOptions) -> Result<Merged, MergeError> {
    let first = parts.first().ok_or(MergeError::EmptyMembers)?;
    let mut acc = Accumulator::new(first.shape(), options)?;
    for part in parts {
        if part.shape() != first.shape() {
            return Err(MergeError::ShapeMismatch);
        }
        acc.add(*part);
    }
    acc.finish(options)
}

/// Entropy decrease gained by splitting `parent` into `yes` and `no`.
///
/// Discrete scores are entropies, continuous scores are log-likelihoods, so
/// the sign of the difference flips between the two.
pub fn split_gain(kind: ModelKind, parent: f64, yes: f64, no: f64) -> f64 {
    match kind {
        ModelKind::Discrete => parent - yes - no,
        ModelKind::Continuous => yes + no - parent,
    }
}

/// Entropy in bits of a discrete distribution.
pub fn discrete_entropy(p: &[f64]) -> f64 {
    -p.iter()
        .filter(|&&p| p > 1e-8)
        .map(|p| p * p.ln())
        .sum::<f64>()
        * LOG2_E
}

/// Per-frame log-likelihood in bits of a diagonal Gaussian evaluated on its
/// own training data.
pub fn gaussian_entropy(var: &[f64]) -> f64 {
    let half_ln_2pi = 0.5 * (2.0 * PI).ln();
    let y = 0.5 * var.iter().map(|v| v.ln()).sum::<f64>() + var.len() as f64 * (half_ln_2pi + 0.5);
    -y * LOG2_E
}

trait Moments {
    fn counts(&self, state: usize, stream: usize) -> &[f64];
    fn mean(&self, state: usize, stream: usize) -> &[f64];
    fn var(&self, state: usize, stream: usize) -> &[f64];
}

struct UnitStats<'a> {
    stats: &'a StatsTable,
    unit: UnitId,
}

impl Moments for UnitStats<'_> {
    fn counts(&self, state: usize, stream: usize) -> &[f64] {
        self.stats.counts(self.unit, state, stream)
    }

    fn mean(&self, state: usize, stream: usize) -> &[f64] {
        self.stats.mean(self.unit, state, stream)
    }

    fn var(&self, state: usize, stream: usize) -> &[f64] {
        self.stats.var(self.unit, state, stream)
    }
}

impl Moments for Distribution {
    fn counts(&self, state: usize, stream: usize) -> &[f64] {
        Distribution::counts(self, state, stream)
    }

    fn mean(&self, state: usize, stream: usize) -> &[f64] {
        Distribution::mean(self, state, stream)
    }

    fn var(&self, state: usize, stream: usize) -> &[f64] {
        Distribution::var(self, state, stream)
    }
}

/// Occupancy counts plus occupancy-weighted first and second moments.
#[derive(Debug)]
struct Accumulator {
    shape: Shape,
    continuous: bool,
    counts: Vec<f64>,
    first: Vec<f64>,
    second: Vec<f64>,
}

impl Accumulator {
    fn new(shape: &Shape, options: &MergeOptions) -> Result<Self, MergeError> {
        let continuous = match options.kind {
            ModelKind::Continuous if shape.is_continuous() => true,
            ModelKind::Discrete if !shape.is_continuous() => false,
            _ => return Err(MergeError::ModelMismatch),
        };
        Ok(Self {
            shape: shape.clone(),
            continuous,
            counts: vec![0.0; shape.counts_len()],
            first: vec![0.0; shape.moments_len()],
            second: vec![0.0; shape.moments_len()],
        })
    }

    fn add<M: Moments + ?Sized>(&mut self, part: &M) {
        for s in 0..self.shape.n_state() {
            for j in 0..self.shape.n_stream() {
                let start = self.shape.count_index(s, j);
                for (acc, c) in self.counts[start..].iter_mut().zip(part.counts(s, j)) {
                    *acc += c;
                }
                if !self.continuous {
                    continue;
                }
                let occ = part.counts(s, j)[0];
                let range = self.shape.moment_range(s, j);
                let moments = part.mean(s, j).iter().zip(part.var(s, j));
                for (k, (m, v)) in range.zip(moments) {
                    self.first[k] += occ * m;
                    self.second[k] += occ * (v + m * m);
                }
            }
        }
    }

    fn finish(self, options: &MergeOptions) -> Result<Merged, MergeError> {
        let Self {
            shape,
            continuous,
            counts,
            mut first,
            mut second,
        } = self;
        let weights = options.weights(shape.n_state())?;

        if continuous {
            for s in 0..shape.n_state() {
                for j in 0..shape.n_stream() {
                    let occ = counts[shape.count_index(s, j)];
                    let range = shape.moment_range(s, j);
                    if occ == 0.0 {
                        if first[range.clone()].iter().any(|&m| m != 0.0) {
                            return Err(MergeError::DegenerateInput { state: s, stream: j });
                        }
                        second[range].iter_mut().for_each(|v| *v = options.var_floor);
                        continue;
                    }
                    for k in range {
                        let mean = first[k] / occ;
                        first[k] = mean;
                        second[k] = (second[k] / occ - mean * mean).max(options.var_floor);
                    }
                }
            }
        }
        let distribution = Distribution {
            shape,
            counts,
            means: first,
            vars: second,
        };

        let mut weighted_entropy = 0.0;
        for (s, w) in weights.iter().enumerate() {
            let mut state_entropy = 0.0;
            for j in 0..distribution.shape.n_stream() {
                let dnom = distribution.occupancy(s, j);
                if dnom == 0.0 {
                    continue;
                }
                let entropy = if continuous {
                    gaussian_entropy(distribution.var(s, j))
                } else {
                    let p = distribution
                        .counts(s, j)
                        .iter()
                        .map(|c| (c / dnom).max(options.mixw_floor))
                        .collect::<Vec<_>>();
                    discrete_entropy(&p)
                };
                state_entropy += dnom * entropy;
            }
            weighted_entropy += w * state_entropy;
        }

        let mut focus = 0;
        let mut heaviest = 0.0;
        for (s, &w) in weights.iter().enumerate() {
            if w > heaviest {
                heaviest = w;
                focus = s;
            }
        }
        let occupancy = distribution.occupancy(focus, 0);

        Ok(Merged {
            distribution,
            weighted_entropy,
            occupancy,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    #[error("cannot merge an empty set of units")]
    EmptyMembers,

    #[error("unit {0} is not in the statistics table")]
    UnknownUnit(UnitId),

    #[error("zero occupancy but non-zero accumulated moments at state {state}, stream {stream}")]
    DegenerateInput { state: usize, stream: usize },

    #[error("the statistics do not match the configured model kind")]
    ModelMismatch,

    #[error("distributions with different shapes cannot be combined")]
    ShapeMismatch,

    #[error("expected {expected} state weights, got {actual}")]
    StateWeights { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete_table() -> StatsTable {
        StatsTable::discrete(
            Shape::discrete(1, 1, 2),
            vec![4.0, 0.0, 0.0, 4.0, 2.0, 2.0],
        )
        .expect("never fails")
    }

    #[test]
    fn discrete_merge_works() -> Result<(), anyhow::Error> {
        let stats = discrete_table();
        let options = MergeOptions::default();

        let both = merge(&[0, 1], &stats, &options)?;
        assert_eq!(both.distribution.counts(0, 0), &[4.0, 4.0]);
        assert!((both.weighted_entropy - 8.0).abs() < 1e-12);
        assert_eq!(both.occupancy, 8.0);

        let yes = merge(&[0], &stats, &options)?;
        let no = merge(&[1], &stats, &options)?;
        let floored = -(1e-4f64 * 1e-4f64.ln()) * LOG2_E * 4.0;
        assert!((yes.weighted_entropy - floored).abs() < 1e-12);

        let gain = split_gain(
            ModelKind::Discrete,
            both.weighted_entropy,
            yes.weighted_entropy,
            no.weighted_entropy,
        );
        assert!((gain - (8.0 - 2.0 * floored)).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn combine_agrees_with_merge() -> Result<(), anyhow::Error> {
        let stats = discrete_table();
        let options = MergeOptions::default();
        let a = merge(&[0, 2], &stats, &options)?;
        let b = merge(&[1], &stats, &options)?;
        let pooled = combine(&[&a.distribution, &b.distribution], &options)?;
        let direct = merge(&[0, 1, 2], &stats, &options)?;
        assert_eq!(pooled, direct);
        Ok(())
    }

    #[test]
    fn continuous_merge_pools_moments() -> Result<(), anyhow::Error> {
        let stats = StatsTable::continuous(
            Shape::continuous(1, vec![1]),
            vec![1.0, 3.0],
            vec![0.0, 2.0],
            vec![1.0, 1.0],
        )?;
        let options = MergeOptions::new(ModelKind::Continuous);
        let merged = merge(&[0, 1], &stats, &options)?;

        assert_eq!(merged.distribution.mean(0, 0), &[1.5]);
        assert!((merged.distribution.var(0, 0)[0] - 1.75).abs() < 1e-12);
        assert_eq!(merged.occupancy, 4.0);
        assert!((merged.weighted_entropy - 4.0 * gaussian_entropy(&[1.75])).abs() < 1e-12);

        let yes = merge(&[0], &stats, &options)?;
        let no = merge(&[1], &stats, &options)?;
        let gain = split_gain(
            ModelKind::Continuous,
            merged.weighted_entropy,
            yes.weighted_entropy,
            no.weighted_entropy,
        );
        assert!(gain > 0.0);
        Ok(())
    }

    #[test]
    fn variance_is_floored() -> Result<(), anyhow::Error> {
        let stats = StatsTable::continuous(
            Shape::continuous(1, vec![1]),
            vec![2.0, 2.0],
            vec![1.0, 1.0],
            vec![0.0, 0.0],
        )?;
        let options = MergeOptions::new(ModelKind::Continuous).var_floor(0.25);
        let merged = merge(&[0, 1], &stats, &options)?;
        assert_eq!(merged.distribution.var(0, 0), &[0.25]);
        Ok(())
    }

    #[test]
    fn zero_occupancy_with_moments_is_fatal() {
        let shape = Shape::continuous(1, vec![2]);
        let options = MergeOptions::new(ModelKind::Continuous);
        let mut acc = Accumulator::new(&shape, &options).expect("never fails");
        acc.first[1] = 0.5;
        assert_eq!(
            acc.finish(&options).err(),
            Some(MergeError::DegenerateInput {
                state: 0,
                stream: 0
            })
        );
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let stats = discrete_table();
        assert_eq!(
            merge(&[], &stats, &MergeOptions::default()).err(),
            Some(MergeError::EmptyMembers)
        );
        assert_eq!(
            merge(&[7], &stats, &MergeOptions::default()).err(),
            Some(MergeError::UnknownUnit(7))
        );
        assert_eq!(
            merge(&[0], &stats, &MergeOptions::new(ModelKind::Continuous)).err(),
            Some(MergeError::ModelMismatch)
        );
        assert_eq!(
            merge(
                &[0],
                &stats,
                &MergeOptions::default().state_weights(vec![0.5, 0.5])
            )
            .err(),
            Some(MergeError::StateWeights {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn state_weights_follow_distance() {
        let w = state_weights_for(&[2.0, 1.0], 3, 0);
        assert_eq!(w, vec![2.0 / 3.0, 1.0 / 3.0, 0.0]);
        let w = state_weights_for(&[2.0, 1.0], 3, 1);
        assert_eq!(w, vec![0.25, 0.5, 0.25]);
    }
}
