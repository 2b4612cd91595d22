use crate::question::Context;
use thiserror::Error;

pub type UnitId = usize;

/// Dimensions shared by every unit of a statistics table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    n_state: usize,
    n_stream: usize,
    n_density: usize,
    veclen: Vec<usize>,
}

impl Shape {
    pub fn discrete(n_state: usize, n_stream: usize, n_density: usize) -> Self {
        Self {
            n_state,
            n_stream,
            n_density,
            veclen: Vec::new(),
        }
    }

    /// Single Gaussian per state and stream; `veclen[j]` is the dimension of stream `j`.
    pub fn continuous(n_state: usize, veclen: Vec<usize>) -> Self {
        Self {
            n_state,
            n_stream: veclen.len(),
            n_density: 1,
            veclen,
        }
    }

    pub fn n_state(&self) -> usize {
        self.n_state
    }

    pub fn n_stream(&self) -> usize {
        self.n_stream
    }

    pub fn n_density(&self) -> usize {
        self.n_density
    }

    pub fn veclen(&self) -> &[usize] {
        &self.veclen
    }

    pub fn is_continuous(&self) -> bool {
        !self.veclen.is_empty()
    }

    pub(crate) fn counts_len(&self) -> usize {
        self.n_state * self.n_stream * self.n_density
    }

    pub(crate) fn dims(&self) -> usize {
        self.veclen.iter().sum()
    }

    pub(crate) fn moments_len(&self) -> usize {
        self.n_state * self.dims()
    }

    pub(crate) fn count_index(&self, state: usize, stream: usize) -> usize {
        (state * self.n_stream + stream) * self.n_density
    }

    pub(crate) fn moment_range(&self, state: usize, stream: usize) -> std::ops::Range<usize> {
        let offset = self.veclen[..stream].iter().sum::<usize>();
        let start = state * self.dims() + offset;
        start..start + self.veclen[stream]
    }
}

/// Occupancy-weighted statistics of every observed unit, indexed by [`UnitId`].
#[derive(Debug, Clone)]
pub struct StatsTable {
    shape: Shape,
    counts: Vec<f64>,
    means: Vec<f64>,
    vars: Vec<f64>,
}

impl StatsTable {
    /// `counts` is laid out as `[unit][state][stream][density]`.
    pub fn discrete(shape: Shape, counts: Vec<f64>) -> Result<Self, StatsError> {
        if shape.is_continuous() {
            return Err(StatsError::ModelMismatch);
        }
        Self::new(shape, counts, Vec::new(), Vec::new())
    }

    /// `counts` is laid out as `[unit][state][stream]`, `means` and `vars` as
    /// `[unit][state][stream][dim]`.
    pub fn continuous(
        shape: Shape,
        counts: Vec<f64>,
        means: Vec<f64>,
        vars: Vec<f64>,
    ) -> Result<Self, StatsError> {
        if !shape.is_continuous() {
            return Err(StatsError::ModelMismatch);
        }
        Self::new(shape, counts, means, vars)
    }

    fn new(
        shape: Shape,
        counts: Vec<f64>,
        means: Vec<f64>,
        vars: Vec<f64>,
    ) -> Result<Self, StatsError> {
        let unit_len = shape.counts_len();
        if unit_len == 0 || counts.is_empty() {
            return Err(StatsError::EmptyTable);
        }
        if counts.len() % unit_len != 0 {
            return Err(StatsError::ShapeMismatch {
                what: "occupancy counts",
                expected: unit_len,
                actual: counts.len(),
            });
        }
        if counts.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(StatsError::InvalidCount);
        }

        let units = counts.len() / unit_len;
        let moments_len = units * shape.moments_len();
        for (what, values) in [("means", &means), ("variances", &vars)] {
            if values.len() != moments_len {
                return Err(StatsError::ShapeMismatch {
                    what,
                    expected: moments_len,
                    actual: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(StatsError::NonFiniteMoment);
            }
        }

        Ok(Self {
            shape,
            counts,
            means,
            vars,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn units_len(&self) -> usize {
        self.counts.len() / self.shape.counts_len()
    }

    /// Occupancy counts of every density of one state and stream.
    pub fn counts(&self, unit: UnitId, state: usize, stream: usize) -> &[f64] {
        let start = unit * self.shape.counts_len() + self.shape.count_index(state, stream);
        &self.counts[start..start + self.shape.n_density]
    }

    pub fn mean(&self, unit: UnitId, state: usize, stream: usize) -> &[f64] {
        &self.means[self.moment_range(unit, state, stream)]
    }

    pub fn var(&self, unit: UnitId, state: usize, stream: usize) -> &[f64] {
        &self.vars[self.moment_range(unit, state, stream)]
    }

    fn moment_range(&self, unit: UnitId, state: usize, stream: usize) -> std::ops::Range<usize> {
        let range = self.shape.moment_range(state, stream);
        let base = unit * self.shape.moments_len();
        range.start + base..range.end + base
    }
}

/// Statistics paired with the phonetic context of every unit.
#[derive(Debug, Clone, Copy)]
pub struct Units<'a> {
    stats: &'a StatsTable,
    contexts: &'a [Context],
}

impl<'a> Units<'a> {
    pub fn new(stats: &'a StatsTable, contexts: &'a [Context]) -> Result<Self, StatsError> {
        if stats.units_len() != contexts.len() {
            return Err(StatsError::ContextMismatch {
                units: stats.units_len(),
                contexts: contexts.len(),
            });
        }
        Ok(Self { stats, contexts })
    }

    pub fn stats(&self) -> &'a StatsTable {
        self.stats
    }

    pub fn context(&self, unit: UnitId) -> &'a Context {
        &self.contexts[unit]
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[derive(Debug, Error, Clone)]
pub enum StatsError {
    #[error("statistics table must have at least one unit, state, stream and density")]
    EmptyTable,

    #[error("{what} have {actual} values, expected a multiple of (or exactly) {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("occupancy counts must be finite and non-negative")]
    InvalidCount,

    #[error("means and variances must be finite")]
    NonFiniteMoment,

    #[error("the shape and the statistics disagree on the model kind")]
    ModelMismatch,

    #[error("{units} units have statistics but {contexts} have a context")]
    ContextMismatch { units: usize, contexts: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_table_indexing_works() -> Result<(), anyhow::Error> {
        let shape = Shape::discrete(2, 1, 3);
        let counts = (0..12).map(|x| x as f64).collect();
        let table = StatsTable::discrete(shape, counts)?;

        assert_eq!(table.units_len(), 2);
        assert_eq!(table.counts(0, 1, 0), &[3.0, 4.0, 5.0]);
        assert_eq!(table.counts(1, 0, 0), &[6.0, 7.0, 8.0]);
        Ok(())
    }

    #[test]
    fn continuous_table_indexing_works() -> Result<(), anyhow::Error> {
        let shape = Shape::continuous(1, vec![2, 1]);
        let counts = vec![1.0, 2.0, 3.0, 4.0];
        let means = vec![0.1, 0.2, 0.3, 1.1, 1.2, 1.3];
        let vars = vec![1.0; 6];
        let table = StatsTable::continuous(shape, counts, means, vars)?;

        assert_eq!(table.units_len(), 2);
        assert_eq!(table.counts(1, 0, 1), &[4.0]);
        assert_eq!(table.mean(0, 0, 0), &[0.1, 0.2]);
        assert_eq!(table.mean(1, 0, 1), &[1.3]);
        Ok(())
    }

    #[test]
    fn malformed_tables_are_rejected() {
        let shape = Shape::discrete(1, 1, 2);
        assert!(matches!(
            StatsTable::discrete(shape.clone(), vec![1.0, 2.0, 3.0]),
            Err(StatsError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            StatsTable::discrete(shape.clone(), vec![1.0, -2.0]),
            Err(StatsError::InvalidCount)
        ));
        assert!(matches!(
            StatsTable::discrete(shape, Vec::new()),
            Err(StatsError::EmptyTable)
        ));
    }
}
