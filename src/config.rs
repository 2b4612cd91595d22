use crate::builder::TreeOptions;
use crate::classify::ExhaustiveTwoClass;
use crate::distribution::{state_weights_for, MergeOptions, ModelKind};
use crate::prune::PruneOptions;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Split limits of one kind of tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitLimits {
    pub min_splits: usize,
    pub max_splits: usize,
    pub threshold: f64,
}

/// Settings shared by the `build`, `prune` and `quest` commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub model: ModelKind,
    /// Trees of simple questions grown inside the composite-question search.
    pub simple: SplitLimits,
    /// The final trees of composite questions.
    pub composite: SplitLimits,
    pub stop_on_nonpositive_gain: bool,
    pub relative_floor: bool,
    pub mixw_floor: f64,
    pub var_floor: f64,
    /// Raw state weights indexed by distance from the tree's state.
    pub state_weights: Vec<f64>,
    pub all_phones: bool,
    /// Largest simple tree the exhaustive two-class search accepts.
    pub max_leaves: usize,
    pub min_occupancy: Option<f64>,
    pub entropy_floor: Option<f64>,
    pub leaf_target: Option<usize>,
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelKind::Discrete,
            simple: SplitLimits {
                min_splits: 1,
                max_splits: 5,
                threshold: 8e-4,
            },
            composite: SplitLimits {
                min_splits: 1,
                max_splits: 100,
                threshold: 8e-4,
            },
            stop_on_nonpositive_gain: true,
            relative_floor: true,
            mixw_floor: 1e-4,
            var_floor: 1e-5,
            state_weights: vec![1.0],
            all_phones: false,
            max_leaves: 16,
            min_occupancy: None,
            entropy_floor: None,
            leaf_target: None,
            parallel: false,
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: &'static str) -> Result<(), ConfigError> {
            Err(ConfigError::InvalidParameter { name, reason })
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        if !non_negative(self.mixw_floor) || self.mixw_floor >= 1.0 {
            return invalid("mixw_floor", "must be in [0, 1)");
        }
        if !(self.var_floor.is_finite() && self.var_floor > 0.0) {
            return invalid("var_floor", "must be positive");
        }
        if !non_negative(self.simple.threshold) {
            return invalid("simple.threshold", "must be a non-negative number");
        }
        if !non_negative(self.composite.threshold) {
            return invalid("composite.threshold", "must be a non-negative number");
        }
        if self.composite.max_splits == 0 {
            return invalid("composite.max_splits", "must be at least 1");
        }
        match self.state_weights.first() {
            None => return invalid("state_weights", "must not be empty"),
            Some(&w) if !(w > 0.0) => {
                return invalid("state_weights", "the weight of the tree's own state must be positive")
            }
            _ => {}
        }
        if !self.state_weights.iter().all(|&w| non_negative(w)) {
            return invalid("state_weights", "must be non-negative numbers");
        }
        if !(2..=24).contains(&self.max_leaves) {
            return invalid("max_leaves", "must be between 2 and 24");
        }
        if self.simple.max_splits + 1 > self.max_leaves {
            return invalid("simple.max_splits", "must be below max_leaves");
        }
        if self.min_occupancy.map_or(false, |v| !non_negative(v)) {
            return invalid("min_occupancy", "must be a non-negative number");
        }
        if self.entropy_floor.map_or(false, |v| !v.is_finite()) {
            return invalid("entropy_floor", "must be a finite number");
        }
        if self.leaf_target == Some(0) {
            return invalid("leaf_target", "must be at least 1");
        }
        Ok(())
    }

    /// Merge settings for the tree of state `position` out of `n_state`.
    pub fn merge_options(&self, n_state: usize, position: usize) -> MergeOptions {
        MergeOptions::new(self.model)
            .mixw_floor(self.mixw_floor)
            .var_floor(self.var_floor)
            .state_weights(state_weights_for(&self.state_weights, n_state, position))
    }

    pub fn simple_tree(&self, merge: MergeOptions) -> TreeOptions {
        self.tree_options(&self.simple, merge)
    }

    pub fn composite_tree(&self, merge: MergeOptions) -> TreeOptions {
        self.tree_options(&self.composite, merge)
    }

    fn tree_options(&self, limits: &SplitLimits, merge: MergeOptions) -> TreeOptions {
        TreeOptions::new()
            .min_splits(limits.min_splits)
            .max_splits(limits.max_splits)
            .split_threshold(limits.threshold)
            .stop_on_nonpositive_gain(self.stop_on_nonpositive_gain)
            .relative_floor(self.relative_floor)
            .merge(merge)
    }

    pub fn clusterer(&self) -> ExhaustiveTwoClass {
        ExhaustiveTwoClass::new().max_leaves(self.max_leaves)
    }

    pub fn prune_options(&self) -> PruneOptions {
        let mut options = PruneOptions::new();
        if let Some(min) = self.min_occupancy {
            options = options.min_occupancy(min);
        }
        if let Some(floor) = self.entropy_floor {
            options = options.entropy_floor(floor);
        }
        options
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read the configuration")]
    Io(#[source] io::Error),

    #[error("malformed configuration")]
    Json(#[source] serde_json::Error),

    #[error("invalid configuration parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
}

impl From<io::Error> for ConfigError {
    fn from(f: io::Error) -> Self {
        Self::Io(f)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(f: serde_json::Error) -> Self {
        Self::Json(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        Config::from_reader(json.as_bytes())
    }

    #[test]
    fn defaults_are_valid() -> Result<(), anyhow::Error> {
        let config = parse("{}")?;
        assert_eq!(config, Config::default());
        assert_eq!(config.simple.max_splits, 5);
        assert_eq!(config.composite.max_splits, 100);
        Ok(())
    }

    #[test]
    fn fields_can_be_overridden() -> Result<(), anyhow::Error> {
        let config = parse(
            r#"{
                "model": "continuous",
                "composite": {"min_splits": 2, "max_splits": 10, "threshold": 0.01},
                "state_weights": [1.0, 0.5],
                "min_occupancy": 20.0,
                "leaf_target": 100
            }"#,
        )?;
        assert_eq!(config.model, ModelKind::Continuous);
        assert_eq!(config.composite.max_splits, 10);
        assert_eq!(config.simple, Config::default().simple);
        assert_eq!(config.leaf_target, Some(100));

        let merge = config.merge_options(3, 1);
        assert_eq!(merge.kind(), ModelKind::Continuous);
        assert_eq!(merge, MergeOptions::new(ModelKind::Continuous).state_weights(vec![0.25, 0.5, 0.25]));
        Ok(())
    }

    #[test]
    fn bad_values_name_the_parameter() {
        let name = |json: &str| match parse(json) {
            Err(ConfigError::InvalidParameter { name, .. }) => Some(name),
            _ => None,
        };
        assert_eq!(name(r#"{"mixw_floor": 1.5}"#), Some("mixw_floor"));
        assert_eq!(name(r#"{"var_floor": 0.0}"#), Some("var_floor"));
        assert_eq!(name(r#"{"state_weights": []}"#), Some("state_weights"));
        assert_eq!(name(r#"{"state_weights": [0.0, 1.0]}"#), Some("state_weights"));
        assert_eq!(
            name(r#"{"simple": {"min_splits": 1, "max_splits": 5, "threshold": -1.0}}"#),
            Some("simple.threshold")
        );
        assert_eq!(name(r#"{"max_leaves": 40}"#), Some("max_leaves"));
        assert_eq!(
            name(r#"{"simple": {"min_splits": 1, "max_splits": 10, "threshold": 0.0}, "max_leaves": 4}"#),
            Some("simple.max_splits")
        );
        assert!(parse(r#"{"simple": {"min_splits": 1, "max_splits": 3, "threshold": 0.0}, "max_leaves": 4}"#).is_ok());
        assert_eq!(name(r#"{"leaf_target": 0}"#), Some("leaf_target"));
    }

    #[test]
    fn unknown_fields_and_models_are_rejected() {
        assert!(matches!(parse(r#"{"max_split": 3}"#), Err(ConfigError::Json(_))));
        assert!(matches!(parse(r#"{"model": "neural"}"#), Err(ConfigError::Json(_))));
    }
}
