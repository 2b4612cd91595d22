pub use builder::{BuildError, BuildOutcome, StopReason, TreeOptions, Warning};
pub use classify::{classify_leaves, ExhaustiveTwoClass, TwoClassClusterer};
pub use compile::{compile, CompileError};
pub use config::{Config, ConfigError};
pub use distribution::{merge, MergeError, MergeOptions, ModelKind};
pub use oracle::{CompositeQuestionOracle, QuestionOracle, SimpleQuestionOracle};
pub use question::{CompositeQuestion, Context, Question, SimpleQuestion};
pub use serialize::{read_tree, write_tree, ParseError};
pub use stats::{StatsTable, UnitId, Units};
pub use tree::{Node, NodeId, Tree};

pub mod builder;
pub mod catalogue;
pub mod classify;
pub mod compile;
pub mod config;
pub mod corpus;
pub mod distribution;
pub mod forest;
pub mod oracle;
pub mod prune;
pub mod question;
pub mod serialize;
pub mod stats;
pub mod tree;

#[cfg(test)]
mod testing;
