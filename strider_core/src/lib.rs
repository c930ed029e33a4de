//! Strider: a distributed, coverage-guided fuzzing engine for slow,
//! out-of-process targets.
//!
//! Many shard processes cooperate through an append-only working directory:
//! each runs a local mutate/execute/evaluate loop and periodically absorbs
//! the discoveries of its peers by re-reading their shard files. The engine
//! itself never executes targets; execution, mutation and input filtering
//! are injected through [`executor::Callbacks`].

pub mod blob;
pub mod config;
pub mod control_flow;
pub mod corpus;
pub mod engine;
pub mod executor;
pub mod exit;
pub mod feature;
pub mod knobs;
pub mod symbols;
pub mod workdir;

pub use config::Environment;
pub use control_flow::{BinaryInfo, CallGraph, ControlFlowGraph, CoverageFrontier, PcInfo};
pub use corpus::{Corpus, CorpusRecord, WeightedDistribution};
pub use engine::{Engine, EngineError};
pub use executor::{BatchResult, Callbacks, ExecutionResult};
pub use feature::{Feature, FeatureSet, FeatureVec};
pub use symbols::{FunctionFilter, SymbolTable};

/// Raw input bytes, as fed to the target.
pub type ByteArray = Vec<u8>;
