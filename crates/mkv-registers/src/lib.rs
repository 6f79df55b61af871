//! mkv-registers: decoder for the MKV controller Question/Answer register protocol.
//!
//! A question is a concatenation of 6-hex register keys; the answer is a flat run of
//! 8-hex words (or `X` for "no value") in the same order. This crate builds the
//! question, splits the answer back into per-register values, evaluates scaling
//! formulas on them and resolves order-sensitive register groups by consensus.

mod error;
pub use error::{CalcError, KeyParseError, PlanError, PollError};

mod key;
pub use key::{Part, RegisterKey};

mod plan;
pub use plan::{QueryPlan, TrailingPolicy};

mod tokenize;
pub use tokenize::{sanitize, scan, tokenize, RawToken, Scan};

mod index;
pub use index::{build_index, DerivedValue, RawValueIndex};

mod arith;

mod calc;
pub use calc::{Calc, Reference};

mod evaluator;
pub use evaluator::{evaluate, evaluate_metric, MetricDefinition, MetricValue};

mod exchange;
pub use exchange::{exchange, Exchange, FetchFailure, Tally};

mod consensus;
pub use consensus::{
    resolve_consensus, ConsensusConfig, ConsensusOutcome, PlausibilityRule, ScoreWeights,
};

mod model;
pub use model::{slugify, CompiledModel, DeviceModel, Grouping, MODEL_SCHEMA_VERSION};

mod loader;
pub use loader::{load_model_file, load_models_dir, model_files, read_model_file, ModelRegistry};

mod metrics;
pub use metrics::{MetricsHub, PollMetrics};

mod poll;
pub use poll::{PollReport, Poller};
