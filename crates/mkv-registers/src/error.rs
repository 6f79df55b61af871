use crate::{Part, RegisterKey};
use thiserror::Error;

/// Failure to parse a `IIII.SS` register key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid register key: {0:?} (expected IIII.SS)")]
pub struct KeyParseError(pub String);

/// Configuration-time failure building a query plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan hex length {len} is not a multiple of 6")]
    InvalidPlanLength { len: usize },
    /// `offset` is the byte position in the definition as written, whitespace included.
    #[error("non-hex character {found:?} at offset {offset}")]
    InvalidHex { offset: usize, found: char },
    #[error("register {0} appears more than once in the plan")]
    DuplicateKey(RegisterKey),
}

/// Why a calc expression did not yield a value. Always recovered as a `null` metric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("calc is marked as not decodable")]
    Undecodable,
    #[error("{0} of the metric's own register is missing")]
    MissingLocal(Part),
    #[error("{1} of referenced register {0} is missing")]
    MissingReference(RegisterKey, Part),
    #[error("expression {0:?} is not arithmetic-only after substitution")]
    IllegalCharacters(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("division by zero")]
    DivideByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

/// A poll cycle that produced no data at all.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("all {attempts} questions failed; last error: {last}")]
    AllFetchesFailed { attempts: usize, last: String },
}
