use thiserror::Error;

/// Failure to parse a rule's aggregator expression.
///
/// Consumed entirely within [`crate::engine`]: the evaluation engine logs
/// this once per occurrence and treats the rule as contributing no verdict
/// for the sample that triggered the parse. It never propagates past the
/// evaluation engine.
#[derive(Debug, Error, PartialEq)]
pub enum AggregatorError {
    #[error("unknown aggregator function {0:?}")]
    UnknownFunction(String),
    #[error("malformed window in aggregator expression {0:?}")]
    MalformedWindow(String),
    #[error("non-numeric right-hand value {0:?}")]
    NonNumericRightValue(String),
}
