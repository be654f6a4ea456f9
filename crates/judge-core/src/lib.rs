//! The evaluation core of the metrics alerting pipeline: a sharded,
//! bounded in-memory history store, a two-flavor rule-matching engine, and
//! the event state machine that turns per-sample verdicts into alert
//! events with repeat-suppression and pacing.

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod model;
pub mod rules;

pub use engine::{EngineConfig, JudgeEngine};
pub use error::AggregatorError;
pub use events::LastEvents;
pub use history::HistoryShards;
pub use model::{Event, EventStatus, Expression, Operator, RuleRef, Sample, Strategy};
pub use rules::{RuleIndices, RuleSnapshot};
