//! The evaluation engine: wires a fresh sample through the rule indices,
//! the aggregator catalog and the event state machine.

use std::collections::HashSet;
use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::events::LastEvents;
use crate::history::{HistoryShards, SeriesHistory};
use crate::model::{Event, RuleRef, Sample};
use crate::rules::RuleIndices;
use std::sync::RwLock;

/// Knobs the engine needs from configuration: the series retain count and
/// the repeat-alert pacing interval.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub retain: usize,
    pub min_interval: i64,
}

/// Owns the three pieces of process-lifetime state the core needs: the
/// sharded history store, the rule indices, and the last-events index.
#[derive(Default)]
pub struct JudgeEngine {
    pub history: HistoryShards,
    pub rules: RuleIndices,
    pub events: LastEvents,
    config: EngineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retain: 30,
            min_interval: 0,
        }
    }
}

impl JudgeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            history: HistoryShards::new(),
            rules: RuleIndices::new(),
            events: LastEvents::new(),
            config,
        }
    }

    /// Ingest one sample and evaluate it, returning whatever events it
    /// produced. Malformed samples are dropped silently before reaching
    /// the history store; out-of-order samples are rejected by
    /// [`HistoryShards::ingest`] and never reach evaluation either.
    pub fn ingest_one(&self, sample: Sample, now: i64) -> Vec<Event> {
        if !sample.is_well_formed() {
            return Vec::new();
        }

        let Some(series) = self.history.ingest(sample.clone(), self.config.retain) else {
            return Vec::new();
        };

        self.evaluate(&series, &sample, now)
    }

    /// Ingest a batch, computing `now` once for the whole batch (reducing
    /// syscalls).
    pub fn ingest_batch(&self, samples: Vec<Sample>, now: i64) -> Vec<Event> {
        let mut emitted = Vec::new();
        for sample in samples {
            emitted.extend(self.ingest_one(sample, now));
        }
        emitted
    }

    fn evaluate(&self, series: &Arc<RwLock<SeriesHistory>>, sample: &Sample, now: i64) -> Vec<Event> {
        let snapshot = self.rules.snapshot();
        let mut emitted = Vec::new();

        // Strategy path: indexed by endpoint/metric, filtered by tag
        // subsumption.
        for strategy in snapshot.strategies_for(&sample.endpoint, &sample.metric) {
            if !strategy.matches_tags(&sample.tags) {
                continue;
            }
            if let Some(event) =
                self.judge_rule(series, sample, now, RuleRef::Strategy(strategy.clone()))
            {
                emitted.push(event);
            }
        }

        // Expression path: one candidate key per sample tag plus the
        // synthetic endpoint tag; each expression id evaluated at most
        // once per sample regardless of how many keys reach it.
        let mut handled: HashSet<i64> = HashSet::new();
        for key in candidate_expression_keys(sample) {
            for expression in snapshot.expressions_for_key(&key) {
                if !handled.insert(expression.id) {
                    continue;
                }
                if !expression.matches(sample) {
                    continue;
                }
                if let Some(event) = self.judge_rule(
                    series,
                    sample,
                    now,
                    RuleRef::Expression((**expression).clone()),
                ) {
                    emitted.push(event);
                }
            }
        }

        emitted
    }

    fn judge_rule(
        &self,
        series: &Arc<RwLock<SeriesHistory>>,
        sample: &Sample,
        now: i64,
        rule: RuleRef,
    ) -> Option<Event> {
        let (func, operator, right_value, max_step, rule_debug_id) = match &rule {
            RuleRef::Strategy(s) => (&s.func, s.operator, s.right_value, s.max_step, s.id),
            RuleRef::Expression(e) => (&e.func, e.operator, e.right_value, e.max_step, e.id),
        };
        let _ = max_step; // carried via RuleRef::max_step() inside the state machine.

        let aggregator = match Aggregator::parse(func, operator, right_value) {
            Ok(aggregator) => aggregator,
            Err(err) => {
                tracing::warn!(rule_id = rule_debug_id, %err, "failed to parse aggregator; rule contributes no verdict");
                return None;
            }
        };

        // The newest-to-oldest iteration inside compute() runs entirely
        // under this read lock.
        let outcome = {
            let guard = series.read().expect("series lock poisoned");
            aggregator.compute(&guard)
        };

        if !outcome.is_enough {
            return None;
        }

        let event_id = Event::build_id(&rule, &sample.primary_key());
        self.events
            .evaluate_and_set(event_id, &outcome, now, self.config.min_interval, rule, sample)
    }
}

/// Candidate expression-index keys for a sample: one per tag, plus the
/// synthetic `metric/endpoint=<endpoint>` key.
fn candidate_expression_keys(sample: &Sample) -> Vec<String> {
    let mut keys: Vec<String> = sample
        .tags
        .iter()
        .map(|(k, v)| format!("{}/{k}={v}", sample.metric))
        .collect();
    keys.push(format!("{}/endpoint={}", sample.metric, sample.endpoint));
    keys
}
