//! Wire-level shapes that flow through the evaluation core: samples, rules
//! and the events they produce.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One timestamped metric observation for one series.
///
/// `endpoint`, `metric` and `tags` together identify the series; `timestamp`
/// is seconds since epoch and is not guaranteed monotone (out-of-order
/// arrivals are handled by [`crate::history::SeriesHistory::push_front_and_maintain`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub endpoint: String,
    pub metric: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    /// Canonical string uniquely naming this sample's series: endpoint,
    /// metric and tags sorted by key, joined as `k=v` pairs.
    ///
    /// This is the single source of truth for primary-key formation in the
    /// whole crate — every shard lookup and every event id is built from
    /// this string.
    pub fn primary_key(&self) -> String {
        let mut tag_keys: Vec<&String> = self.tags.keys().collect();
        tag_keys.sort_unstable();

        let mut canon_tags = String::new();
        for (i, k) in tag_keys.iter().enumerate() {
            if i > 0 {
                canon_tags.push(',');
            }
            canon_tags.push_str(k);
            canon_tags.push('=');
            canon_tags.push_str(&self.tags[*k]);
        }

        format!("{}/{}/{}", self.endpoint, self.metric, canon_tags)
    }

    /// Whether this sample is well-formed enough to enter the series
    /// history at all.
    pub fn is_well_formed(&self) -> bool {
        !self.endpoint.is_empty() && !self.metric.is_empty() && self.value.is_finite()
    }
}

/// Comparison operator carried by a rule's right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Operator::Gt => left > right,
            Operator::Ge => left >= right,
            Operator::Lt => left < right,
            Operator::Le => left <= right,
            Operator::Eq => left == right,
            Operator::Ne => left != right,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// A per-`(endpoint, metric)` alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub endpoint: String,
    pub metric: String,
    pub func: String,
    pub operator: Operator,
    pub right_value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub max_step: u32,
    /// Priority of the alert, 0 = highest. Used to derive the downstream
    /// queue name.
    pub priority: u8,
}

impl Strategy {
    /// A sample's tags must be a superset of this strategy's tags, with
    /// equal values, to be considered related.
    pub fn matches_tags(&self, sample_tags: &HashMap<String, String>) -> bool {
        self.tags
            .iter()
            .all(|(k, v)| sample_tags.get(k).is_some_and(|sv| sv == v))
    }
}

/// A per-`(metric, tag)` alert rule that can match across endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub id: i64,
    pub metric: String,
    pub func: String,
    pub operator: Operator,
    pub right_value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub max_step: u32,
    pub priority: u8,
}

impl Expression {
    /// As [`Strategy::matches_tags`], but `endpoint` is a synthetic tag
    /// sourced from the sample's `endpoint` field.
    pub fn matches(&self, sample: &Sample) -> bool {
        self.tags.iter().all(|(k, v)| {
            if k == "endpoint" {
                sample.endpoint == *v
            } else {
                sample.tags.get(k).is_some_and(|sv| sv == v)
            }
        })
    }
}

/// The rule that produced an [`Event`], kept around so the event can report
/// its originating id, max-step and priority without re-indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleRef {
    Strategy(Strategy),
    Expression(Expression),
}

impl RuleRef {
    pub fn max_step(&self) -> u32 {
        match self {
            RuleRef::Strategy(s) => s.max_step,
            RuleRef::Expression(e) => e.max_step,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            RuleRef::Strategy(s) => s.priority,
            RuleRef::Expression(e) => e.priority,
        }
    }
}

/// Status of a rule/series pair as tracked by the event state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Problem,
    Ok,
}

/// A state-transition record emitted downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub status: EventStatus,
    pub current_step: u32,
    pub event_time: i64,
    pub left_value: f64,
    pub pushed_tags: HashMap<String, String>,
    pub rule: RuleRef,
}

impl Event {
    pub fn priority(&self) -> u8 {
        self.rule.priority()
    }

    /// `s_<strategyId>_<primaryKey>` or `e_<expressionId>_<primaryKey>`.
    pub fn build_id(rule: &RuleRef, primary_key: &str) -> String {
        match rule {
            RuleRef::Strategy(s) => format!("s_{}_{}", s.id, primary_key),
            RuleRef::Expression(e) => format!("e_{}_{}", e.id, primary_key),
        }
    }
}
