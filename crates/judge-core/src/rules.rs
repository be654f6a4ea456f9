//! Read-mostly rule indices, atomically replaceable in full by the
//! external catalog fetcher: an `RwLock<Arc<RuleSnapshot>>` so readers on
//! the hot path only ever clone a reference, and a refresh swaps the whole
//! snapshot in one write-lock acquisition rather than mutating the map in
//! place.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{Expression, Strategy};

/// One immutable, fully-built pair of indices.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    /// `endpoint/metric` -> strategies.
    strategies: HashMap<String, Vec<Strategy>>,
    /// `metric/tagKey=tagValue` -> expressions (each expression appears
    /// once per distinct tag it carries).
    expressions: HashMap<String, Vec<Arc<Expression>>>,
}

impl RuleSnapshot {
    pub fn build(strategies: Vec<Strategy>, expressions: Vec<Expression>) -> Self {
        let mut strategy_index: HashMap<String, Vec<Strategy>> = HashMap::new();
        for strategy in strategies {
            let key = format!("{}/{}", strategy.endpoint, strategy.metric);
            strategy_index.entry(key).or_default().push(strategy);
        }

        let mut expression_index: HashMap<String, Vec<Arc<Expression>>> = HashMap::new();
        for expression in expressions {
            let expression = Arc::new(expression);
            for (tag_key, tag_value) in &expression.tags {
                let key = format!("{}/{}={}", expression.metric, tag_key, tag_value);
                expression_index
                    .entry(key)
                    .or_default()
                    .push(expression.clone());
            }
        }

        Self {
            strategies: strategy_index,
            expressions: expression_index,
        }
    }

    pub fn strategies_for(&self, endpoint: &str, metric: &str) -> &[Strategy] {
        self.strategies
            .get(&format!("{endpoint}/{metric}"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn expressions_for_key(&self, key: &str) -> &[Arc<Expression>] {
        self.expressions
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Holds the current [`RuleSnapshot`] behind a reader-writer lock.
///
/// Evaluation takes the read lock only long enough to clone the `Arc`,
/// then operates lock-free on the snapshot. Catalog refresh takes the
/// write lock and replaces the whole map; there are no partial updates —
/// readers see either the old snapshot in its entirety or the new one.
#[derive(Default)]
pub struct RuleIndices {
    current: RwLock<Arc<RuleSnapshot>>,
}

impl RuleIndices {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.current.read().expect("rule index lock poisoned").clone()
    }

    pub fn replace(&self, snapshot: RuleSnapshot) {
        let mut guard = self.current.write().expect("rule index lock poisoned");
        *guard = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use std::collections::HashMap as Map;

    fn strategy(id: i64, endpoint: &str, metric: &str) -> Strategy {
        Strategy {
            id,
            endpoint: endpoint.into(),
            metric: metric.into(),
            func: "max(#3)".into(),
            operator: Operator::Gt,
            right_value: 1.0,
            tags: Map::new(),
            max_step: 3,
            priority: 1,
        }
    }

    fn expression(id: i64, metric: &str, tags: &[(&str, &str)]) -> Expression {
        Expression {
            id,
            metric: metric.into(),
            func: "last(#1)".into(),
            operator: Operator::Gt,
            right_value: 1.0,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            max_step: 1,
            priority: 0,
        }
    }

    #[test]
    fn strategy_indexed_by_endpoint_and_metric() {
        let snapshot = RuleSnapshot::build(
            vec![strategy(1, "host01", "cpu.idle"), strategy(2, "host02", "cpu.idle")],
            vec![],
        );
        assert_eq!(snapshot.strategies_for("host01", "cpu.idle").len(), 1);
        assert_eq!(snapshot.strategies_for("host01", "cpu.idle")[0].id, 1);
        assert!(snapshot.strategies_for("host03", "cpu.idle").is_empty());
    }

    #[test]
    fn expression_indexed_once_per_tag() {
        let snapshot = RuleSnapshot::build(
            vec![],
            vec![expression(7, "proc.num", &[("name", "docker"), ("role", "web")])],
        );
        assert_eq!(snapshot.expressions_for_key("proc.num/name=docker").len(), 1);
        assert_eq!(snapshot.expressions_for_key("proc.num/role=web").len(), 1);
        assert_eq!(
            snapshot.expressions_for_key("proc.num/name=docker")[0].id,
            snapshot.expressions_for_key("proc.num/role=web")[0].id
        );
    }

    #[test]
    fn replace_swaps_whole_snapshot_atomically() {
        let indices = RuleIndices::new();
        assert!(indices.snapshot().strategies_for("h", "m").is_empty());

        indices.replace(RuleSnapshot::build(vec![strategy(1, "h", "m")], vec![]));
        assert_eq!(indices.snapshot().strategies_for("h", "m").len(), 1);

        indices.replace(RuleSnapshot::default());
        assert!(indices.snapshot().strategies_for("h", "m").is_empty());
    }
}
