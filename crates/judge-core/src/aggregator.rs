//! The windowed-function catalog attached to rules: a closed set of
//! functions (`last`/`avg`, `max`, `min`, `diff`, `pdiff`, `happen`, `all`,
//! `sum`, `stddev`) parsed from a `name(#window[,k])` string and dispatched
//! on a tagged variant.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AggregatorError;
use crate::history::SeriesHistory;
use crate::model::{Operator, Sample};

static FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[a-zA-Z]+)\(#(?P<window>\d+)(?:,(?P<k>\d+(?:\.\d+)?))?\)$")
        .expect("FUNC_RE is a valid regex")
});

/// A parsed, ready-to-evaluate aggregator: the closed-set function kind,
/// its window, its optional second parameter (`happen`'s count threshold
/// or `stddev`'s deviation multiplier), and the comparison it applies.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    kind: Kind,
    window: usize,
    k: Option<f64>,
    operator: Operator,
    right_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    LastOrAvg,
    Max,
    Min,
    Diff,
    Pdiff,
    Happen,
    All,
    Sum,
    StdDev,
}

/// The outcome of running an [`Aggregator`] against a series.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeOutcome {
    /// The window of samples actually consulted, newest-first. Exactly
    /// `window` entries when `is_enough` is true; empty otherwise.
    pub history_window: Vec<Sample>,
    pub left_value: f64,
    pub is_triggered: bool,
    /// False when the series doesn't yet have enough samples for this
    /// aggregator's window; callers must treat this as "no verdict".
    pub is_enough: bool,
}

impl Aggregator {
    /// Parse `func` (shape `name(#W[,K])`) together with its operator and
    /// right-hand value. Unknown names, malformed windows, and non-numeric
    /// right-hand values are reported as [`AggregatorError`]; `right_value`
    /// is already a parsed `f64` here because the strategy/expression model
    /// stores it as a number rather than text, so the only "non-numeric
    /// right-hand value" case an implementation can still see is a
    /// non-finite one (NaN/infinite), which is rejected too.
    pub fn parse(func: &str, operator: Operator, right_value: f64) -> Result<Self, AggregatorError> {
        if !right_value.is_finite() {
            return Err(AggregatorError::NonNumericRightValue(
                right_value.to_string(),
            ));
        }

        let caps = FUNC_RE
            .captures(func.trim())
            .ok_or_else(|| AggregatorError::MalformedWindow(func.to_string()))?;

        let name = &caps["name"];
        let window: usize = caps["window"]
            .parse()
            .map_err(|_| AggregatorError::MalformedWindow(func.to_string()))?;
        if window == 0 {
            return Err(AggregatorError::MalformedWindow(func.to_string()));
        }
        let k: Option<f64> = match caps.name("k") {
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| AggregatorError::MalformedWindow(func.to_string()))?,
            ),
            None => None,
        };

        let kind = match name {
            "last" | "avg" => Kind::LastOrAvg,
            "max" => Kind::Max,
            "min" => Kind::Min,
            "diff" => Kind::Diff,
            "pdiff" => Kind::Pdiff,
            "happen" => Kind::Happen,
            "all" => Kind::All,
            "sum" => Kind::Sum,
            "stddev" => Kind::StdDev,
            other => return Err(AggregatorError::UnknownFunction(other.to_string())),
        };

        if matches!(kind, Kind::Happen | Kind::StdDev) && k.is_none() {
            return Err(AggregatorError::MalformedWindow(func.to_string()));
        }

        Ok(Self {
            kind,
            window,
            k,
            operator,
            right_value,
        })
    }

    /// Required series length for this aggregator: `window` for everything
    /// except `diff`/`pdiff`, which additionally need the latest sample on
    /// top of their `window` prior points.
    fn required_len(&self) -> usize {
        match self.kind {
            Kind::Diff | Kind::Pdiff => self.window + 1,
            _ => self.window,
        }
    }

    /// Evaluate this aggregator against `series`. The newest-to-oldest
    /// iteration is performed entirely while holding a read lock acquired
    /// by the caller via [`SeriesHistory::iter_newest_first`] scoping —
    /// see `engine::evaluate_sample`.
    pub fn compute(&self, series: &SeriesHistory) -> ComputeOutcome {
        if series.len() < self.required_len() {
            return ComputeOutcome {
                history_window: Vec::new(),
                left_value: 0.0,
                is_triggered: false,
                is_enough: false,
            };
        }

        let all: Vec<Sample> = series.iter_newest_first().take(self.required_len()).cloned().collect();

        match self.kind {
            Kind::LastOrAvg => {
                let window = all[..self.window].to_vec();
                let mean = average(&window);
                self.finish(window, mean, self.operator.apply(mean, self.right_value))
            }
            Kind::Max => {
                let window = all[..self.window].to_vec();
                let max = window.iter().map(|s| s.value).fold(f64::MIN, f64::max);
                self.finish(window, max, self.operator.apply(max, self.right_value))
            }
            Kind::Min => {
                let window = all[..self.window].to_vec();
                let min = window.iter().map(|s| s.value).fold(f64::MAX, f64::min);
                self.finish(window, min, self.operator.apply(min, self.right_value))
            }
            Kind::Sum => {
                let window = all[..self.window].to_vec();
                let sum: f64 = window.iter().map(|s| s.value).sum();
                self.finish(window, sum, self.operator.apply(sum, self.right_value))
            }
            Kind::All => {
                let window = all[..self.window].to_vec();
                let latest = window[0].value;
                let triggered = window
                    .iter()
                    .all(|s| self.operator.apply(s.value, self.right_value));
                self.finish(window, latest, triggered)
            }
            Kind::Happen => {
                let window = all[..self.window].to_vec();
                let count = window
                    .iter()
                    .filter(|s| self.operator.apply(s.value, self.right_value))
                    .count();
                let k = self.k.expect("happen always carries K");
                self.finish(window, count as f64, (count as f64) >= k)
            }
            Kind::StdDev => {
                let window = all[..self.window].to_vec();
                let mean = average(&window);
                let variance = window
                    .iter()
                    .map(|s| (s.value - mean).powi(2))
                    .sum::<f64>()
                    / window.len() as f64;
                let stddev = variance.sqrt();
                let latest = window[0].value;
                let z_score = if stddev == 0.0 {
                    0.0
                } else {
                    ((latest - mean) / stddev).abs()
                };
                let k = self.k.expect("stddev always carries K");
                self.finish(window, z_score, self.operator.apply(z_score, k))
            }
            Kind::Diff | Kind::Pdiff => {
                // all[0] is the latest sample; all[1..=window] are the
                // "prior W" the table describes.
                let latest = &all[0];
                let window: Vec<Sample> = all[1..=self.window].to_vec();
                let oldest = window.last().expect("window is non-empty");

                let left_value = if matches!(self.kind, Kind::Diff) {
                    latest.value - oldest.value
                } else if oldest.value != 0.0 {
                    (latest.value - oldest.value) / oldest.value * 100.0
                } else {
                    0.0
                };

                let triggered = window.iter().any(|point| {
                    let delta = if matches!(self.kind, Kind::Diff) {
                        latest.value - point.value
                    } else if point.value != 0.0 {
                        (latest.value - point.value) / point.value * 100.0
                    } else {
                        0.0
                    };
                    self.operator.apply(delta, self.right_value)
                });

                self.finish(window, left_value, triggered)
            }
        }
    }

    fn finish(&self, history_window: Vec<Sample>, left_value: f64, is_triggered: bool) -> ComputeOutcome {
        ComputeOutcome {
            history_window,
            left_value,
            is_triggered,
            is_enough: true,
        }
    }
}

fn average(samples: &[Sample]) -> f64 {
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn push(series: &mut SeriesHistory, ts: i64, value: f64) {
        series.push_front_and_maintain(
            Sample {
                endpoint: "h".into(),
                metric: "m".into(),
                tags: HashMap::new(),
                timestamp: ts,
                value,
            },
            100,
        );
    }

    #[test]
    fn parse_rejects_unknown_function() {
        let err = Aggregator::parse("bogus(#3)", Operator::Gt, 1.0).unwrap_err();
        assert!(matches!(err, AggregatorError::UnknownFunction(_)));
    }

    #[test]
    fn parse_rejects_malformed_window() {
        assert!(Aggregator::parse("max(3)", Operator::Gt, 1.0).is_err());
        assert!(Aggregator::parse("max(#0)", Operator::Gt, 1.0).is_err());
        assert!(Aggregator::parse("happen(#3)", Operator::Gt, 1.0).is_err());
    }

    #[test]
    fn parse_rejects_non_finite_right_value() {
        let err = Aggregator::parse("max(#3)", Operator::Gt, f64::NAN).unwrap_err();
        assert!(matches!(err, AggregatorError::NonNumericRightValue(_)));
    }

    #[test]
    fn max_triggers_when_insufficient_then_sufficient() {
        let mut series = SeriesHistory::default();
        push(&mut series, 1, 2.0);
        push(&mut series, 2, 4.0);

        let agg = Aggregator::parse("max(#3)", Operator::Gt, 5.0).unwrap();
        assert!(!agg.compute(&series).is_enough);

        push(&mut series, 3, 6.0);
        let outcome = agg.compute(&series);
        assert!(outcome.is_enough);
        assert!(outcome.is_triggered);
        assert_eq!(outcome.left_value, 6.0);
        assert_eq!(outcome.history_window.len(), 3);
    }

    #[test]
    fn happen_counts_matches() {
        let mut series = SeriesHistory::default();
        for (ts, v) in [(1, 1.0), (2, 9.0), (3, 9.0), (4, 1.0), (5, 9.0)] {
            push(&mut series, ts, v);
        }
        let agg = Aggregator::parse("happen(#5,3)", Operator::Ge, 5.0).unwrap();
        let outcome = agg.compute(&series);
        assert!(outcome.is_enough);
        assert_eq!(outcome.left_value, 3.0);
        assert!(outcome.is_triggered);
    }

    #[test]
    fn diff_triggers_against_any_prior_point() {
        let mut series = SeriesHistory::default();
        for (ts, v) in [(1, 10.0), (2, 10.0), (3, 11.0), (4, 20.0)] {
            push(&mut series, ts, v);
        }
        let agg = Aggregator::parse("diff(#3)", Operator::Gt, 8.0).unwrap();
        let outcome = agg.compute(&series);
        assert!(outcome.is_enough);
        // latest (20) - oldest in window (10) = 10
        assert_eq!(outcome.left_value, 10.0);
        assert!(outcome.is_triggered);
    }

    #[test]
    fn all_requires_every_point_to_match() {
        let mut series = SeriesHistory::default();
        for (ts, v) in [(1, 1.0), (2, 1.0), (3, 1.0)] {
            push(&mut series, ts, v);
        }
        let agg = Aggregator::parse("all(#3)", Operator::Lt, 2.0).unwrap();
        assert!(agg.compute(&series).is_triggered);

        push(&mut series, 4, 5.0);
        let outcome = agg.compute(&series);
        assert!(!outcome.is_triggered);
    }
}
