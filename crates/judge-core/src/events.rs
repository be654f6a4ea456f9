//! The event state machine: converts a per-sample verdict into a
//! `PROBLEM`, a `RECOVERY` (`OK`), or a suppression, tracked per event-id
//! in the process-wide last-events index. The read-decide-write sequence
//! for a given event-id runs atomically under a single index-wide write
//! lock, so two evaluations racing on the same event-id serialize instead
//! of racing a separate get and set.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::aggregator::ComputeOutcome;
use crate::model::{Event, EventStatus, RuleRef, Sample};

/// The process-wide mapping from event-id to the most recently emitted
/// event for that id.
#[derive(Default)]
pub struct LastEvents {
    inner: RwLock<HashMap<String, Event>>,
}

impl LastEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_id: &str) -> Option<Event> {
        self.inner
            .read()
            .expect("last-events lock poisoned")
            .get(event_id)
            .cloned()
    }

    /// Run the state machine for one rule/sample evaluation and, if it
    /// produces an emission, record it as the new last event for this id.
    ///
    /// The whole read-decide-write sequence runs under a single write
    /// lock, so two evaluations racing on the same event-id serialize and
    /// the later one observes the earlier one's emission, rather than the
    /// TOCTOU a separate get-then-set would allow.
    ///
    /// `outcome` must have `is_enough == true`; callers (the evaluation
    /// engine) never invoke this otherwise — insufficient data silently
    /// yields no verdict, before the state machine is reached.
    pub fn evaluate_and_set(
        &self,
        event_id: String,
        outcome: &ComputeOutcome,
        now: i64,
        min_interval: i64,
        rule: RuleRef,
        sample: &Sample,
    ) -> Option<Event> {
        debug_assert!(outcome.is_enough);

        let mut guard = self.inner.write().expect("last-events lock poisoned");
        let last = guard.get(&event_id);

        let decision = decide(last, outcome, now, min_interval, &rule, sample, event_id.clone());

        if let Some(event) = &decision {
            guard.insert(event_id, event.clone());
        }
        decision
    }
}

/// The transition table this state machine implements, row by row.
///
/// Worked example: with `max(#3) > 3` over history `2, 4, 4, 5, 6` the first
/// `4` triggers a `PROBLEM`. The second `4` (still inside the `#3` window
/// anchored at the first alert) is suppressed because the window's oldest
/// point hasn't rolled past the alerted sample's timestamp yet; only once
/// the window is `4, 5, 6` (oldest timestamp newer than the alert) does the
/// next trigger fire, as a step-2 `PROBLEM`.
fn decide(
    last: Option<&Event>,
    outcome: &ComputeOutcome,
    now: i64,
    min_interval: i64,
    rule: &RuleRef,
    sample: &Sample,
    event_id: String,
) -> Option<Event> {
    let max_step = rule.max_step();

    if outcome.is_triggered {
        match last {
            None => new_problem(rule, sample, outcome, event_id, 1, max_step),
            Some(last) if last.status == EventStatus::Ok => {
                new_problem(rule, sample, outcome, event_id, 1, max_step)
            }
            Some(last) => {
                // LAST.status == Problem.
                if last.current_step >= max_step {
                    return None; // ceiling reached.
                }

                let oldest = outcome
                    .history_window
                    .last()
                    .expect("history_window is non-empty when is_enough");
                if oldest.timestamp <= last.event_time {
                    return None; // window still overlaps an already-alerted sample.
                }

                if now - last.event_time < min_interval {
                    return None; // pacing.
                }

                new_problem(
                    rule,
                    sample,
                    outcome,
                    event_id,
                    last.current_step + 1,
                    max_step,
                )
            }
        }
    } else {
        match last {
            Some(last) if last.status == EventStatus::Problem => Some(Event {
                id: event_id,
                status: EventStatus::Ok,
                current_step: 1,
                event_time: sample.timestamp,
                left_value: outcome.left_value,
                pushed_tags: sample.tags.clone(),
                rule: rule.clone(),
            }),
            _ => None,
        }
    }
}

fn new_problem(
    rule: &RuleRef,
    sample: &Sample,
    outcome: &ComputeOutcome,
    event_id: String,
    current_step: u32,
    max_step: u32,
) -> Option<Event> {
    if max_step == 0 {
        return None; // max-step of zero blanket-suppresses alerting.
    }
    Some(Event {
        id: event_id,
        status: EventStatus::Problem,
        current_step,
        event_time: sample.timestamp,
        left_value: outcome.left_value,
        pushed_tags: sample.tags.clone(),
        rule: rule.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operator, Strategy};
    use std::collections::HashMap as Map;

    fn rule(max_step: u32) -> RuleRef {
        RuleRef::Strategy(Strategy {
            id: 1,
            endpoint: "host01".into(),
            metric: "cpu.idle".into(),
            func: "max(#3)".into(),
            operator: Operator::Gt,
            right_value: 5.0,
            tags: Map::new(),
            max_step,
            priority: 1,
        })
    }

    fn sample(ts: i64) -> Sample {
        Sample {
            endpoint: "host01".into(),
            metric: "cpu.idle".into(),
            tags: Map::new(),
            timestamp: ts,
            value: 0.0,
        }
    }

    fn outcome(window_timestamps: &[i64], left_value: f64, triggered: bool) -> ComputeOutcome {
        ComputeOutcome {
            history_window: window_timestamps
                .iter()
                .map(|ts| Sample {
                    value: left_value,
                    ..sample(*ts)
                })
                .collect(),
            left_value,
            is_triggered: triggered,
            is_enough: true,
        }
    }

    // Scenario 1: first breach emits one PROBLEM, current_step=1.
    #[test]
    fn scenario_first_breach_emits_problem() {
        let events = LastEvents::new();
        let out = outcome(&[3, 2, 1], 6.0, true);
        let event = events
            .evaluate_and_set("s_1_pk".into(), &out, 3, 0, rule(3), &sample(3))
            .expect("emits");
        assert_eq!(event.status, EventStatus::Problem);
        assert_eq!(event.current_step, 1);
    }

    // Scenario 2: repeat suppression within window.
    #[test]
    fn scenario_repeat_suppressed_within_window() {
        let events = LastEvents::new();
        events.evaluate_and_set("id".into(), &outcome(&[3, 2, 1], 6.0, true), 3, 0, rule(3), &sample(3));

        // window [7,6,4] at t=4; oldest (t=2) <= last.event_time (3).
        let out = outcome(&[4, 3, 2], 7.0, true);
        let result = events.evaluate_and_set("id".into(), &out, 4, 0, rule(3), &sample(4));
        assert!(result.is_none());
    }

    // Scenario 3: step increments once the window rolls past.
    #[test]
    fn scenario_step_increments_after_window_rolls_past() {
        let events = LastEvents::new();
        events.evaluate_and_set("id".into(), &outcome(&[3, 2, 1], 6.0, true), 3, 0, rule(3), &sample(3));
        // Still overlapping: oldest ts=3 == last.event_time 3, suppressed.
        events.evaluate_and_set("id".into(), &outcome(&[5, 4, 3], 8.0, true), 5, 0, rule(3), &sample(5));

        // Window rolls past: oldest ts=4 > last.event_time 3.
        let out = outcome(&[6, 5, 4], 9.0, true);
        let event = events
            .evaluate_and_set("id".into(), &out, 6, 0, rule(3), &sample(6))
            .expect("emits step 2");
        assert_eq!(event.current_step, 2);
    }

    // Scenario 4: recovery.
    #[test]
    fn scenario_recovery_resets_step() {
        let events = LastEvents::new();
        events.evaluate_and_set("id".into(), &outcome(&[3, 2, 1], 6.0, true), 3, 0, rule(3), &sample(3));

        let not_triggered = outcome(&[9, 8, 7], 1.0, false);
        let recovery = events
            .evaluate_and_set("id".into(), &not_triggered, 9, 0, rule(3), &sample(9))
            .expect("emits OK");
        assert_eq!(recovery.status, EventStatus::Ok);
        assert_eq!(recovery.current_step, 1);

        let retrigger = events
            .evaluate_and_set("id".into(), &outcome(&[12, 11, 10], 9.0, true), 12, 0, rule(3), &sample(12))
            .expect("emits again from step 1");
        assert_eq!(retrigger.current_step, 1);
    }

    // Scenario 5: max-step ceiling.
    #[test]
    fn scenario_max_step_ceiling() {
        let events = LastEvents::new();
        let r = rule(2);
        events.evaluate_and_set("id".into(), &outcome(&[3, 2, 1], 6.0, true), 3, 0, r.clone(), &sample(3));
        let step2 = events
            .evaluate_and_set("id".into(), &outcome(&[6, 5, 4], 9.0, true), 6, 0, r.clone(), &sample(6))
            .expect("emits step 2");
        assert_eq!(step2.current_step, 2);

        // Window rolls past again but step already at ceiling (2).
        let suppressed = events.evaluate_and_set(
            "id".into(),
            &outcome(&[9, 8, 7], 10.0, true),
            9,
            0,
            r,
            &sample(9),
        );
        assert!(suppressed.is_none());
    }

    #[test]
    fn max_step_zero_blanket_suppresses() {
        let events = LastEvents::new();
        let result = events.evaluate_and_set(
            "id".into(),
            &outcome(&[3, 2, 1], 6.0, true),
            3,
            0,
            rule(0),
            &sample(3),
        );
        assert!(result.is_none());
        assert!(events.get("id").is_none());
    }

    #[test]
    fn pacing_suppresses_within_min_interval() {
        let events = LastEvents::new();
        events.evaluate_and_set("id".into(), &outcome(&[3, 2, 1], 6.0, true), 3, 0, rule(3), &sample(3));

        // Window has rolled past (oldest ts=4 > 3) but min_interval=100 blocks it.
        let result = events.evaluate_and_set(
            "id".into(),
            &outcome(&[6, 5, 4], 9.0, true),
            6,
            100,
            rule(3),
            &sample(6),
        );
        assert!(result.is_none());
    }
}
