//! The stale-series reaper: periodically drops series whose newest sample
//! has aged out past the configured horizon.

use std::sync::Arc;
use std::time::Duration;

use judge_core::JudgeEngine;

pub struct Reaper {
    interval: Duration,
    horizon_secs: i64,
}

impl Reaper {
    pub fn new(interval_secs: u64, horizon_secs: i64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            horizon_secs,
        }
    }

    pub async fn run(&self, engine: Arc<JudgeEngine>, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_unix();
                    let horizon = now - self.horizon_secs;
                    let removed = engine.history.clean_stale(horizon);
                    if removed > 0 {
                        tracing::info!(removed, horizon, "reaped stale series");
                    }
                }
                () = &mut shutdown => return,
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs() as i64
}
