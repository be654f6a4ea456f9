//! The rule-catalog fetcher: periodically pulls the full set of strategies
//! and expressions from the configured `hbs.servers` endpoints and swaps
//! them into the engine's [`judge_core::RuleIndices`] atomically.

use std::sync::Arc;
use std::time::Duration;

use exponential_backoff::Backoff;
use judge_core::{Expression, JudgeEngine, RuleSnapshot, Strategy};
use rand::Rng;
use serde::Deserialize;

use crate::error::ServiceError;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    strategies: Vec<Strategy>,
    #[serde(default)]
    expressions: Vec<Expression>,
}

/// A capped exponential reconnect backoff built around the
/// `exponential-backoff` crate: `Backoff::next` is 0-indexed
/// (`next(0)=1s, next(1)=2s, … next(6)=64s`), so the attempt counter cycles
/// through 0..=6 and the schedule repeats 1, 2, 4, 8, 16, 32, 64, 1, 2, …
/// forever, instead of exhausting. The crate's default jitter is disabled
/// so the schedule is exact rather than randomized.
struct CatalogBackoff {
    backoff: Backoff,
    attempt: u32,
}

impl CatalogBackoff {
    fn new() -> Self {
        let mut backoff = Backoff::new(7, Duration::from_secs(1), Some(Duration::from_secs(64)));
        backoff.set_jitter(0.0);
        Self { backoff, attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self
            .backoff
            .next(self.attempt)
            .unwrap_or(Duration::from_secs(64));
        self.attempt = if self.attempt >= 6 { 0 } else { self.attempt + 1 };
        delay
    }
}

pub struct CatalogFetcher {
    client: reqwest::Client,
    servers: Vec<String>,
    timeout: Duration,
}

impl CatalogFetcher {
    pub fn new(servers: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            servers,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Runs the fetch loop until `shutdown` resolves. On success, swaps the
    /// engine's rule indices in full; on failure, logs and retries with
    /// capped exponential backoff — the prior snapshot keeps serving in the
    /// meantime.
    pub async fn run(&self, engine: Arc<JudgeEngine>, shutdown: impl std::future::Future<Output = ()>) {
        let mut backoff = CatalogBackoff::new();
        tokio::pin!(shutdown);

        loop {
            match self.fetch_once().await {
                Ok(snapshot) => {
                    tracing::info!("rule catalog refreshed");
                    engine.rules.replace(snapshot);
                    backoff = CatalogBackoff::new();

                    let sleep = tokio::time::sleep(jittered_poll_interval());
                    tokio::select! {
                        () = sleep => {}
                        () = &mut shutdown => return,
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "rule catalog fetch failed; will retry");
                    let delay = backoff.next_delay();
                    let sleep = tokio::time::sleep(delay);
                    tokio::select! {
                        () = sleep => {}
                        () = &mut shutdown => return,
                    }
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<RuleSnapshot, ServiceError> {
        let mut last_err: Option<ServiceError> = None;

        for server in &self.servers {
            let url = format!("http://{server}/api/v1/catalog");
            let result = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(resp) => {
                    let body = resp.text().await.map_err(ServiceError::CatalogFetch)?;
                    let parsed: CatalogResponse =
                        serde_json::from_str(&body).map_err(ServiceError::CatalogDecode)?;
                    return Ok(RuleSnapshot::build(parsed.strategies, parsed.expressions));
                }
                Err(err) => {
                    tracing::warn!(%server, %err, "catalog server unreachable, trying next");
                    last_err = Some(ServiceError::CatalogFetch(err));
                }
            }
        }

        Err(last_err.unwrap_or(ServiceError::NoCatalogServers))
    }
}

/// 30s nominal poll interval, jittered by up to 10% so a fleet of
/// `judge-service` instances pointed at the same `hbs.servers` don't all
/// refetch in lockstep.
fn jittered_poll_interval() -> Duration {
    let base = Duration::from_secs(30);
    let jitter_ms = rand::thread_rng().gen_range(0..base.as_millis() as u64 / 10);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_wraps_after_seven_attempts() {
        let mut backoff = CatalogBackoff::new();
        let seconds: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(seconds, vec![1, 2, 4, 8, 16, 32, 64, 1, 2]);
    }

    #[test]
    fn catalog_response_defaults_missing_fields_to_empty() {
        let parsed: CatalogResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.strategies.is_empty());
        assert!(parsed.expressions.is_empty());
    }
}
