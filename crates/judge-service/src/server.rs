//! The gRPC ingest surface: wraps [`judge_core::JudgeEngine`] in the
//! generated `JudgeIngest` service. Ingestion itself cannot fail — a
//! malformed or out-of-order sample is dropped, not rejected — so `send`
//! only ever returns `Ok`; the only error surface here is the downstream
//! queue push, which is logged and swallowed rather than propagated to the
//! caller.

use std::collections::HashMap;
use std::sync::Arc;

use judge_core::{JudgeEngine, Sample};
use judge_proto::judge_ingest_server::JudgeIngest;
use judge_proto::{PingRequest, PingResponse, SendRequest, SendResponse};
use tonic::{Request, Response, Status};

use crate::queue::AlertQueue;

pub struct JudgeIngestService {
    engine: Arc<JudgeEngine>,
    queue: Arc<AlertQueue>,
}

impl JudgeIngestService {
    pub fn new(engine: Arc<JudgeEngine>, queue: Arc<AlertQueue>) -> Self {
        Self { engine, queue }
    }
}

#[tonic::async_trait]
impl JudgeIngest for JudgeIngestService {
    async fn send(&self, request: Request<SendRequest>) -> Result<Response<SendResponse>, Status> {
        let items = request.into_inner().items;
        let samples: Vec<Sample> = items.into_iter().map(wire_to_sample).collect();
        let now = now_unix();

        let events = self.engine.ingest_batch(samples, now);
        for event in &events {
            if let Err(err) = self.queue.push(event).await {
                tracing::error!(%err, event_id = %event.id, "failed to push event to downstream queue");
            }
        }

        Ok(Response::new(SendResponse {}))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {}))
    }
}

fn wire_to_sample(wire: judge_proto::Sample) -> Sample {
    Sample {
        endpoint: wire.endpoint,
        metric: wire.metric,
        tags: wire.tags.into_iter().collect::<HashMap<_, _>>(),
        timestamp: wire.timestamp,
        value: wire.value,
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs() as i64
}
