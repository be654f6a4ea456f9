use thiserror::Error;

/// Errors surfaced at the three task boundaries this binary owns: startup,
/// the catalog fetcher's transport, and the downstream queue's transport.
/// Never reaches the ingest path — ingest itself never fails.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind gRPC listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rule catalog fetch failed")]
    CatalogFetch(#[from] reqwest::Error),

    #[error("rule catalog response was malformed")]
    CatalogDecode(#[from] serde_json::Error),

    #[error("no hbs.servers configured")]
    NoCatalogServers,

    #[error("event could not be encoded for the downstream queue")]
    EventEncode(serde_json::Error),

    #[error("downstream queue pool could not be built")]
    QueueConfig(#[from] deadpool_redis::CreatePoolError),

    #[error("downstream queue connection failed")]
    QueueConnection(#[from] deadpool_redis::PoolError),

    #[error("downstream queue push failed")]
    QueuePush(#[from] redis::RedisError),
}
