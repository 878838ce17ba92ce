//! streamcore: the core of a multi-tenant event streaming platform.
//!
//! Composition root wiring one broker adapter, the transactional outbox and
//! its dispatcher, the exactly-once dedupe processor, and the ordered
//! processor. No REST/CLI surface lives here; this binary's job is to start
//! the background loops and stay up.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use streamcore_broker::{BrokerAdapter, KafkaBroker, KafkaConfig, MemoryBroker, MemoryBrokerConfig, RedisStreamBroker, RedisStreamConfig};
use streamcore_dedupe::{ExactlyOnceProcessor, ProcessorConfig, RedisDedupeStore};
use streamcore_outbox::{DispatcherConfig, OutboxDispatcher, PostgresOutboxStore};
use streamcore_ordered::{Handler, HandlerFuture, OrderedConfig, OrderedProcessor};
use telemetry::{health, init_tracing_from_env};
use tokio::signal;
use tracing::{error, info};

/// Which `BrokerAdapter` realization the process wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum BrokerKind {
    Memory,
    Kafka,
    RedisStream,
}

impl Default for BrokerKind {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    broker_kind: BrokerKind,
    #[serde(default)]
    kafka: KafkaConfig,
    #[serde(default)]
    redis_stream: RedisStreamConfig,

    #[serde(default = "default_database_url")]
    database_url: String,
    #[serde(default = "default_dedupe_redis_url")]
    dedupe_redis_url: String,
    #[serde(default = "default_consumer_group")]
    consumer_group: String,

    /// Topics the composition root's own consume loop subscribes to. Empty
    /// by default: this binary has no business-logic handler of its own, so
    /// there is nothing useful to consume until an embedding application
    /// configures topics of interest.
    #[serde(default)]
    consume_topics: Vec<String>,
    #[serde(default = "default_consume_auto_commit")]
    consume_auto_commit: bool,
}

fn default_consume_auto_commit() -> bool {
    true
}

fn default_database_url() -> String {
    "postgres://localhost/streamcore".to_string()
}

fn default_dedupe_redis_url() -> String {
    "redis://localhost".to_string()
}

fn default_consumer_group() -> String {
    "streamcore-default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_kind: BrokerKind::default(),
            kafka: KafkaConfig::default(),
            redis_stream: RedisStreamConfig::default(),
            database_url: default_database_url(),
            dedupe_redis_url: default_dedupe_redis_url(),
            consumer_group: default_consumer_group(),
            consume_topics: Vec::new(),
            consume_auto_commit: default_consume_auto_commit(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing_from_env();

    info!("starting streamcore v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let broker: Arc<dyn BrokerAdapter> = match config.broker_kind {
        BrokerKind::Memory => Arc::new(MemoryBroker::new(MemoryBrokerConfig::default())),
        BrokerKind::Kafka => Arc::new(KafkaBroker::new(config.kafka.clone())),
        BrokerKind::RedisStream => Arc::new(RedisStreamBroker::new(config.redis_stream.clone())),
    };

    broker.connect().await.context("failed to connect broker adapter")?;
    if broker.health_check().await {
        health().broker.set_healthy();
        info!(kind = ?config.broker_kind, "broker connection: healthy");
    } else {
        health().broker.set_unhealthy("connection failed");
        error!("broker connection: unhealthy");
    }

    let outbox_store = Arc::new(
        PostgresOutboxStore::connect(&config.database_url)
            .await
            .context("failed to connect outbox store")?,
    );
    health().outbox_store.set_healthy();

    let dispatcher = Arc::new(OutboxDispatcher::new(
        outbox_store.clone(),
        broker.clone(),
        DispatcherConfig::default(),
    ));
    let _dispatcher_handles = dispatcher.clone().start();
    info!("outbox dispatcher started");

    let dedupe_store = Arc::new(RedisDedupeStore::new(config.dedupe_redis_url.clone()));
    health().dedupe_store.set_healthy();

    let exactly_once = Arc::new(ExactlyOnceProcessor::new(
        dedupe_store,
        ProcessorConfig::new(config.consumer_group.clone()),
    ));
    let _dedupe_cleanup_handle = exactly_once.clone().start_cleanup_loop();
    info!("exactly-once dedupe processor started");

    let ordered = OrderedProcessor::new(OrderedConfig::default());
    let _ordered_handles = ordered.start();
    info!("ordered processor started");

    let _consume_handle = if config.consume_topics.is_empty() {
        info!("no consume_topics configured; consume loop not started");
        None
    } else {
        info!(topics = ?config.consume_topics, group = %config.consumer_group, "consume loop started");
        Some(spawn_consume_loop(
            broker.clone(),
            ordered.clone(),
            exactly_once.clone(),
            config.consume_topics.clone(),
            config.consumer_group.clone(),
            config.consume_auto_commit,
        ))
    };

    shutdown_signal().await;
    info!("shutdown signal received, disconnecting broker");

    if let Err(e) = broker.disconnect().await {
        error!("error disconnecting broker: {}", e);
    }

    info!("shutdown complete");
    Ok(())
}

/// Drives the broker's `subscribe` stream through the ordered processor and
/// the exactly-once processor: each delivered record is handed to
/// `OrderedProcessor::submit_event` so same-partition-key events stay in
/// order, and the per-partition worker wraps the actual handler call in
/// `ExactlyOnceProcessor::wrap` so redelivery under `auto_commit=true` does
/// not reprocess an already-completed event.
fn spawn_consume_loop(
    broker: Arc<dyn BrokerAdapter>,
    ordered: Arc<OrderedProcessor>,
    exactly_once: Arc<ExactlyOnceProcessor>,
    topics: Vec<String>,
    group_id: String,
    auto_commit: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut records = broker.subscribe(topics, group_id, auto_commit);
        while let Some(delivered) = records.next().await {
            let record = match delivered {
                Ok(record) => record,
                Err(e) => {
                    error!(error = %e, "consume loop: poll error");
                    continue;
                }
            };

            let exactly_once = exactly_once.clone();
            let handler: Handler = Arc::new(move |envelope| {
                let exactly_once = exactly_once.clone();
                Box::pin(async move {
                    exactly_once
                        .wrap(&envelope, |_envelope| async { Ok(()) })
                        .await
                        .map(|_outcome| ())
                }) as HandlerFuture
            });

            if let Err(e) = ordered.submit_event(record.envelope, handler).await {
                error!(error = %e, "consume loop: failed to submit event for ordered processing");
            }
        }
    })
}

fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("STREAMCORE")
                .try_parsing(true),
        )
        .build()
        .context("failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("failed to deserialize configuration")?;

    if let Ok(brokers) = std::env::var("STREAMCORE_KAFKA_BROKERS") {
        config.kafka.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(database_url) = std::env::var("STREAMCORE_DATABASE_URL") {
        config.database_url = database_url;
    }
    if let Ok(redis_url) = std::env::var("STREAMCORE_DEDUPE_REDIS_URL") {
        config.dedupe_redis_url = redis_url;
    }

    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received terminate signal"),
    }
}
