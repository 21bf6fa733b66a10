//! kafka-request-logger: reverse proxy that publishes a snapshot of every
//! request and response to Kafka, correlated by a trace header.

mod config;
mod proxy;
mod server;
mod stats;
mod telemetry;

use std::time::Duration;

use config::ProxyConfig;
use server::AppState;
use stats::PublishStats;
use telemetry::pipeline::Pipeline;
use telemetry::publisher::{Dispatcher, KafkaSink};
use telemetry::settings::parse_brokers;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("KRL_CONFIG").ok())
            .unwrap_or_else(|| "kafka-request-logger.toml".to_string())
    };

    let config = ProxyConfig::load(&config_path)?;

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let _tracing_guard = logger_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream = %config.upstream.url,
            brokers = ?parse_brokers(&config.logger.brokers),
            routes = config.logger.routes.len(),
            "Starting kafka-request-logger"
        );
        if parse_brokers(&config.logger.brokers).is_empty() {
            tracing::warn!("No kafka brokers configured, snapshots will only be published for routes that set their own");
        }

        run(config).await
    })
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let dispatcher = Dispatcher::new(
        KafkaSink::new(&config.publisher),
        &config.publisher,
        PublishStats::new(),
    );
    let pipeline = Pipeline::new(config.logger.clone(), dispatcher);

    let state = AppState {
        config,
        client,
        pipeline,
    };

    server::run(state).await
}
