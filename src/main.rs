mod cli;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use eventgate::{CancellationToken, Connector, Gateway, Metrics, QueuePattern, ResponseHeader};
use eventgate_amqp::{AmqpConsumers, AmqpDialer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Version};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", Version::full());
        return Ok(());
    }

    init_tracing(cli.json_logs());

    let loaded = AppConfig::load(&AppConfig::search_path(&cli.config))?;
    for (path, reason) in &loaded.rejected {
        tracing::error!(path = %path.display(), %reason, "config: skipped");
    }
    if loaded.sources.is_empty() {
        tracing::info!("config: not loaded, using default preset");
    } else {
        let sources: Vec<_> = loaded.sources.iter().map(|p| p.display().to_string()).collect();
        tracing::info!(files = ?sources, "config: loaded");
    }

    let mut config = loaded.config;
    config.apply_env();

    if cli.dump_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let address = config.address()?;
    let nodes = config.broker_urls()?;
    let header = ResponseHeader::from_maps(&config.header.cors, &config.header.sse)
        .context("config: invalid response header")?;

    tracing::info!(
        version = %Version::long(),
        address = %address,
        nodes = nodes.len(),
        pattern = %config.queue.pattern,
        expires = config.queue.expires,
        "eventgate starting"
    );

    let cancel = CancellationToken::new();
    let metrics = Arc::new(Metrics::new());
    let sampler = metrics.start(cancel.clone());

    let supply = Connector::new(AmqpDialer::default(), nodes, metrics.clone()).spawn(cancel.clone());
    let consumers = AmqpConsumers::new(supply, config.queue.expires, metrics.clone());

    let served = Gateway::builder()
        .address(address)
        .pattern(QueuePattern::new(&config.queue.pattern))
        .consumers(consumers)
        .header(header)
        .metrics(metrics)
        .shutdown(cancel.clone())
        .build()?
        .launch()
        .await;

    cancel.cancel();
    let _ = sampler.await;

    served.context("server: failed")
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "eventgate=info,eventgate_server=info,eventgate_amqp=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
