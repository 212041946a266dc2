use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use campaign_insights::config::Config;
use campaign_insights::metrics_server::{router, serve, setup_metrics_recorder};
use campaign_insights::service::InsightsService;

fn init_tracing() {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if let Ok(directive) = "rdkafka=warn".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    // LOG_FORMAT=json for structured output in deployed environments
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let log_layer = if json {
        tracing_subscriber::fmt::layer().json().with_filter(filter).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_filter(filter).boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

fn start_server(config: &Config, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
    let recorder = setup_metrics_recorder().context("Failed to install metrics recorder")?;
    let bind = config.bind_address();

    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router(recorder), &bind, shutdown).await {
            error!(error = %e, bind = %bind, "metrics server failed");
        }
    }))
}

fn listen_for_shutdown(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received interrupt, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for interrupt, shutting down"),
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting campaign insights service");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    let shutdown = CancellationToken::new();
    let server_handle = start_server(&config, shutdown.clone())?;
    info!("Started metrics server on {}", config.bind_address());

    listen_for_shutdown(shutdown.clone());

    let service = InsightsService::new(config)
        .await
        .context("Failed to create campaign insights service")?;

    let result = service.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = server_handle.await {
        error!(error = %e, "metrics server task failed");
    }

    let stats = result?;
    info!(
        persisted = stats.persisted,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        "campaign insights service exited"
    );
    Ok(())
}
