use std::sync::Arc;

use clap::Parser;
use fakebooks::{config::LoggingConfig, CliArgs, Config, Emulator};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let mut emulator = match Emulator::open(&config) {
        Ok(emulator) => emulator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start emulator");
            std::process::exit(1);
        }
    };

    if config.metrics.enabled {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => emulator = emulator.with_metrics(handle),
            Err(e) => tracing::warn!(error = %e, "Metrics recorder not installed"),
        }
    }

    let addr = match config.listen_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(host = %config.server.host, error = %e, "Invalid listen address");
            std::process::exit(1);
        }
    };

    let app = Arc::new(emulator).router();
    let server = match axum::Server::try_bind(&addr) {
        Ok(builder) => builder,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "fakebooks listening");
    if let Err(e) = server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
