use clap::Parser;
use flowgate::{Application, Config, config::Args, telemetry};
use tokio::signal;

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable, only Ctrl+C stops the guard: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                tracing::warn!("Ctrl+C handler failed: {}", e);
                "Ctrl+C handler failure"
            }
        },
        _ = terminate => "SIGTERM",
    };
    tracing::info!("{} received, draining connections", received);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Both outbound clients use rustls without a bundled provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!(config_file = %args.config, "Loaded configuration");

    Application::new(config)?.serve(shutdown_signal()).await
}
