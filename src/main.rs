use clap::Parser;

use plugkit_broker::BrokerConfig;

/// Dev-time relay for sandboxed design-tool plugins.
#[derive(Parser)]
#[command(name = "plugkit", version)]
struct Args {
    /// Base port of the plugin dev server; the relay listens one above it.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Verbose wire logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "plugkit=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("Starting plugkit relay");

    let config = BrokerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = plugkit_broker::start(config)
        .await
        .expect("Failed to start relay");

    tracing::info!(port = handle.port, "Relay ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
