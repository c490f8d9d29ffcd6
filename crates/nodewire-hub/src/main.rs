use std::path::PathBuf;

use clap::Parser;

use nodewire_hub::{HubFileConfig, Supervisor};

#[derive(Parser)]
#[command(name = "nodewire-hub", about = "Accepts and supervises nodewire agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/nodewire/hub.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match HubFileConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        nodewire_hub::logging::init_json(&config.logging.level);
    } else {
        nodewire_hub::logging::init(&config.logging.level);
    }

    let mut supervisor = match Supervisor::from_file_config(&config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let handle = supervisor.shutdown_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    if let Err(e) = supervisor.start().await {
        tracing::error!("failed to start hub: {e}");
        std::process::exit(1);
    }

    if let Err(e) = supervisor.run().await {
        tracing::error!("hub event loop failed: {e}");
    }
    supervisor.shutdown().await;
}
