//! # Mixer
//!
//! Serves knowledge-graph and statistics queries from layered caches.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  apps/mixer (THE BINARY)                  │
//! │                                                           │
//! │   ┌─────────────┐        ┌─────────────┐                  │
//! │   │    CLI      │        │  HTTP API   │                  │
//! │   │   (clap)    │        │   (axum)    │                  │
//! │   └──────┬──────┘        └──────┬──────┘                  │
//! │          └───────────┬──────────┘                         │
//! │                      ▼                                    │
//! │              ┌───────────────┐                            │
//! │              │ Orchestrator  │  fan-out, deadlines        │
//! │              └───────┬───────┘                            │
//! │                      ▼                                    │
//! │              ┌───────────────┐                            │
//! │              │  mixer-core   │  stores, codec, merge      │
//! │              └───────────────┘                            │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! mixer init-config > mixer.toml
//! mixer -c mixer.toml load --target base --input base.jsonl --revision 1
//! mixer -c mixer.toml serve --port 8080
//! mixer -c mixer.toml query property-values --dcids geoId/06 --property name
//! ```

use clap::Parser;
use mixer::MixerConfig;
use mixer::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // MIXER_LOG_FORMAT wins over the config file; a broken config still
    // gets a subscriber so the error below is reported.
    let log_format = std::env::var("MIXER_LOG_FORMAT").unwrap_or_else(|_| {
        cli.config
            .as_deref()
            .and_then(|p| MixerConfig::from_file(p).ok())
            .map(|c| c.logging.format)
            .unwrap_or_else(|| "text".to_string())
    });
    init_tracing(&log_format);

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mixer=info,mixer_core=info,tower_http=debug".into());

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn print_banner() {
    println!(
        r#"
  ╔╦╗╦═╗ ╦╔═╗╦═╗
  ║║║║╔╩╦╝║╣ ╠╦╝
  ╩ ╩╩╩ ╚═╚═╝╩╚═

  Knowledge-graph mixer v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
