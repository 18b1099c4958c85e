//! Meshcall Knoten - Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet die Demo.

use anyhow::Result;
use meshcall_node::{demo, NodeConfig};
use meshcall_observability::{log_format_aus_env, log_level_aus_env, logging_initialisieren};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("MESHCALL_CONFIG").unwrap_or_else(|_| "meshcall.toml".into());

    let config = NodeConfig::laden(&config_pfad)?;
    config.validieren()?;

    logging_initialisieren(
        &log_level_aus_env(&config.logging.level),
        &log_format_aus_env(&config.logging.format),
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        codec = %config.codec.codec,
        "Meshcall Knoten wird initialisiert"
    );

    demo::ausfuehren(config).await
}
