//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `MESHCALL_LOG_LEVEL`: Log-Level (trace/debug/info/warn/error), Standard: info
//! - `MESHCALL_LOG_FORMAT`: Format (text/json), Standard: text
//! - `RUST_LOG`: volle Filter-Direktiven, hat Vorrang vor dem Level
//!
//! Anruf-IDs und Peers werden als Felder der Log-Events mitgegeben.

use anyhow::anyhow;
use tracing_subscriber::{fmt, EnvFilter};

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte fallen auf `Text` zurueck
    pub fn parsen(format: &str) -> Self {
        match format {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Initialisiert das Logging-System.
///
/// `RUST_LOG` ueberschreibt `level`. Ein zweiter Aufruf liefert einen
/// Fehler, der globale Subscriber bleibt dann unveraendert.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match LogFormat::parsen(format) {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    ergebnis.map_err(|e| anyhow!("Logging bereits initialisiert: {e}"))
}

/// Gibt den konfigurierten Log-Level aus der Umgebung zurueck.
/// Fallback: `standard`
pub fn log_level_aus_env(standard: &str) -> String {
    std::env::var("MESHCALL_LOG_LEVEL").unwrap_or_else(|_| standard.to_string())
}

/// Gibt das konfigurierte Log-Format aus der Umgebung zurueck.
/// Fallback: `standard`
pub fn log_format_aus_env(standard: &str) -> String {
    std::env::var("MESHCALL_LOG_FORMAT").unwrap_or_else(|_| standard.to_string())
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level}");
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert_eq!(LogFormat::parsen("json"), LogFormat::Json);
        assert_eq!(LogFormat::parsen("xml"), LogFormat::Text);
    }

    // Setzen und Lesen in einem Test, damit parallele Tests sich nicht
    // gegenseitig die Umgebung veraendern
    #[test]
    fn umgebung_und_fallback() {
        std::env::remove_var("MESHCALL_LOG_LEVEL");
        std::env::remove_var("MESHCALL_LOG_FORMAT");
        assert_eq!(log_level_aus_env("info"), "info");
        assert_eq!(log_format_aus_env("text"), "text");

        std::env::set_var("MESHCALL_LOG_LEVEL", "debug");
        std::env::set_var("MESHCALL_LOG_FORMAT", "json");
        assert_eq!(log_level_aus_env("info"), "debug");
        assert_eq!(log_format_aus_env("text"), "json");
        std::env::remove_var("MESHCALL_LOG_LEVEL");
        std::env::remove_var("MESHCALL_LOG_FORMAT");
    }

    #[test]
    fn zweite_initialisierung_schlaegt_fehl() {
        let _ = logging_initialisieren("warn", "text");
        assert!(logging_initialisieren("warn", "json").is_err());
    }
}
