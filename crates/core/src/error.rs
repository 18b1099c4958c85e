//! Fehlertypen fuer Meshcall
//!
//! Zentraler Fehler-Enum fuer die Anruf-Engine. Untergeordnete Crates
//! (z.B. Audio) definieren eigene Fehler und konvertieren via `From`.
//!
//! Behandlungsregeln:
//! - `Protokoll`, `FilterRejection`: Nachricht verwerfen, kein Zustandswechsel
//! - `CallBusy`, `NoIncomingCall`: synchron an den Aufrufer zurueck
//! - `Link`: nur der betroffene Anrufversuch endet
//! - `Codec`: einzelner Frame wird verworfen, der Stream laeuft weiter
//! - `Geraet`: Audio-Pipeline laeuft im Stub-Modus weiter

use thiserror::Error;

/// Globaler Result-Alias fuer Meshcall
pub type Result<T> = std::result::Result<T, MeshcallError>;

/// Alle Fehler der Anruf-Engine
#[derive(Debug, Error)]
pub enum MeshcallError {
    // --- Anrufsteuerung ---
    #[error("Anruf bereits aktiv: Leitung besetzt")]
    CallBusy,

    #[error("Kein eingehender Anruf vorhanden")]
    NoIncomingCall,

    // --- Signalisierung ---
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Nachricht abgewiesen: {0}")]
    FilterRejection(String),

    #[error("Anruflimit ueberschritten fuer Peer {0}")]
    RateLimitExceeded(String),

    // --- Medien ---
    #[error("Link-Fehler: {0}")]
    Link(String),

    #[error("Codec-Fehler: {0}")]
    Codec(String),

    #[error("Audio-Geraet nicht verfuegbar: {0}")]
    Geraet(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MeshcallError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Erstellt einen Link-Fehler
    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler nur einen einzelnen Frame oder ein
    /// einzelnes Paket betrifft und lokal behoben wird
    pub fn ist_transient(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::Protokoll(_))
    }

    /// Gibt true zurueck wenn der Fehler eine Verletzung der
    /// Zustands-Vorbedingungen einer Anrufoperation ist
    pub fn ist_zustandsfehler(&self) -> bool {
        matches!(self, Self::CallBusy | Self::NoIncomingCall)
    }
}

impl From<serde_json::Error> for MeshcallError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protokoll(e.to_string())
    }
}
