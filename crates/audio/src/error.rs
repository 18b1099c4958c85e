//! Fehlertypen fuer die Audio-Pipeline

use meshcall_core::MeshcallError;
use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Pipeline
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Codec nicht einkompiliert: {0}")]
    CodecNichtVerfuegbar(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AudioError {
    /// Fehler, bei denen die Pipeline in den Stub-Modus wechselt
    pub fn erzwingt_stub(&self) -> bool {
        matches!(
            self,
            Self::GeraetNichtGefunden(_)
                | Self::KeinStandardEingabegeraet
                | Self::KeinStandardAusgabegeraet
                | Self::StreamFehler(_)
                | Self::CodecNichtVerfuegbar(_)
        )
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for MeshcallError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::CodecFehler(m) => MeshcallError::Codec(m),
            AudioError::CodecNichtVerfuegbar(m) => MeshcallError::Codec(m),
            AudioError::Konfiguration(m) => MeshcallError::Konfiguration(m),
            AudioError::Anyhow(e) => MeshcallError::Anyhow(e),
            andere => MeshcallError::Geraet(andere.to_string()),
        }
    }
}
