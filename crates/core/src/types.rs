//! Gemeinsame Identifikationstypen fuer Meshcall
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen Anruf-IDs
//! und Peer-IDs zur Compilezeit auszuschliessen. Auf dem Draht sind beide
//! einfache Strings (`#[serde(transparent)]`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Anruf-ID, vom Anrufer erzeugt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Erstellt eine neue zufaellige Anruf-ID (UUID v4)
    pub fn neu() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Leere ID (nur fuer PRESENCE_ANNOUNCE zulaessig)
    pub fn leer() -> Self {
        Self(String::new())
    }

    pub fn ist_leer(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Knoten-ID eines Peers (hex-kodierter Identitaets-Hash)
///
/// Leer bedeutet Broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Broadcast-Adresse (leere ID)
    pub fn broadcast() -> Self {
        Self(String::new())
    }

    pub fn ist_broadcast(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Gekuerzte Darstellung fuer Log-Ausgaben (erste 16 Zeichen)
    pub fn kurz(&self) -> &str {
        let ende = self
            .0
            .char_indices()
            .nth(16)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..ende]
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
