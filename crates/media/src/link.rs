//! Link- und Transport-Abstraktion
//!
//! Ein [`MediaLink`] ist eine verschluesselte Punkt-zu-Punkt-Verbindung
//! des Mesh-Transports. Die Session spricht Links ausschliesslich ueber
//! dieses Trait an.

use std::sync::Arc;

use meshcall_core::Result;
use meshcall_protocol::MediaEndpoint;
use serde::Serialize;

/// Zustand eines Links aus Sicht des Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkStatus {
    Pending,
    Handshake,
    Active,
    Closed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Handshake => "handshake",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Empfangene Rohdaten eines Links
pub type DatenCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
/// Link wurde geschlossen
pub type SchliessCallback = Box<dyn Fn() + Send + Sync>;
/// Link ist aufgebaut (ausgehend) bzw. eingegangen (eingehend)
pub type LinkCallback = Box<dyn Fn(Arc<dyn MediaLink>) + Send + Sync>;

/// Verbindung fuer Sprachdaten
pub trait MediaLink: Send + Sync {
    /// Kennung fuer Logs
    fn link_id(&self) -> String;

    /// Sendet ein Paket. Schlaegt fehl, wenn der Link nicht aktiv ist.
    fn send(&self, daten: &[u8]) -> Result<()>;

    /// Registriert den Empfangs-Callback (ersetzt einen vorherigen)
    fn on_data(&self, callback: DatenCallback);

    /// Registriert den Schliess-Callback (ersetzt einen vorherigen)
    fn on_closed(&self, callback: SchliessCallback);

    fn status(&self) -> LinkStatus;

    fn is_active(&self) -> bool {
        self.status() == LinkStatus::Active
    }

    fn is_encrypted(&self) -> bool;

    /// Link-spezifisches Geheimnis, auf beiden Seiten identisch
    fn secret(&self) -> Vec<u8>;

    /// Baut den Link ab. Mehrfacher Aufruf ist unschaedlich.
    fn teardown(&self);
}

/// Mesh-Transport aus Sicht der Media-Schicht
pub trait MediaTransport: Send + Sync {
    /// Eigener Medien-Endpunkt fuer Announces und Annahmen
    fn local_endpoint(&self) -> MediaEndpoint;

    /// Startet den Aufbau eines ausgehenden Links. Die Callbacks laufen
    /// in einem Transport-Thread.
    fn create_outbound_link(
        &self,
        ziel: &str,
        identity_key: &str,
        on_established: LinkCallback,
        on_closed: SchliessCallback,
    ) -> Result<Arc<dyn MediaLink>>;

    /// Registriert den Empfaenger fuer eingehende Links
    fn set_inbound_link_handler(&self, handler: LinkCallback);
}
