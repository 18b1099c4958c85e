//! Versand von Signalisierungsnachrichten
//!
//! [`SignalingVersand`] ist das Nachrichten-Primitiv des Mesh-Transports
//! aus Sicht der Engine. [`SignalNetz`] verbindet Knoten im selben Prozess
//! ueber tokio-Kanaele; Empfang und Verarbeitung laufen damit immer in
//! einer eigenen Task und nie im Aufrufer des Versands.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use meshcall_core::{MeshcallError, PeerId, Result};
use meshcall_protocol::CallMessage;
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Sendet Signalisierungsnachrichten an andere Peers
pub trait SignalingVersand: Send + Sync {
    /// Gezielte Nachricht an einen Peer
    fn senden(&self, ziel: &PeerId, nachricht: &CallMessage) -> Result<()>;

    /// Nachricht an alle erreichbaren Peers
    fn broadcast(&self, nachricht: &CallMessage) -> Result<()>;
}

/// Empfangsseite eines Knotens im [`SignalNetz`]
pub type Posteingang = mpsc::UnboundedReceiver<Vec<u8>>;

/// Prozessinternes Signalisierungsnetz
#[derive(Default)]
pub struct SignalNetz {
    postfaecher: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl SignalNetz {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Meldet einen Peer an. Eine erneute Anmeldung ersetzt das alte Postfach.
    pub fn anmelden(self: &Arc<Self>, peer: PeerId) -> (Arc<KanalVersand>, Posteingang) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.postfaecher.write().insert(peer.clone(), tx);
        let versand = Arc::new(KanalVersand {
            absender: peer,
            netz: Arc::downgrade(self),
        });
        (versand, rx)
    }

    pub fn abmelden(&self, peer: &PeerId) {
        self.postfaecher.write().remove(peer);
    }

    fn zustellen(&self, ziel: &PeerId, daten: Vec<u8>) -> Result<()> {
        let postfach = self
            .postfaecher
            .read()
            .get(ziel)
            .cloned()
            .ok_or_else(|| MeshcallError::link(format!("Peer {} nicht erreichbar", ziel.kurz())))?;
        postfach
            .send(daten)
            .map_err(|_| MeshcallError::link(format!("Postfach von {} geschlossen", ziel.kurz())))
    }
}

/// Versand eines Knotens im [`SignalNetz`]
pub struct KanalVersand {
    absender: PeerId,
    netz: Weak<SignalNetz>,
}

impl KanalVersand {
    fn netz(&self) -> Result<Arc<SignalNetz>> {
        self.netz
            .upgrade()
            .ok_or_else(|| MeshcallError::link("Signalisierungsnetz existiert nicht mehr"))
    }
}

impl SignalingVersand for KanalVersand {
    fn senden(&self, ziel: &PeerId, nachricht: &CallMessage) -> Result<()> {
        let daten = nachricht.to_bytes()?;
        tracing::trace!(
            typ = %nachricht.msg_type,
            ziel = %ziel.kurz(),
            bytes = daten.len(),
            "Signalisierung gesendet"
        );
        self.netz()?.zustellen(ziel, daten)
    }

    fn broadcast(&self, nachricht: &CallMessage) -> Result<()> {
        let daten = nachricht.to_bytes()?;
        let netz = self.netz()?;
        let ziele: Vec<PeerId> = netz
            .postfaecher
            .read()
            .keys()
            .filter(|p| **p != self.absender)
            .cloned()
            .collect();
        for ziel in ziele {
            if let Err(e) = netz.zustellen(&ziel, daten.clone()) {
                tracing::debug!(ziel = %ziel.kurz(), "Broadcast nicht zugestellt: {}", e);
            }
        }
        Ok(())
    }
}
