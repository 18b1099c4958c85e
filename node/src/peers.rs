//! Peer-Verzeichnis
//!
//! Bekannte Peers mit Anzeigename und Medien-Endpunkt aus Presence-Announces
//! sowie den lokalen Markierungen "gesperrt" und "verifiziert".

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshcall_core::PeerId;
use meshcall_protocol::MediaEndpoint;
use serde::Serialize;

use crate::config::PeerEinstellungen;

/// Eintrag eines bekannten Peers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeerEintrag {
    pub display_name: Option<String>,
    pub media: Option<MediaEndpoint>,
    pub verifiziert: bool,
    pub gesperrt: bool,
    /// Zeitpunkt des letzten Announces
    pub zuletzt_gesehen: Option<DateTime<Utc>>,
}

/// Thread-sicheres Verzeichnis aller bekannten Peers
#[derive(Debug, Default)]
pub struct PeerVerzeichnis {
    peers: DashMap<PeerId, PeerEintrag>,
}

impl PeerVerzeichnis {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Uebernimmt gesperrte und verifizierte Peers aus der Konfiguration
    pub fn aus_konfig(konfig: &PeerEinstellungen) -> Self {
        let verzeichnis = Self::neu();
        for peer in &konfig.gesperrt {
            verzeichnis.sperren(&PeerId::from(peer.as_str()));
        }
        for peer in &konfig.verifiziert {
            verzeichnis.als_verifiziert_markieren(&PeerId::from(peer.as_str()));
        }
        verzeichnis
    }

    /// Verarbeitet einen Presence-Announce. Fehlende Angaben ueberschreiben
    /// bekannte Werte nicht.
    pub fn ankuendigung(
        &self,
        peer: &PeerId,
        display_name: Option<&str>,
        media: Option<MediaEndpoint>,
    ) {
        let mut eintrag = self.peers.entry(peer.clone()).or_default();
        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            eintrag.display_name = Some(name.to_string());
        }
        if media.is_some() {
            eintrag.media = media;
        }
        eintrag.zuletzt_gesehen = Some(Utc::now());
        tracing::debug!(
            peer = %peer.kurz(),
            name = eintrag.display_name.as_deref().unwrap_or("-"),
            "Peer angekuendigt"
        );
    }

    pub fn eintrag(&self, peer: &PeerId) -> Option<PeerEintrag> {
        self.peers.get(peer).map(|e| e.clone())
    }

    pub fn display_name(&self, peer: &PeerId) -> Option<String> {
        self.peers.get(peer).and_then(|e| e.display_name.clone())
    }

    pub fn media_endpoint(&self, peer: &PeerId) -> Option<MediaEndpoint> {
        self.peers.get(peer).and_then(|e| e.media.clone())
    }

    pub fn ist_gesperrt(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(|e| e.gesperrt)
    }

    pub fn ist_verifiziert(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(|e| e.verifiziert)
    }

    pub fn sperren(&self, peer: &PeerId) {
        self.peers.entry(peer.clone()).or_default().gesperrt = true;
    }

    pub fn entsperren(&self, peer: &PeerId) {
        if let Some(mut e) = self.peers.get_mut(peer) {
            e.gesperrt = false;
        }
    }

    pub fn als_verifiziert_markieren(&self, peer: &PeerId) {
        self.peers.entry(peer.clone()).or_default().verifiziert = true;
    }

    /// Kopie aller Eintraege, sortiert nach Peer-ID
    pub fn alle(&self) -> Vec<(PeerId, PeerEintrag)> {
        let mut alle: Vec<_> = self
            .peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        alle.sort_by(|a, b| a.0.cmp(&b.0));
        alle
    }

    pub fn anzahl(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ankuendigung_fuellt_eintrag() {
        let verzeichnis = PeerVerzeichnis::neu();
        let peer = PeerId::from("beef");
        let ep = MediaEndpoint::neu("00ff", "AAAA");

        verzeichnis.ankuendigung(&peer, Some("Bob"), Some(ep.clone()));
        assert_eq!(verzeichnis.display_name(&peer).as_deref(), Some("Bob"));
        assert_eq!(verzeichnis.media_endpoint(&peer), Some(ep.clone()));
        assert!(verzeichnis.eintrag(&peer).unwrap().zuletzt_gesehen.is_some());

        // Announce ohne Angaben loescht nichts
        verzeichnis.ankuendigung(&peer, None, None);
        assert_eq!(verzeichnis.display_name(&peer).as_deref(), Some("Bob"));
        assert_eq!(verzeichnis.media_endpoint(&peer), Some(ep));
        assert_eq!(verzeichnis.anzahl(), 1);
    }

    #[test]
    fn sperren_und_verifizieren() {
        let verzeichnis = PeerVerzeichnis::aus_konfig(&PeerEinstellungen {
            gesperrt: vec!["dead".into()],
            verifiziert: vec!["cafe".into()],
        });
        assert!(verzeichnis.ist_gesperrt(&PeerId::from("dead")));
        assert!(verzeichnis.ist_verifiziert(&PeerId::from("cafe")));
        assert!(!verzeichnis.ist_gesperrt(&PeerId::from("cafe")));
        assert!(!verzeichnis.ist_verifiziert(&PeerId::from("unbekannt")));

        verzeichnis.entsperren(&PeerId::from("dead"));
        assert!(!verzeichnis.ist_gesperrt(&PeerId::from("dead")));

        let alle = verzeichnis.alle();
        assert_eq!(alle.len(), 2);
        assert_eq!(alle[0].0, PeerId::from("cafe"));
    }
}
