//! Media Manager
//!
//! Haelt hoechstens eine aktive [`MediaSession`] und leitet eingehende
//! Links des Transports an sie weiter.

use std::sync::{Arc, Weak};

use meshcall_core::{CallId, Result};
use meshcall_protocol::MediaEndpoint;
use meshcall_voice::CallMetricsSnapshot;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::link::{MediaLink, MediaTransport};
use crate::security::SecurityInfo;
use crate::session::{MediaSession, SessionEnde, SessionEndeCallback, SessionKonfig, SessionParameter};

/// Wird aufgerufen, wenn die aktive Session von aussen endet
pub type EndeBeobachter = Arc<dyn Fn(&CallId, SessionEnde) + Send + Sync>;

/// Verwaltet die Media Session des Knotens
pub struct MediaManager {
    transport: Arc<dyn MediaTransport>,
    session: Mutex<Option<Arc<MediaSession>>>,
    beobachter: Mutex<Option<EndeBeobachter>>,
    selbst: Weak<MediaManager>,
}

impl MediaManager {
    /// Erstellt den Manager und registriert ihn als Empfaenger fuer
    /// eingehende Links
    pub fn neu(transport: Arc<dyn MediaTransport>) -> Arc<Self> {
        let manager = Arc::new_cyclic(|selbst: &Weak<Self>| Self {
            transport: transport.clone(),
            session: Mutex::new(None),
            beobachter: Mutex::new(None),
            selbst: selbst.clone(),
        });

        let weak = Arc::downgrade(&manager);
        transport.set_inbound_link_handler(Box::new(move |link| match weak.upgrade() {
            Some(manager) => manager.handle_incoming_link(link),
            None => link.teardown(),
        }));
        manager
    }

    /// Registriert den Beobachter fuer Session-Enden (Timeout, Link zu)
    pub fn on_session_ended(&self, beobachter: EndeBeobachter) {
        *self.beobachter.lock() = Some(beobachter);
    }

    pub fn local_endpoint(&self) -> MediaEndpoint {
        self.transport.local_endpoint()
    }

    /// Startet eine neue Session. Eine vorhandene wird vorher beendet.
    pub fn start_session(
        &self,
        params: SessionParameter,
        konfig: SessionKonfig,
    ) -> Result<Arc<MediaSession>> {
        let call_id = params.call_id.clone();
        let session = Arc::new(MediaSession::neu(
            params,
            konfig,
            self.transport.clone(),
            Some(self.ende_callback()),
        ));

        let alt = self.session.lock().replace(session.clone());
        if let Some(alt) = alt {
            warn!(
                alt = %alt.call_id(),
                neu = %call_id,
                "Vorherige Media Session wird ersetzt"
            );
            alt.stop();
        }

        if let Err(e) = session.start() {
            warn!(call_id = %call_id, "Media Session konnte nicht starten: {}", e);
            self.entfernen(&call_id);
            session.stop();
            return Err(e);
        }
        info!(
            call_id = %call_id,
            anrufer = session.initiated_by_local(),
            "Media Session gestartet"
        );
        Ok(session)
    }

    /// Beendet die aktive Session, falls vorhanden
    pub fn stop_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.stop();
            debug!(call_id = %session.call_id(), "Media Session beendet");
        }
    }

    pub fn aktive_session(&self) -> Option<Arc<MediaSession>> {
        self.session.lock().clone()
    }

    pub fn get_metrics(&self) -> Option<CallMetricsSnapshot> {
        self.aktive_session().map(|s| s.get_metrics())
    }

    pub fn get_security_info(&self) -> Option<SecurityInfo> {
        self.aktive_session().map(|s| s.get_security_info())
    }

    /// Bestaetigt den SAS der aktiven Session. `false` ohne Session.
    pub fn verify_sas(&self) -> bool {
        match self.aktive_session() {
            Some(session) => {
                session.verify_sas();
                true
            }
            None => false,
        }
    }

    /// Eingehender Link vom Transport
    pub fn handle_incoming_link(&self, link: Arc<dyn MediaLink>) {
        let Some(session) = self.aktive_session() else {
            info!(link = %link.link_id(), "Eingehender Link ohne Session: abgebaut");
            link.teardown();
            return;
        };
        if !session.on_incoming_link(link.clone()) {
            debug!(link = %link.link_id(), "Link von der Session abgelehnt");
            link.teardown();
        }
    }

    /// Entfernt die Session nur, wenn sie noch zur Anruf-ID gehoert
    fn entfernen(&self, call_id: &CallId) -> Option<Arc<MediaSession>> {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.call_id() == call_id) {
            session.take()
        } else {
            None
        }
    }

    fn ende_callback(&self) -> SessionEndeCallback {
        let weak = self.selbst.clone();
        Arc::new(move |call_id: &CallId, grund: SessionEnde| {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            let entfernt = manager.entfernen(call_id);
            debug!(call_id = %call_id, ?grund, aktiv = entfernt.is_some(), "Media Session beendet");
            let beobachter = manager.beobachter.lock().clone();
            if let Some(beobachter) = beobachter {
                beobachter(call_id, grund);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{IdentityKey, MediaDestination};
    use crate::loopback::{LoopbackLink, LoopbackNetz};
    use crate::session::HandshakeZustand;
    use meshcall_core::{MeshcallError, PeerId};
    use meshcall_protocol::CodecEinstellungen;
    use std::thread;
    use std::time::{Duration, Instant};

    fn warte_bis(bedingung: impl Fn() -> bool) -> bool {
        let ende = Instant::now() + Duration::from_secs(3);
        while Instant::now() < ende {
            if bedingung() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        bedingung()
    }

    fn konfig() -> SessionKonfig {
        SessionKonfig {
            audio_aktiv: false,
            ..Default::default()
        }
    }

    fn params(id: &str, initiator: bool, remote: Option<MediaEndpoint>) -> SessionParameter {
        SessionParameter {
            call_id: CallId::from(id),
            remote_id: PeerId::from("peer"),
            initiated_by_local: initiator,
            remote,
            codec: CodecEinstellungen::default(),
        }
    }

    #[test]
    fn zwei_manager_verbinden_sich() {
        let netz = LoopbackNetz::neu();
        let a = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));
        let b = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));

        b.start_session(params("c1", false, None), konfig()).unwrap();
        a.start_session(params("c1", true, Some(b.local_endpoint())), konfig())
            .unwrap();

        assert!(warte_bis(|| {
            a.aktive_session().is_some_and(|s| s.ist_aktiv())
                && b.aktive_session().is_some_and(|s| s.ist_aktiv())
        }));
        let sas_a = a.get_security_info().unwrap().sas_code;
        assert!(sas_a.is_some());
        assert_eq!(sas_a, b.get_security_info().unwrap().sas_code);
        assert!(a.verify_sas());
        assert!(a.get_security_info().unwrap().sas_verified);
        assert!(!b.get_security_info().unwrap().sas_verified);
    }

    #[test]
    fn link_ende_meldet_beobachter() {
        let netz = LoopbackNetz::neu();
        let a = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));
        let b = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));

        let gemeldet = Arc::new(Mutex::new(Vec::new()));
        let g = gemeldet.clone();
        b.on_session_ended(Arc::new(move |id: &CallId, grund| {
            g.lock().push((id.clone(), grund));
        }));

        b.start_session(params("c2", false, None), konfig()).unwrap();
        a.start_session(params("c2", true, Some(b.local_endpoint())), konfig())
            .unwrap();
        assert!(warte_bis(|| b.aktive_session().is_some_and(|s| s.ist_aktiv())));

        a.stop_session();
        assert!(a.aktive_session().is_none());
        assert!(warte_bis(|| !gemeldet.lock().is_empty()));
        assert_eq!(
            gemeldet.lock().as_slice(),
            &[(CallId::from("c2"), SessionEnde::LinkGeschlossen)]
        );
        assert!(b.aktive_session().is_none());
    }

    #[test]
    fn ohne_session_wird_link_abgebaut() {
        let netz = LoopbackNetz::neu();
        let manager = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));
        let (link, _gegenstelle) = LoopbackLink::paar(b"s".to_vec(), true);
        manager.handle_incoming_link(link.clone());
        assert!(!link.is_active());
        assert!(manager.get_metrics().is_none());
        assert!(!manager.verify_sas());
    }

    #[test]
    fn neue_session_ersetzt_alte() {
        let netz = LoopbackNetz::neu();
        let manager = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));
        let erste = manager
            .start_session(params("alt", false, None), konfig())
            .unwrap();
        let zweite = manager
            .start_session(params("neu", false, None), konfig())
            .unwrap();
        assert_eq!(erste.zustand(), HandshakeZustand::Closed);
        assert_eq!(zweite.zustand(), HandshakeZustand::Handshaking);
        assert_eq!(manager.aktive_session().unwrap().call_id(), &CallId::from("neu"));
    }

    #[test]
    fn startfehler_hinterlaesst_keine_session() {
        let netz = LoopbackNetz::neu();
        let manager = MediaManager::neu(netz.transport(IdentityKey::zufaellig()));
        let fehler = manager
            .start_session(params("c3", true, None), konfig())
            .unwrap_err();
        assert!(matches!(fehler, MeshcallError::Link(_)));
        assert!(manager.aktive_session().is_none());

        let ziel = MediaDestination::aus_identitaet(&IdentityKey::zufaellig());
        let kaputt = MediaEndpoint::neu(ziel.to_hex(), "%%%");
        assert!(manager
            .start_session(params("c4", true, Some(kaputt)), konfig())
            .is_err());
        assert!(manager.aktive_session().is_none());
    }
}
