//! Anruf-Engine
//!
//! Anwendungskontext eines Knotens: verbindet Zustandsautomat, Filter,
//! Rate Limiter, Peer-Verzeichnis und Media Manager mit dem
//! Signalisierungsversand.
//!
//! ## Eingehende Nachrichten
//!
//! ```text
//! JSON -> Sperrliste -> Rate Limiter (nur Einladungen) -> Filter -> Automat
//! ```
//!
//! Einladungen von gesperrten Peers, ueber dem Limit oder waehrend eines
//! laufenden Anrufs werden automatisch mit `CALL_REJECT` beantwortet.
//! Eine erneut zugestellte Einladung fuer den laufenden Anruf wird wie
//! beim ersten Mal beantwortet und nie abgelehnt.

use std::sync::{Arc, Weak};

use meshcall_core::{CallId, MeshcallError, PeerId, Result};
use meshcall_media::{
    MediaManager, MediaTransport, SecurityInfo, SessionEnde, SessionKonfig, SessionParameter,
};
use meshcall_protocol::{
    build_accept, build_announce, build_end, build_invite, build_reject, build_ringing,
    negotiate_codec, CallMessage, CodecEinstellungen, MessageType,
};
use meshcall_signaling::{
    CallInfo, CallMessageFilter, CallPhase, CallStateMachine, FilterGrund, FilterKonfig,
    RateLimitKonfig, RateLimiter,
};
use meshcall_voice::CallMetricsSnapshot;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::peers::PeerVerzeichnis;
use crate::versand::SignalingVersand;

const PHASEN_KANAL_KAPAZITAET: usize = 64;

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Phasenwechsel fuer Abonnenten
#[derive(Debug, Clone, PartialEq)]
pub struct PhasenWechsel {
    pub phase: CallPhase,
    pub call: Option<CallInfo>,
}

/// Warum eine Einladung automatisch abgelehnt wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AblehnGrund {
    Gesperrt,
    RateLimit,
    Besetzt,
}

/// Ergebnis der Verarbeitung einer eingehenden Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verarbeitung {
    Verarbeitet,
    Verworfen(FilterGrund),
    Abgelehnt(AblehnGrund),
    /// Nachricht eines gesperrten Peers, keine Antwort
    Ignoriert,
}

/// Einstellungen der Engine
#[derive(Debug, Clone)]
pub struct EngineKonfig {
    pub display_name: String,
    pub codec: CodecEinstellungen,
    pub session: SessionKonfig,
    pub rate_limit: RateLimitKonfig,
    pub filter: FilterKonfig,
}

impl EngineKonfig {
    pub fn aus_node_config(config: &NodeConfig) -> Self {
        Self {
            display_name: config.identitaet.display_name.clone(),
            codec: config.codec.clone(),
            session: config.session_konfig(),
            rate_limit: config.rate_limit_konfig(),
            filter: config.filter_konfig(),
        }
    }
}

// ---------------------------------------------------------------------------
// CallEngine
// ---------------------------------------------------------------------------

/// Anwendungskontext eines Knotens
pub struct CallEngine {
    local_id: PeerId,
    konfig: EngineKonfig,
    zustand: CallStateMachine,
    filter: CallMessageFilter,
    rate_limiter: Arc<RateLimiter>,
    peers: PeerVerzeichnis,
    media: Arc<MediaManager>,
    versand: Arc<dyn SignalingVersand>,
    phasen: broadcast::Sender<PhasenWechsel>,
}

impl CallEngine {
    pub fn neu(
        local_id: PeerId,
        konfig: EngineKonfig,
        peers: PeerVerzeichnis,
        transport: Arc<dyn MediaTransport>,
        versand: Arc<dyn SignalingVersand>,
    ) -> Arc<Self> {
        let (phasen, _) = broadcast::channel(PHASEN_KANAL_KAPAZITAET);
        let engine = Arc::new(Self {
            filter: CallMessageFilter::neu(local_id.clone(), konfig.filter),
            rate_limiter: RateLimiter::neu(konfig.rate_limit),
            local_id,
            konfig,
            zustand: CallStateMachine::neu(),
            peers,
            media: MediaManager::neu(transport),
            versand,
            phasen,
        });

        let sender = engine.phasen.clone();
        engine.zustand.on_state_changed(move |phase, call| {
            // Ohne Abonnenten schlaegt send fehl, das ist kein Fehler
            let _ = sender.send(PhasenWechsel {
                phase,
                call: call.cloned(),
            });
        });

        let weak: Weak<Self> = Arc::downgrade(&engine);
        engine
            .media
            .on_session_ended(Arc::new(move |call_id: &CallId, grund: SessionEnde| {
                if let Some(engine) = weak.upgrade() {
                    engine.media_beendet(call_id, grund);
                }
            }));

        info!(local_id = %engine.local_id.kurz(), "Anruf-Engine bereit");
        engine
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn phase(&self) -> CallPhase {
        self.zustand.phase()
    }

    pub fn current_call(&self) -> Option<CallInfo> {
        self.zustand.current_call()
    }

    pub fn peers(&self) -> &PeerVerzeichnis {
        &self.peers
    }

    pub fn media(&self) -> &Arc<MediaManager> {
        &self.media
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Abonniert alle folgenden Phasenwechsel
    pub fn phasen_abonnieren(&self) -> broadcast::Receiver<PhasenWechsel> {
        self.phasen.subscribe()
    }

    pub fn get_metrics(&self) -> Option<CallMetricsSnapshot> {
        self.media.get_metrics()
    }

    pub fn get_security_info(&self) -> Option<SecurityInfo> {
        self.media.get_security_info()
    }

    // -----------------------------------------------------------------------
    // Lokale Aktionen
    // -----------------------------------------------------------------------

    /// Ruft einen Peer an und gibt die neue Anruf-ID zurueck
    pub fn anrufen(&self, peer: &PeerId) -> Result<CallId> {
        if self.peers.ist_gesperrt(peer) {
            return Err(MeshcallError::FilterRejection(format!(
                "Peer {} ist gesperrt",
                peer.kurz()
            )));
        }
        let info = self
            .zustand
            .start_outgoing_call(self.local_id.clone(), peer.clone(), None)?;

        let invite = build_invite(
            &self.local_id,
            peer,
            Some(info.call_id.clone()),
            Some(&self.konfig.display_name),
            Some(self.konfig.codec.angebot()),
        );
        if let Err(e) = self.versand.senden(peer, &invite) {
            warn!(call_id = %info.call_id, "Einladung nicht zustellbar: {}", e);
            self.zustand.end_call();
            return Err(e);
        }
        Ok(info.call_id)
    }

    /// Nimmt den eingehenden Anruf an und startet die passive Media Session
    pub fn annehmen(&self) -> Result<CallInfo> {
        let info = self.zustand.accept_current_call()?;

        // Session vor dem Accept starten, damit der Link des Anrufers sie
        // vorfindet
        let codec = match info.codec() {
            Some(c) => self.konfig.codec.mit_aushandlung(c),
            None => self.konfig.codec.clone(),
        };
        if let Err(e) = self.media.start_session(
            SessionParameter {
                call_id: info.call_id.clone(),
                remote_id: info.remote_id.clone(),
                initiated_by_local: false,
                remote: info.media().cloned(),
                codec,
            },
            self.konfig.session.clone(),
        ) {
            warn!(call_id = %info.call_id, "Media Session nicht gestartet: {}", e);
            self.auflegen();
            return Err(e);
        }

        let endpunkt = self.media.local_endpoint();
        let accept = build_accept(
            &self.local_id,
            &info.remote_id,
            &info.call_id,
            Some(&endpunkt),
            info.codec(),
        );
        if let Err(e) = self.versand.senden(&info.remote_id, &accept) {
            warn!(call_id = %info.call_id, "Annahme nicht zustellbar: {}", e);
            self.auflegen();
            return Err(e);
        }
        Ok(info)
    }

    /// Lehnt den eingehenden Anruf ab
    pub fn ablehnen(&self) -> Result<CallInfo> {
        let info = self.zustand.reject_current_call()?;
        let reject = build_reject(&self.local_id, &info.remote_id, &info.call_id);
        self.antworten(&info.remote_id, reject);
        Ok(info)
    }

    /// Legt in jeder Phase auf. Gibt den beendeten Anruf zurueck.
    pub fn auflegen(&self) -> Option<CallInfo> {
        self.media.stop_session();
        let info = self.zustand.end_call()?;
        let ende = build_end(&self.local_id, &info.remote_id, &info.call_id);
        self.antworten(&info.remote_id, ende);
        Some(info)
    }

    /// Sendet einen Presence-Announce mit Anzeigename und Medien-Endpunkt
    pub fn ankuendigen(&self) -> Result<()> {
        let endpunkt = self.media.local_endpoint();
        let announce = build_announce(
            &self.local_id,
            Some(&self.konfig.display_name),
            Some(&endpunkt),
        );
        self.versand.broadcast(&announce)
    }

    /// Bestaetigt den SAS des laufenden Anrufs und markiert den Peer als
    /// verifiziert
    pub fn verify_sas(&self) -> bool {
        let Some(call) = self.zustand.current_call() else {
            return false;
        };
        if !self.media.verify_sas() {
            return false;
        }
        self.peers.als_verifiziert_markieren(&call.remote_id);
        true
    }

    /// Raeumt Filter und Rate Limiter auf
    pub fn bereinigen(&self) -> (usize, usize) {
        (self.filter.bereinigen(), self.rate_limiter.bereinigen())
    }

    // -----------------------------------------------------------------------
    // Eingehende Nachrichten
    // -----------------------------------------------------------------------

    /// Verarbeitet eine Signalisierungsnachricht aus dem Transport
    pub fn nachricht_empfangen(&self, daten: &[u8]) -> Result<Verarbeitung> {
        let msg = CallMessage::from_bytes(daten).inspect_err(|e| {
            debug!(bytes = daten.len(), "Signalisierung verworfen: {}", e);
        })?;
        if msg.from == self.local_id {
            return Ok(Verarbeitung::Verworfen(FilterGrund::NotForUs));
        }

        let aktuell = self.zustand.current_call_id();
        // Wiederholte Einladungen fuer den laufenden Anruf werden nie
        // abgelehnt und zaehlen nicht gegen das Limit
        let wiederholung = aktuell.as_ref() == Some(&msg.call_id);

        if self.peers.ist_gesperrt(&msg.from) {
            if msg.msg_type == MessageType::CallInvite && !wiederholung {
                info!(peer = %msg.from.kurz(), call_id = %msg.call_id, "Einladung von gesperrtem Peer");
                self.automatisch_ablehnen(&msg);
                return Ok(Verarbeitung::Abgelehnt(AblehnGrund::Gesperrt));
            }
            return Ok(Verarbeitung::Ignoriert);
        }

        if msg.msg_type == MessageType::CallInvite
            && msg.to == self.local_id
            && !wiederholung
            && !self.rate_limiter.is_allowed(&msg.from)
        {
            self.automatisch_ablehnen(&msg);
            return Ok(Verarbeitung::Abgelehnt(AblehnGrund::RateLimit));
        }

        let (zugelassen, grund) = self.filter.evaluate(&msg, aktuell.as_ref());
        if !zugelassen {
            debug!(typ = %msg.msg_type, call_id = %msg.call_id, grund = %grund, "Nachricht gefiltert");
            return Ok(Verarbeitung::Verworfen(grund));
        }

        Ok(match msg.msg_type {
            MessageType::PresenceAnnounce => {
                self.peers
                    .ankuendigung(&msg.from, msg.display_name.as_deref(), msg.media_endpoint());
                Verarbeitung::Verarbeitet
            }
            MessageType::CallInvite => self.einladung(&msg),
            MessageType::CallRinging => {
                self.zustand.mark_ringing();
                Verarbeitung::Verarbeitet
            }
            MessageType::CallAccept => {
                self.annahme(&msg);
                Verarbeitung::Verarbeitet
            }
            MessageType::CallReject => {
                if self.zustand.mark_remote_rejected(&msg.call_id) {
                    self.media.stop_session();
                }
                Verarbeitung::Verarbeitet
            }
            MessageType::CallEnd => {
                if self.zustand.remote_ended(&msg.call_id) {
                    self.media.stop_session();
                }
                Verarbeitung::Verarbeitet
            }
        })
    }

    fn einladung(&self, msg: &CallMessage) -> Verarbeitung {
        if let Some(call) = self
            .zustand
            .current_call()
            .filter(|c| c.call_id == msg.call_id)
        {
            return self.einladung_wiederholt(msg, &call);
        }

        let lokal = self.konfig.codec.angebot();
        let codec = negotiate_codec(lokal.codec, lokal.bitrate, msg.codec_type, msg.codec_bitrate);

        let mut info = CallInfo::neu(
            msg.call_id.clone(),
            self.local_id.clone(),
            msg.from.clone(),
            false,
        )
        .mit_display_name(
            msg.display_name
                .clone()
                .or_else(|| self.peers.display_name(&msg.from)),
        )
        .mit_codec(codec);
        if let Some(media) = self.peers.media_endpoint(&msg.from) {
            info = info.mit_media(media);
        }

        if !self.zustand.receive_incoming_invite(info) {
            self.automatisch_ablehnen(msg);
            return Verarbeitung::Abgelehnt(AblehnGrund::Besetzt);
        }
        let ringing = build_ringing(&self.local_id, &msg.from, &msg.call_id);
        self.antworten(&msg.from, ringing);
        Verarbeitung::Verarbeitet
    }

    /// Beantwortet eine erneut zugestellte Einladung wie beim ersten Mal.
    /// Mit der Anruf-ID des laufenden Anrufs wird nie abgelehnt.
    fn einladung_wiederholt(&self, msg: &CallMessage, call: &CallInfo) -> Verarbeitung {
        if call.initiated_by_local || call.remote_id != msg.from {
            debug!(call_id = %msg.call_id, peer = %msg.from.kurz(), "Einladung mit belegter Anruf-ID ignoriert");
            return Verarbeitung::Ignoriert;
        }
        debug!(call_id = %msg.call_id, phase = %self.zustand.phase(), "Einladung wiederholt");
        let antwort = match self.zustand.phase() {
            CallPhase::IncomingCall => build_ringing(&self.local_id, &msg.from, &msg.call_id),
            CallPhase::InCall => {
                let endpunkt = self.media.local_endpoint();
                build_accept(
                    &self.local_id,
                    &msg.from,
                    &msg.call_id,
                    Some(&endpunkt),
                    call.codec(),
                )
            }
            _ => return Verarbeitung::Ignoriert,
        };
        self.antworten(&msg.from, antwort);
        Verarbeitung::Verarbeitet
    }

    fn annahme(&self, msg: &CallMessage) {
        let Some(call) = self.zustand.current_call() else {
            return;
        };
        if !call.initiated_by_local {
            debug!(call_id = %msg.call_id, "Annahme fuer eingehenden Anruf ignoriert");
            return;
        }
        if call.call_id != msg.call_id {
            return;
        }
        if !matches!(self.zustand.phase(), CallPhase::OutgoingCall | CallPhase::Ringing) {
            debug!(call_id = %msg.call_id, "Wiederholte Annahme ignoriert");
            return;
        }

        // Codec vor dem Wechsel nach IN_CALL hinterlegen
        let lokal = self.konfig.codec.angebot();
        let codec = negotiate_codec(lokal.codec, lokal.bitrate, msg.codec_type, msg.codec_bitrate);
        self.zustand.set_negotiated_codec(&msg.call_id, codec);
        if !self.zustand.mark_remote_accepted(
            &msg.call_id,
            msg.call_dest.as_deref(),
            msg.call_identity_key.as_deref(),
        ) {
            return;
        }

        let remote = self.zustand.current_call().and_then(|c| c.media().cloned());
        if remote.is_none() {
            warn!(call_id = %msg.call_id, "Annahme ohne Medien-Endpunkt");
        }
        let ergebnis = self.media.start_session(
            SessionParameter {
                call_id: msg.call_id.clone(),
                remote_id: msg.from.clone(),
                initiated_by_local: true,
                remote,
                codec: self.konfig.codec.mit_aushandlung(codec),
            },
            self.konfig.session.clone(),
        );
        if let Err(e) = ergebnis {
            warn!(call_id = %msg.call_id, "Media Session nicht gestartet, lege auf: {}", e);
            self.auflegen();
        }
    }

    fn automatisch_ablehnen(&self, msg: &CallMessage) {
        let reject = build_reject(&self.local_id, &msg.from, &msg.call_id);
        self.antworten(&msg.from, reject);
    }

    /// Sendet eine Antwort; Zustellfehler werden nur protokolliert
    fn antworten(&self, ziel: &PeerId, nachricht: CallMessage) {
        if let Err(e) = self.versand.senden(ziel, &nachricht) {
            warn!(typ = %nachricht.msg_type, ziel = %ziel.kurz(), "Nachricht nicht zustellbar: {}", e);
        }
    }

    fn media_beendet(&self, call_id: &CallId, grund: SessionEnde) {
        if self.zustand.current_call_id().as_ref() != Some(call_id) {
            return;
        }
        info!(call_id = %call_id, ?grund, "Medienverbindung beendet, lege auf");
        self.auflegen();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_media::{IdentityKey, LoopbackNetz};
    use meshcall_protocol::{CodecType, MediaEndpoint, NegotiatedCodec};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Sammelt gesendete Nachrichten statt sie zuzustellen
    #[derive(Default)]
    struct Mitschnitt {
        gesendet: Mutex<Vec<(PeerId, CallMessage)>>,
    }

    impl Mitschnitt {
        fn typen(&self) -> Vec<MessageType> {
            self.gesendet.lock().iter().map(|(_, m)| m.msg_type).collect()
        }
    }

    impl SignalingVersand for Mitschnitt {
        fn senden(&self, ziel: &PeerId, nachricht: &CallMessage) -> Result<()> {
            self.gesendet.lock().push((ziel.clone(), nachricht.clone()));
            Ok(())
        }

        fn broadcast(&self, nachricht: &CallMessage) -> Result<()> {
            self.gesendet
                .lock()
                .push((PeerId::broadcast(), nachricht.clone()));
            Ok(())
        }
    }

    fn konfig() -> EngineKonfig {
        let mut config = NodeConfig::default();
        config.audio.aktiviert = false;
        config.identitaet.display_name = "Bob".into();
        EngineKonfig::aus_node_config(&config)
    }

    fn engine(peers: PeerVerzeichnis) -> (Arc<CallEngine>, Arc<Mitschnitt>) {
        engine_mit(konfig(), peers)
    }

    fn engine_mit(
        konfig: EngineKonfig,
        peers: PeerVerzeichnis,
    ) -> (Arc<CallEngine>, Arc<Mitschnitt>) {
        let netz = LoopbackNetz::neu();
        let mitschnitt = Arc::new(Mitschnitt::default());
        let engine = CallEngine::neu(
            PeerId::from("b0b0"),
            konfig,
            peers,
            netz.transport(IdentityKey::zufaellig()),
            mitschnitt.clone(),
        );
        (engine, mitschnitt)
    }

    fn alice() -> PeerId {
        PeerId::from("a1a1")
    }

    fn einladung(call_id: &str) -> Vec<u8> {
        build_invite(
            &alice(),
            &PeerId::from("b0b0"),
            Some(CallId::from(call_id)),
            Some("Alice"),
            Some(NegotiatedCodec::neu(CodecType::Opus, 16_000)),
        )
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn einladung_klingelt_und_handelt_codec_aus() {
        let (engine, mitschnitt) = engine(PeerVerzeichnis::neu());
        let mut phasen = engine.phasen_abonnieren();

        let ergebnis = engine.nachricht_empfangen(&einladung("c1")).unwrap();
        assert_eq!(ergebnis, Verarbeitung::Verarbeitet);
        assert_eq!(engine.phase(), CallPhase::IncomingCall);
        assert_eq!(mitschnitt.typen(), vec![MessageType::CallRinging]);

        let call = engine.current_call().unwrap();
        assert_eq!(call.display_name.as_deref(), Some("Alice"));
        // Niedrigere Bitrate gewinnt
        assert_eq!(call.codec(), Some(NegotiatedCodec::neu(CodecType::Opus, 16_000)));

        let wechsel = phasen.try_recv().unwrap();
        assert_eq!(wechsel.phase, CallPhase::IncomingCall);
    }

    #[test]
    fn zweite_einladung_wird_abgelehnt() {
        let (engine, mitschnitt) = engine(PeerVerzeichnis::neu());
        engine.nachricht_empfangen(&einladung("c1")).unwrap();

        let zweite = build_invite(
            &PeerId::from("c3c3"),
            &PeerId::from("b0b0"),
            Some(CallId::from("c2")),
            None,
            None,
        );
        let ergebnis = engine
            .nachricht_empfangen(&zweite.to_bytes().unwrap())
            .unwrap();
        assert_eq!(ergebnis, Verarbeitung::Abgelehnt(AblehnGrund::Besetzt));
        assert_eq!(engine.current_call().unwrap().call_id, CallId::from("c1"));

        let gesendet = mitschnitt.gesendet.lock();
        let (ziel, letzte) = gesendet.last().unwrap();
        assert_eq!(ziel, &PeerId::from("c3c3"));
        assert_eq!(letzte.msg_type, MessageType::CallReject);
        assert_eq!(letzte.call_id, CallId::from("c2"));
    }

    fn kurzes_dedup_fenster() -> EngineKonfig {
        let mut k = konfig();
        k.filter.dedup_fenster = Duration::from_millis(200);
        k
    }

    #[test]
    fn wiederholte_einladung_klingelt_erneut() {
        let (engine, mitschnitt) = engine_mit(kurzes_dedup_fenster(), PeerVerzeichnis::neu());
        let invite = einladung("c1");
        engine.nachricht_empfangen(&invite).unwrap();

        // Innerhalb des Fensters greift der Filter
        assert_eq!(
            engine.nachricht_empfangen(&invite).unwrap(),
            Verarbeitung::Verworfen(FilterGrund::Duplicate)
        );

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(engine.nachricht_empfangen(&invite).unwrap(), Verarbeitung::Verarbeitet);
        assert_eq!(engine.phase(), CallPhase::IncomingCall);
        assert_eq!(
            mitschnitt.typen(),
            vec![MessageType::CallRinging, MessageType::CallRinging]
        );
        assert_eq!(engine.rate_limiter().get_peer_stats(&alice()).calls_last_minute, 1);
    }

    #[test]
    fn wiederholte_einladung_nach_annahme() {
        let (engine, mitschnitt) = engine_mit(kurzes_dedup_fenster(), PeerVerzeichnis::neu());
        let invite = einladung("c1");
        engine.nachricht_empfangen(&invite).unwrap();
        engine.annehmen().unwrap();
        assert_eq!(engine.phase(), CallPhase::InCall);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(engine.nachricht_empfangen(&invite).unwrap(), Verarbeitung::Verarbeitet);
        assert_eq!(engine.phase(), CallPhase::InCall);

        let gesendet = mitschnitt.gesendet.lock();
        assert!(gesendet.iter().all(|(_, m)| m.msg_type != MessageType::CallReject));
        let (ziel, letzte) = gesendet.last().unwrap();
        assert_eq!(ziel, &alice());
        assert_eq!(letzte.msg_type, MessageType::CallAccept);
        assert_eq!(letzte.call_id, CallId::from("c1"));
        assert!(letzte.media_endpoint().is_some());
        drop(gesendet);
        engine.auflegen();
    }

    #[test]
    fn in_call_meldung_traegt_codec() {
        let (engine, _) = engine(PeerVerzeichnis::neu());
        let call_id = engine.anrufen(&alice()).unwrap();
        let mut phasen = engine.phasen_abonnieren();

        let ep = MediaEndpoint::neu("00aa", "AAAA");
        let accept = build_accept(
            &alice(),
            &PeerId::from("b0b0"),
            &call_id,
            Some(&ep),
            Some(NegotiatedCodec::neu(CodecType::Opus, 16_000)),
        );
        engine
            .nachricht_empfangen(&accept.to_bytes().unwrap())
            .unwrap();

        let in_call = std::iter::from_fn(|| phasen.try_recv().ok())
            .find(|w| w.phase == CallPhase::InCall)
            .unwrap();
        let call = in_call.call.unwrap();
        assert_eq!(call.codec(), Some(NegotiatedCodec::neu(CodecType::Opus, 16_000)));
        assert_eq!(call.media(), Some(&ep));
        engine.auflegen();
    }

    #[test]
    fn gesperrter_peer_wird_abgelehnt() {
        let peers = PeerVerzeichnis::neu();
        peers.sperren(&alice());
        let (engine, mitschnitt) = engine(peers);

        let ergebnis = engine.nachricht_empfangen(&einladung("c1")).unwrap();
        assert_eq!(ergebnis, Verarbeitung::Abgelehnt(AblehnGrund::Gesperrt));
        assert_eq!(engine.phase(), CallPhase::Idle);
        assert_eq!(mitschnitt.typen(), vec![MessageType::CallReject]);
        assert!(engine.anrufen(&alice()).is_err());
    }

    #[test]
    fn rate_limit_lehnt_ab() {
        let (engine, _) = engine(PeerVerzeichnis::neu());
        for i in 0..5 {
            engine.nachricht_empfangen(&einladung(&format!("r{i}"))).unwrap();
            engine.ablehnen().unwrap();
        }
        let ergebnis = engine.nachricht_empfangen(&einladung("r5")).unwrap();
        assert_eq!(ergebnis, Verarbeitung::Abgelehnt(AblehnGrund::RateLimit));
        assert_eq!(engine.rate_limiter().get_peer_stats(&alice()).calls_last_minute, 5);
    }

    #[test]
    fn fremde_und_kaputte_nachrichten() {
        let (engine, _) = engine(PeerVerzeichnis::neu());
        assert!(engine.nachricht_empfangen(b"kein json").is_err());

        let ende = build_end(&alice(), &PeerId::from("b0b0"), &CallId::from("x"));
        let ergebnis = engine.nachricht_empfangen(&ende.to_bytes().unwrap()).unwrap();
        assert_eq!(ergebnis, Verarbeitung::Verworfen(FilterGrund::UnknownCallIdle));

        let fremd = build_end(&alice(), &PeerId::from("ffff"), &CallId::from("x"));
        let ergebnis = engine.nachricht_empfangen(&fremd.to_bytes().unwrap()).unwrap();
        assert_eq!(ergebnis, Verarbeitung::Verworfen(FilterGrund::NotForUs));
    }

    #[test]
    fn announce_aktualisiert_verzeichnis() {
        let (engine, _) = engine(PeerVerzeichnis::neu());
        let ep = MediaEndpoint::neu("00aa", "AAAA");
        let announce = build_announce(&alice(), Some("Alice"), Some(&ep));
        engine
            .nachricht_empfangen(&announce.to_bytes().unwrap())
            .unwrap();
        assert_eq!(engine.peers().display_name(&alice()).as_deref(), Some("Alice"));
        assert_eq!(engine.peers().media_endpoint(&alice()), Some(ep));
    }

    #[test]
    fn ablehnen_ohne_anruf() {
        let (engine, _) = engine(PeerVerzeichnis::neu());
        assert!(matches!(engine.ablehnen(), Err(MeshcallError::NoIncomingCall)));
        assert!(matches!(engine.annehmen(), Err(MeshcallError::NoIncomingCall)));
        assert!(engine.auflegen().is_none());
        assert!(!engine.verify_sas());
    }

    #[test]
    fn annahme_ohne_endpunkt_legt_auf() {
        let (engine, mitschnitt) = engine(PeerVerzeichnis::neu());
        let call_id = engine.anrufen(&alice()).unwrap();
        assert_eq!(engine.phase(), CallPhase::OutgoingCall);

        let accept = build_accept(&alice(), &PeerId::from("b0b0"), &call_id, None, None);
        engine
            .nachricht_empfangen(&accept.to_bytes().unwrap())
            .unwrap();
        assert_eq!(engine.phase(), CallPhase::Idle);
        assert_eq!(
            mitschnitt.typen(),
            vec![MessageType::CallInvite, MessageType::CallEnd]
        );
    }
}
