//! Anruf-Zustandsautomat
//!
//! Verfolgt genau einen Anruf pro lokaler Identitaet.
//!
//! ## Phasen
//!
//! ```text
//!            start_outgoing_call            mark_ringing
//!   IDLE ----------------------> OUTGOING_CALL ----------> RINGING
//!    |                                 |                     |
//!    | receive_incoming_invite         +------+--------------+
//!    v                                        | mark_remote_accepted
//!  INCOMING_CALL --accept_current_call--> IN_CALL <-+
//!    |                                        |
//!    +--reject / remote_rejected / ended / end_call--> ENDED --> IDLE
//! ```
//!
//! `ENDED` ist transient: Beobachter erhalten `ENDED` mit dem beendeten
//! Anruf, unmittelbar danach `IDLE` ohne Anruf.
//!
//! Der Automat ist intern synchronisiert und darf aus beliebigen Threads
//! aufgerufen werden. Der Beobachter wird erst nach Freigabe der Sperre
//! benachrichtigt und darf daher selbst wieder Operationen aufrufen.

use std::sync::Arc;

use meshcall_core::{CallId, MeshcallError, PeerId, Result};
use meshcall_protocol::{MediaEndpoint, NegotiatedCodec};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Phase des Zustandsautomaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallPhase {
    Idle,
    OutgoingCall,
    Ringing,
    IncomingCall,
    InCall,
    Ended,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::OutgoingCall => "OUTGOING_CALL",
            Self::Ringing => "RINGING",
            Self::IncomingCall => "INCOMING_CALL",
            Self::InCall => "IN_CALL",
            Self::Ended => "ENDED",
        }
    }

    /// Gibt true zurueck wenn ein neuer Anruf beginnen darf
    pub fn ist_frei(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended)
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verhandlungsstand eines Anrufs
///
/// Jede Stufe traegt nur die Felder, die in ihr gueltig sind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallStage {
    /// Noch kein Codec vereinbart; ein Medien-Endpunkt kann bereits bekannt sein
    Pending { media: Option<MediaEndpoint> },
    /// Codec vereinbart, Medien-Endpunkt der Gegenseite noch unbekannt
    Negotiated { codec: NegotiatedCodec },
    /// Codec vereinbart und Medien-Endpunkt bekannt
    Active {
        codec: NegotiatedCodec,
        media: MediaEndpoint,
    },
}

impl CallStage {
    pub fn codec(&self) -> Option<NegotiatedCodec> {
        match self {
            Self::Pending { .. } => None,
            Self::Negotiated { codec } | Self::Active { codec, .. } => Some(*codec),
        }
    }

    pub fn media(&self) -> Option<&MediaEndpoint> {
        match self {
            Self::Pending { media } => media.as_ref(),
            Self::Negotiated { .. } => None,
            Self::Active { media, .. } => Some(media),
        }
    }

    fn mit_codec(self, codec: NegotiatedCodec) -> Self {
        match self {
            Self::Pending { media: Some(media) } | Self::Active { media, .. } => {
                Self::Active { codec, media }
            }
            Self::Pending { media: None } | Self::Negotiated { .. } => Self::Negotiated { codec },
        }
    }

    fn mit_media(self, media: MediaEndpoint) -> Self {
        match self {
            Self::Pending { .. } => Self::Pending { media: Some(media) },
            Self::Negotiated { codec } | Self::Active { codec, .. } => {
                Self::Active { codec, media }
            }
        }
    }
}

/// Daten des aktuellen Anrufs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub local_id: PeerId,
    pub remote_id: PeerId,
    pub display_name: Option<String>,
    pub initiated_by_local: bool,
    pub stage: CallStage,
}

impl CallInfo {
    /// Neuer Anruf ohne Verhandlungsdaten
    pub fn neu(
        call_id: CallId,
        local_id: PeerId,
        remote_id: PeerId,
        initiated_by_local: bool,
    ) -> Self {
        Self {
            call_id,
            local_id,
            remote_id,
            display_name: None,
            initiated_by_local,
            stage: CallStage::Pending { media: None },
        }
    }

    pub fn mit_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    /// Uebernimmt einen vereinbarten Codec
    pub fn mit_codec(mut self, codec: NegotiatedCodec) -> Self {
        self.stage = self.stage.mit_codec(codec);
        self
    }

    /// Uebernimmt den Medien-Endpunkt der Gegenseite
    pub fn mit_media(mut self, media: MediaEndpoint) -> Self {
        self.stage = self.stage.mit_media(media);
        self
    }

    pub fn codec(&self) -> Option<NegotiatedCodec> {
        self.stage.codec()
    }

    pub fn media(&self) -> Option<&MediaEndpoint> {
        self.stage.media()
    }
}

/// Beobachter fuer Phasenwechsel
pub type PhasenBeobachter = dyn Fn(CallPhase, Option<&CallInfo>) + Send + Sync;

// ---------------------------------------------------------------------------
// CallStateMachine
// ---------------------------------------------------------------------------

struct Zustand {
    phase: CallPhase,
    call: Option<CallInfo>,
}

type Meldungen = Vec<(CallPhase, Option<CallInfo>)>;

/// Zustandsautomat fuer einen einzelnen Anruf
pub struct CallStateMachine {
    zustand: Mutex<Zustand>,
    beobachter: RwLock<Option<Arc<PhasenBeobachter>>>,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::neu()
    }
}

impl CallStateMachine {
    pub fn neu() -> Self {
        Self {
            zustand: Mutex::new(Zustand {
                phase: CallPhase::Idle,
                call: None,
            }),
            beobachter: RwLock::new(None),
        }
    }

    /// Registriert den Beobachter fuer Phasenwechsel (ersetzt einen vorherigen)
    pub fn on_state_changed(
        &self,
        beobachter: impl Fn(CallPhase, Option<&CallInfo>) + Send + Sync + 'static,
    ) {
        *self.beobachter.write() = Some(Arc::new(beobachter));
    }

    pub fn phase(&self) -> CallPhase {
        self.zustand.lock().phase
    }

    /// Kopie des aktuellen Anrufs
    pub fn current_call(&self) -> Option<CallInfo> {
        self.zustand.lock().call.clone()
    }

    pub fn current_call_id(&self) -> Option<CallId> {
        self.zustand.lock().call.as_ref().map(|c| c.call_id.clone())
    }

    // -----------------------------------------------------------------------
    // Operationen
    // -----------------------------------------------------------------------

    /// Startet einen ausgehenden Anruf. Ohne `call_id` wird eine neue erzeugt.
    pub fn start_outgoing_call(
        &self,
        local: PeerId,
        remote: PeerId,
        call_id: Option<CallId>,
    ) -> Result<CallInfo> {
        let (info, meldungen) = {
            let mut z = self.zustand.lock();
            if !z.phase.ist_frei() {
                tracing::warn!(phase = %z.phase, "Ausgehender Anruf abgelehnt: Leitung besetzt");
                return Err(MeshcallError::CallBusy);
            }
            let info = CallInfo::neu(call_id.unwrap_or_else(CallId::neu), local, remote, true);
            tracing::info!(
                call_id = %info.call_id,
                remote = %info.remote_id.kurz(),
                "Ausgehender Anruf gestartet"
            );
            let meldungen = Self::setzen(&mut z, CallPhase::OutgoingCall, Some(info.clone()));
            (info, meldungen)
        };
        self.melden(meldungen);
        Ok(info)
    }

    /// Gegenseite klingelt
    pub fn mark_ringing(&self) {
        let meldungen = {
            let mut z = self.zustand.lock();
            if z.phase != CallPhase::OutgoingCall {
                return;
            }
            let call = z.call.clone();
            Self::setzen(&mut z, CallPhase::Ringing, call)
        };
        self.melden(meldungen);
    }

    /// Nimmt eine Einladung entgegen.
    ///
    /// Gibt `false` zurueck und aendert nichts, wenn bereits ein Anruf
    /// laeuft; der Aufrufer lehnt dann automatisch ab.
    pub fn receive_incoming_invite(&self, info: CallInfo) -> bool {
        let meldungen = {
            let mut z = self.zustand.lock();
            if !z.phase.ist_frei() {
                tracing::info!(
                    call_id = %info.call_id,
                    phase = %z.phase,
                    "Einladung waehrend laufendem Anruf"
                );
                return false;
            }
            tracing::info!(
                call_id = %info.call_id,
                remote = %info.remote_id.kurz(),
                "Eingehender Anruf"
            );
            Self::setzen(&mut z, CallPhase::IncomingCall, Some(info))
        };
        self.melden(meldungen);
        true
    }

    /// Nimmt den eingehenden Anruf an
    pub fn accept_current_call(&self) -> Result<CallInfo> {
        let (info, meldungen) = {
            let mut z = self.zustand.lock();
            let info = match (&z.phase, &z.call) {
                (CallPhase::IncomingCall, Some(call)) => call.clone(),
                _ => return Err(MeshcallError::NoIncomingCall),
            };
            tracing::info!(call_id = %info.call_id, "Anruf angenommen");
            let meldungen = Self::setzen(&mut z, CallPhase::InCall, Some(info.clone()));
            (info, meldungen)
        };
        self.melden(meldungen);
        Ok(info)
    }

    /// Lehnt den eingehenden Anruf ab
    pub fn reject_current_call(&self) -> Result<CallInfo> {
        let (info, meldungen) = {
            let mut z = self.zustand.lock();
            let info = match (&z.phase, &z.call) {
                (CallPhase::IncomingCall, Some(call)) => call.clone(),
                _ => return Err(MeshcallError::NoIncomingCall),
            };
            tracing::info!(call_id = %info.call_id, "Anruf abgelehnt");
            (info, Self::beenden(&mut z))
        };
        self.melden(meldungen);
        Ok(info)
    }

    /// Gegenseite hat angenommen. Nicht-leere Endpunkt-Angaben werden
    /// uebernommen. Gibt `false` zurueck wenn die Anruf-ID nicht passt.
    pub fn mark_remote_accepted(
        &self,
        call_id: &CallId,
        remote_dest: Option<&str>,
        remote_key: Option<&str>,
    ) -> bool {
        let meldungen = {
            let mut z = self.zustand.lock();
            let Some(mut call) = z.call.clone().filter(|c| &c.call_id == call_id) else {
                tracing::debug!(call_id = %call_id, "Annahme fuer fremden Anruf ignoriert");
                return false;
            };

            let vorhanden = call.media().cloned();
            let ziel = remote_dest
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .or_else(|| vorhanden.as_ref().map(|m| m.ziel.clone()));
            let key = remote_key
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .or_else(|| vorhanden.as_ref().map(|m| m.identity_key.clone()));
            if let (Some(ziel), Some(key)) = (ziel, key) {
                call = call.mit_media(MediaEndpoint::neu(ziel, key));
            }

            tracing::info!(call_id = %call_id, "Gegenseite hat angenommen");
            Self::setzen(&mut z, CallPhase::InCall, Some(call))
        };
        self.melden(meldungen);
        true
    }

    /// Hinterlegt den ausgehandelten Codec am passenden Anruf
    pub fn set_negotiated_codec(&self, call_id: &CallId, codec: NegotiatedCodec) -> bool {
        let mut z = self.zustand.lock();
        match z.call.take() {
            Some(call) if &call.call_id == call_id => {
                tracing::debug!(
                    call_id = %call_id,
                    codec = %codec.codec,
                    bitrate = codec.bitrate,
                    "Codec ausgehandelt"
                );
                z.call = Some(call.mit_codec(codec));
                true
            }
            anders => {
                z.call = anders;
                false
            }
        }
    }

    /// Gegenseite hat abgelehnt
    pub fn mark_remote_rejected(&self, call_id: &CallId) -> bool {
        self.beenden_wenn_passend(call_id, "Gegenseite hat abgelehnt")
    }

    /// Gegenseite hat aufgelegt
    pub fn remote_ended(&self, call_id: &CallId) -> bool {
        self.beenden_wenn_passend(call_id, "Gegenseite hat aufgelegt")
    }

    /// Lokales Auflegen in jeder Phase. Gibt den beendeten Anruf zurueck.
    pub fn end_call(&self) -> Option<CallInfo> {
        let (info, meldungen) = {
            let mut z = self.zustand.lock();
            if z.phase == CallPhase::Idle {
                return None;
            }
            let info = z.call.clone();
            if let Some(call) = &info {
                tracing::info!(call_id = %call.call_id, "Anruf lokal beendet");
            }
            (info, Self::beenden(&mut z))
        };
        self.melden(meldungen);
        info
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn beenden_wenn_passend(&self, call_id: &CallId, grund: &str) -> bool {
        let meldungen = {
            let mut z = self.zustand.lock();
            if z.call.as_ref().map(|c| &c.call_id) != Some(call_id) {
                tracing::debug!(call_id = %call_id, grund, "Nachricht fuer fremden Anruf ignoriert");
                return false;
            }
            tracing::info!(call_id = %call_id, grund, "Anruf beendet");
            Self::beenden(&mut z)
        };
        self.melden(meldungen);
        true
    }

    fn setzen(z: &mut Zustand, phase: CallPhase, call: Option<CallInfo>) -> Meldungen {
        z.phase = phase;
        z.call = call.clone();
        vec![(phase, call)]
    }

    /// ENDED melden, dann sofort zurueck nach IDLE
    fn beenden(z: &mut Zustand) -> Meldungen {
        let call = z.call.take();
        z.phase = CallPhase::Idle;
        vec![(CallPhase::Ended, call), (CallPhase::Idle, None)]
    }

    fn melden(&self, meldungen: Meldungen) {
        let Some(beobachter) = self.beobachter.read().clone() else {
            return;
        };
        for (phase, call) in meldungen {
            beobachter(phase, call.as_ref());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_protocol::CodecType;

    fn alice() -> PeerId {
        PeerId::from("a1a1")
    }

    fn bob() -> PeerId {
        PeerId::from("b0b0")
    }

    fn mit_protokoll(sm: &CallStateMachine) -> Arc<Mutex<Vec<(CallPhase, bool)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        sm.on_state_changed(move |phase, call| l.lock().push((phase, call.is_some())));
        log
    }

    #[test]
    fn ausgehender_anruf_bis_auflegen() {
        let sm = CallStateMachine::neu();
        let log = mit_protokoll(&sm);

        let info = sm.start_outgoing_call(alice(), bob(), None).unwrap();
        assert!(info.initiated_by_local);
        assert_eq!(sm.phase(), CallPhase::OutgoingCall);

        sm.mark_ringing();
        sm.mark_ringing();
        assert_eq!(sm.phase(), CallPhase::Ringing);

        assert!(sm.mark_remote_accepted(&info.call_id, Some("00ff"), Some("a2V5")));
        assert_eq!(sm.phase(), CallPhase::InCall);
        assert_eq!(
            sm.current_call().unwrap().media(),
            Some(&MediaEndpoint::neu("00ff", "a2V5"))
        );

        let beendet = sm.end_call().unwrap();
        assert_eq!(beendet.call_id, info.call_id);
        assert_eq!(sm.phase(), CallPhase::Idle);
        assert!(sm.current_call().is_none());

        assert_eq!(
            *log.lock(),
            vec![
                (CallPhase::OutgoingCall, true),
                (CallPhase::Ringing, true),
                (CallPhase::InCall, true),
                (CallPhase::Ended, true),
                (CallPhase::Idle, false),
            ]
        );
    }

    #[test]
    fn zweiter_ausgehender_anruf_ist_besetzt() {
        let sm = CallStateMachine::neu();
        sm.start_outgoing_call(alice(), bob(), Some(CallId::from("c1")))
            .unwrap();
        let err = sm.start_outgoing_call(alice(), bob(), None).unwrap_err();
        assert!(matches!(err, MeshcallError::CallBusy));
        assert_eq!(sm.current_call_id(), Some(CallId::from("c1")));
    }

    #[test]
    fn annehmen_ohne_einladung_schlaegt_fehl() {
        let sm = CallStateMachine::neu();
        assert!(matches!(
            sm.accept_current_call(),
            Err(MeshcallError::NoIncomingCall)
        ));
        assert_eq!(sm.phase(), CallPhase::Idle);

        sm.start_outgoing_call(alice(), bob(), None).unwrap();
        assert!(sm.accept_current_call().is_err());
        assert!(sm.reject_current_call().is_err());
        assert_eq!(sm.phase(), CallPhase::OutgoingCall);
    }

    #[test]
    fn eingehend_annehmen() {
        let sm = CallStateMachine::neu();
        let info = CallInfo::neu(CallId::from("c7"), bob(), alice(), false);
        assert!(sm.receive_incoming_invite(info));
        assert_eq!(sm.phase(), CallPhase::IncomingCall);

        let angenommen = sm.accept_current_call().unwrap();
        assert_eq!(angenommen.call_id, CallId::from("c7"));
        assert!(!angenommen.initiated_by_local);
        assert_eq!(sm.phase(), CallPhase::InCall);
    }

    #[test]
    fn besetzt_bei_zweiter_einladung() {
        let sm = CallStateMachine::neu();
        assert!(sm.receive_incoming_invite(CallInfo::neu(CallId::from("c1"), bob(), alice(), false)));
        let log = mit_protokoll(&sm);
        assert!(!sm.receive_incoming_invite(CallInfo::neu(
            CallId::from("c2"),
            bob(),
            PeerId::from("cafe"),
            false
        )));
        assert_eq!(sm.current_call_id(), Some(CallId::from("c1")));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn ablehnen_fuehrt_zurueck_nach_idle() {
        let sm = CallStateMachine::neu();
        sm.receive_incoming_invite(CallInfo::neu(CallId::from("c1"), bob(), alice(), false));
        let log = mit_protokoll(&sm);
        sm.reject_current_call().unwrap();
        assert_eq!(sm.phase(), CallPhase::Idle);
        assert_eq!(
            *log.lock(),
            vec![(CallPhase::Ended, true), (CallPhase::Idle, false)]
        );
    }

    #[test]
    fn fremde_anruf_ids_werden_ignoriert() {
        let sm = CallStateMachine::neu();
        let info = sm
            .start_outgoing_call(alice(), bob(), Some(CallId::from("c1")))
            .unwrap();
        let fremd = CallId::from("c2");
        assert!(!sm.mark_remote_accepted(&fremd, None, None));
        assert!(!sm.mark_remote_rejected(&fremd));
        assert!(!sm.remote_ended(&fremd));
        assert_eq!(sm.phase(), CallPhase::OutgoingCall);

        assert!(sm.mark_remote_rejected(&info.call_id));
        assert_eq!(sm.phase(), CallPhase::Idle);
    }

    #[test]
    fn auflegen_im_leerlauf_ist_noop() {
        let sm = CallStateMachine::neu();
        let log = mit_protokoll(&sm);
        assert!(sm.end_call().is_none());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn verhandlungsstufen() {
        let codec = NegotiatedCodec::neu(CodecType::Opus, 16_000);
        let media = MediaEndpoint::neu("00ff", "a2V5");

        let info = CallInfo::neu(CallId::from("c1"), alice(), bob(), true);
        assert_eq!(info.stage, CallStage::Pending { media: None });

        let verhandelt = info.clone().mit_codec(codec);
        assert_eq!(verhandelt.stage, CallStage::Negotiated { codec });
        assert!(verhandelt.media().is_none());

        let aktiv = verhandelt.mit_media(media.clone());
        assert_eq!(
            aktiv.stage,
            CallStage::Active {
                codec,
                media: media.clone()
            }
        );

        // Endpunkt vor Codec
        let frueh = info.mit_media(media.clone());
        assert_eq!(frueh.media(), Some(&media));
        assert!(frueh.codec().is_none());
        assert_eq!(frueh.mit_codec(codec).codec(), Some(codec));
    }

    #[test]
    fn annahme_ergaenzt_teilweise_angaben() {
        let sm = CallStateMachine::neu();
        let info = sm.start_outgoing_call(alice(), bob(), None).unwrap();
        assert!(sm.set_negotiated_codec(&info.call_id, NegotiatedCodec::neu(CodecType::Opus, 24_000)));
        // Nur Ziel ohne Schluessel: Endpunkt bleibt unbekannt
        sm.mark_remote_accepted(&info.call_id, Some("00ff"), None);
        let call = sm.current_call().unwrap();
        assert!(matches!(call.stage, CallStage::Negotiated { .. }));
        assert!(!sm.set_negotiated_codec(&CallId::from("x"), NegotiatedCodec::neu(CodecType::Opus, 8_000)));
    }

    #[test]
    fn beobachter_darf_automaten_aufrufen() {
        let sm = Arc::new(CallStateMachine::neu());
        let sm2 = sm.clone();
        let gesehen = Arc::new(Mutex::new(Vec::new()));
        let g = gesehen.clone();
        sm.on_state_changed(move |phase, _| {
            // Wiedereintritt ohne Deadlock
            g.lock().push((phase, sm2.phase()));
        });
        sm.start_outgoing_call(alice(), bob(), None).unwrap();
        assert_eq!(
            *gesehen.lock(),
            vec![(CallPhase::OutgoingCall, CallPhase::OutgoingCall)]
        );
    }
}
