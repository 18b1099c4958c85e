//! Media Session
//!
//! Eine Session verwaltet den Sprach-Link eines Anrufs:
//!
//! ```text
//! Idle --start()--> Handshaking --Link aufgebaut--> Active
//!                        |                             |
//!                        +--Timeout / Link zu / stop()-+--> Closed
//! ```
//!
//! Der Anrufer baut den Link aktiv auf, der Angerufene wartet passiv auf
//! den eingehenden Link, den der [`MediaManager`](crate::MediaManager)
//! weiterreicht. Ist der Link aktiv, wird der SAS abgeleitet, die
//! Audio-Pipeline gestartet und ein erster Ping gesendet.
//!
//! Link-Methoden werden nie unter der Zustandssperre aufgerufen, weil
//! Transport-Callbacks synchron zurueck in die Session laufen koennen.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meshcall_audio::{AudioPipeline, GeraeteAuswahl, OhneGeraete, PipelineKonfig};
use meshcall_core::{CallId, MeshcallError, PeerId, Result};
use meshcall_protocol::{
    zeitstempel_jetzt, CodecEinstellungen, MediaEndpoint, MediaFrame, PingPayload, PingRichtung,
};
use meshcall_voice::{CallMetrics, CallMetricsSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::address::{IdentityKey, MediaDestination};
use crate::link::{MediaLink, MediaTransport};
use crate::security::{generate_sas, SecurityInfo, SAS_STANDARD_LAENGE};
use crate::timer::Timer;

// ---------------------------------------------------------------------------
// Konfiguration und Typen
// ---------------------------------------------------------------------------

/// Einstellungen einer Media Session
#[derive(Debug, Clone)]
pub struct SessionKonfig {
    /// Maximale Dauer des Link-Aufbaus
    pub handshake_timeout: Duration,
    /// Intervall der Status-Logs waehrend des Aufbaus
    pub status_intervall: Duration,
    /// Laenge des SAS in Ziffern
    pub sas_laenge: usize,
    /// `false` erzwingt eine Pipeline ohne Codec und Geraete
    pub audio_aktiv: bool,
    pub pipeline: PipelineKonfig,
    pub geraete: GeraeteAuswahl,
}

impl Default for SessionKonfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            status_intervall: Duration::from_secs(2),
            sas_laenge: SAS_STANDARD_LAENGE,
            audio_aktiv: true,
            pipeline: PipelineKonfig::default(),
            geraete: GeraeteAuswahl::default(),
        }
    }
}

/// Anrufdaten, die eine Session braucht
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParameter {
    pub call_id: CallId,
    pub remote_id: PeerId,
    pub initiated_by_local: bool,
    /// Pflicht fuer den Anrufer, beim Angerufenen optional
    pub remote: Option<MediaEndpoint>,
    /// Ausgehandelter Codec
    pub codec: CodecEinstellungen,
}

/// Handshake-Zustand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandshakeZustand {
    Idle,
    Handshaking,
    Active,
    Closed,
}

/// Warum eine Session ohne lokales `stop()` endete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnde {
    HandshakeTimeout,
    LinkGeschlossen,
}

/// Wird aufgerufen, wenn eine Session von aussen endet
pub type SessionEndeCallback = Arc<dyn Fn(&CallId, SessionEnde) + Send + Sync>;

struct Zustand {
    phase: HandshakeZustand,
    link: Option<Arc<dyn MediaLink>>,
    encrypted: bool,
    sas_code: Option<String>,
    sas_verified: bool,
    handshake_timer: Option<Timer>,
    status_timer: Option<Timer>,
}

impl Zustand {
    /// Nimmt beide Timer heraus; beim Drop werden sie abgebrochen
    fn timer_nehmen(&mut self) -> (Option<Timer>, Option<Timer>) {
        (self.handshake_timer.take(), self.status_timer.take())
    }
}

struct SessionInner {
    params: SessionParameter,
    konfig: SessionKonfig,
    transport: Arc<dyn MediaTransport>,
    pipeline: AudioPipeline,
    zustand: Mutex<Zustand>,
    metrics: Mutex<CallMetrics>,
    tx_seq: AtomicU16,
    gestoppt: AtomicBool,
    senden_gemeldet: AtomicBool,
    ende_callback: Option<SessionEndeCallback>,
}

// ---------------------------------------------------------------------------
// MediaSession
// ---------------------------------------------------------------------------

/// Sprach-Link eines einzelnen Anrufs
pub struct MediaSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession").finish_non_exhaustive()
    }
}

impl MediaSession {
    /// Neue Session; die Pipeline wird aus dem ausgehandelten Codec gebaut
    pub fn neu(
        params: SessionParameter,
        konfig: SessionKonfig,
        transport: Arc<dyn MediaTransport>,
        ende_callback: Option<SessionEndeCallback>,
    ) -> Self {
        let pipeline = if konfig.audio_aktiv {
            AudioPipeline::neu(&params.codec, konfig.geraete.clone(), konfig.pipeline.clone())
        } else {
            AudioPipeline::with_backend(None, Arc::new(OhneGeraete), konfig.pipeline.clone())
        };
        Self::mit_pipeline(params, konfig, transport, pipeline, ende_callback)
    }

    /// Neue Session mit vorbereiteter Pipeline
    pub fn mit_pipeline(
        params: SessionParameter,
        konfig: SessionKonfig,
        transport: Arc<dyn MediaTransport>,
        pipeline: AudioPipeline,
        ende_callback: Option<SessionEndeCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                params,
                konfig,
                transport,
                pipeline,
                zustand: Mutex::new(Zustand {
                    phase: HandshakeZustand::Idle,
                    link: None,
                    encrypted: false,
                    sas_code: None,
                    sas_verified: false,
                    handshake_timer: None,
                    status_timer: None,
                }),
                metrics: Mutex::new(CallMetrics::neu()),
                tx_seq: AtomicU16::new(0),
                gestoppt: AtomicBool::new(false),
                senden_gemeldet: AtomicBool::new(false),
                ende_callback,
            }),
        }
    }

    /// Startet den Handshake: aktiv als Anrufer, passiv als Angerufener
    pub fn start(&self) -> Result<()> {
        if self.inner.params.initiated_by_local {
            SessionInner::initiator_starten(&self.inner)
        } else {
            self.inner.responder_starten();
            Ok(())
        }
    }

    /// Eingehender Link vom Manager. Gibt `false` zurueck, wenn die Session
    /// ihn nicht uebernimmt.
    pub fn on_incoming_link(&self, link: Arc<dyn MediaLink>) -> bool {
        if self.inner.params.initiated_by_local {
            warn!(
                call_id = %self.inner.params.call_id,
                link = %link.link_id(),
                "Eingehender Link, obwohl wir Anrufer sind: ignoriert"
            );
            return false;
        }
        SessionInner::link_aufgebaut(&self.inner, link)
    }

    /// Beendet die Session. Mehrfacher Aufruf ist unschaedlich.
    pub fn stop(&self) {
        self.inner.stoppen();
    }

    /// Sendet Steuerdaten ueber den Link
    pub fn send_control(&self, daten: &[u8]) {
        self.inner
            .frame_senden(&MediaFrame::Control(Bytes::copy_from_slice(daten)));
    }

    /// Sendet eine Ping-Anfrage
    pub fn send_ping(&self) {
        self.inner.ping_senden();
    }

    pub fn call_id(&self) -> &CallId {
        &self.inner.params.call_id
    }

    pub fn remote_id(&self) -> &PeerId {
        &self.inner.params.remote_id
    }

    pub fn initiated_by_local(&self) -> bool {
        self.inner.params.initiated_by_local
    }

    pub fn zustand(&self) -> HandshakeZustand {
        self.inner.zustand.lock().phase
    }

    pub fn ist_aktiv(&self) -> bool {
        self.zustand() == HandshakeZustand::Active
    }

    /// Audio laeuft ohne Codec oder Geraete
    pub fn audio_im_stub_modus(&self) -> bool {
        self.inner.pipeline.ist_stub()
    }

    /// Aktueller Metrik-Snapshot inklusive Pegel und Jitter
    pub fn get_metrics(&self) -> CallMetricsSnapshot {
        let pipeline = &self.inner.pipeline;
        let mut metrics = self.inner.metrics.lock();
        metrics.set_buffer_depth(pipeline.puffer_tiefe());
        metrics.set_levels(pipeline.eingangspegel(), pipeline.ausgangspegel());
        metrics.snapshot()
    }

    pub fn get_security_info(&self) -> SecurityInfo {
        let z = self.inner.zustand.lock();
        SecurityInfo {
            encrypted: z.encrypted,
            sas_code: z.sas_code.clone(),
            sas_verified: z.sas_verified,
        }
    }

    /// Markiert den SAS als muendlich bestaetigt
    pub fn verify_sas(&self) {
        let mut z = self.inner.zustand.lock();
        if z.sas_code.is_none() {
            debug!(call_id = %self.inner.params.call_id, "SAS-Bestaetigung ohne SAS");
        }
        z.sas_verified = true;
        info!(call_id = %self.inner.params.call_id, "SAS bestaetigt");
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.inner.stoppen();
    }
}

// ---------------------------------------------------------------------------
// Interne Ablaeufe
// ---------------------------------------------------------------------------

impl SessionInner {
    fn initiator_starten(inner: &Arc<Self>) -> Result<()> {
        let call_id = inner.params.call_id.clone();
        let Some(remote) = inner.params.remote.clone() else {
            inner.zustand.lock().phase = HandshakeZustand::Closed;
            return Err(MeshcallError::link(format!(
                "Medien-Endpunkt der Gegenseite fehlt (call_id={call_id})"
            )));
        };

        let key = match IdentityKey::from_base64(&remote.identity_key) {
            Ok(key) => key,
            Err(e) => {
                inner.zustand.lock().phase = HandshakeZustand::Closed;
                return Err(MeshcallError::link(format!(
                    "Identitaetsschluessel der Gegenseite unbrauchbar: {e}"
                )));
            }
        };
        MediaDestination::aus_identitaet(&key).pruefe_erwartet(&remote.ziel);

        {
            let mut z = inner.zustand.lock();
            if z.phase != HandshakeZustand::Idle {
                return Ok(());
            }
            z.phase = HandshakeZustand::Handshaking;
            z.handshake_timer = Some(Self::handshake_timer(inner));
            z.status_timer = Some(Self::status_timer(inner));
        }

        let aufgebaut = {
            let weak = Arc::downgrade(inner);
            Box::new(move |link: Arc<dyn MediaLink>| {
                if let Some(inner) = weak.upgrade() {
                    SessionInner::link_aufgebaut(&inner, link);
                } else {
                    link.teardown();
                }
            })
        };
        let geschlossen = {
            let weak = Arc::downgrade(inner);
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.link_geschlossen();
                }
            })
        };

        match inner.transport.create_outbound_link(
            &remote.ziel,
            &remote.identity_key,
            aufgebaut,
            geschlossen,
        ) {
            Ok(link) => {
                info!(
                    call_id = %call_id,
                    ziel = %remote.ziel,
                    link = %link.link_id(),
                    "(Anrufer) Link-Aufbau gestartet"
                );
                let verwerfen = {
                    let mut z = inner.zustand.lock();
                    match z.phase {
                        HandshakeZustand::Handshaking => {
                            if z.link.is_none() {
                                z.link = Some(link);
                            }
                            None
                        }
                        HandshakeZustand::Closed => Some(link),
                        _ => None,
                    }
                };
                // Session wurde waehrenddessen beendet
                if let Some(link) = verwerfen {
                    link.teardown();
                }
                Ok(())
            }
            Err(e) => {
                let (_h, _s) = {
                    let mut z = inner.zustand.lock();
                    z.phase = HandshakeZustand::Closed;
                    z.timer_nehmen()
                };
                Err(MeshcallError::link(format!("Link-Aufbau fehlgeschlagen: {e}")))
            }
        }
    }

    fn responder_starten(&self) {
        let mut z = self.zustand.lock();
        if z.phase == HandshakeZustand::Idle {
            z.phase = HandshakeZustand::Handshaking;
            info!(call_id = %self.params.call_id, "(Angerufener) warte auf eingehenden Link");
        }
    }

    fn handshake_timer(inner: &Arc<Self>) -> Timer {
        let weak = Arc::downgrade(inner);
        Timer::einmalig("handshake", inner.konfig.handshake_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.handshake_abgelaufen();
            }
        })
    }

    fn status_timer(inner: &Arc<Self>) -> Timer {
        let weak = Arc::downgrade(inner);
        Timer::periodisch("link-status", inner.konfig.status_intervall, move || {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let link = {
                let z = inner.zustand.lock();
                if z.phase != HandshakeZustand::Handshaking {
                    return false;
                }
                z.link.clone()
            };
            let status = link
                .map(|l| l.status().to_string())
                .unwrap_or_else(|| "unbekannt".into());
            debug!(call_id = %inner.params.call_id, status, "Link-Status");
            true
        })
    }

    fn handshake_abgelaufen(&self) {
        let (link, _timer) = {
            let mut z = self.zustand.lock();
            if z.phase != HandshakeZustand::Handshaking {
                return;
            }
            z.phase = HandshakeZustand::Closed;
            (z.link.take(), z.timer_nehmen())
        };

        warn!(
            call_id = %self.params.call_id,
            timeout_s = self.konfig.handshake_timeout.as_secs(),
            "Link-Aufbau abgelaufen"
        );
        if let Some(link) = link {
            link.teardown();
        }
        self.ende_melden(SessionEnde::HandshakeTimeout);
    }

    /// Link ist aufgebaut (Anrufer) oder eingegangen (Angerufener)
    fn link_aufgebaut(inner: &Arc<Self>, link: Arc<dyn MediaLink>) -> bool {
        let link_id = link.link_id();
        let encrypted = link.is_encrypted();
        let sas = generate_sas(&link.secret(), inner.konfig.sas_laenge);

        let _timer = {
            let mut z = inner.zustand.lock();
            let phase = z.phase;
            match phase {
                HandshakeZustand::Closed => {
                    drop(z);
                    debug!(link = %link_id, "Link nach Session-Ende verworfen");
                    link.teardown();
                    return false;
                }
                HandshakeZustand::Active => {
                    // Wiederholte Meldung desselben Links
                    return z.link.as_ref().is_some_and(|l| Arc::ptr_eq(l, &link));
                }
                HandshakeZustand::Idle | HandshakeZustand::Handshaking => {}
            }
            z.phase = HandshakeZustand::Active;
            z.link = Some(link.clone());
            z.encrypted = encrypted;
            z.sas_code = Some(sas.clone());
            z.timer_nehmen()
        };

        let weak = Arc::downgrade(inner);
        link.on_data(Box::new(move |daten: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.daten_empfangen(daten);
            }
        }));
        let weak = Arc::downgrade(inner);
        link.on_closed(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.link_geschlossen();
            }
        }));

        info!(
            call_id = %inner.params.call_id,
            link = %link_id,
            verschluesselt = encrypted,
            sas = %sas,
            "Link aufgebaut"
        );
        if !encrypted {
            warn!(call_id = %inner.params.call_id, "Link ist NICHT verschluesselt");
        }

        let weak = Arc::downgrade(inner);
        let echt = inner.pipeline.start(Arc::new(move |daten: Vec<u8>| {
            if let Some(inner) = weak.upgrade() {
                inner.audio_senden(daten);
            }
        }));
        if !echt {
            info!(call_id = %inner.params.call_id, "Audio im Stub-Modus, Anruf laeuft ohne Ton");
        }

        inner.ping_senden();
        true
    }

    fn link_geschlossen(&self) {
        let (war_aktiv, _timer) = {
            let mut z = self.zustand.lock();
            if z.phase == HandshakeZustand::Closed {
                return;
            }
            let war_aktiv = z.phase == HandshakeZustand::Active;
            z.phase = HandshakeZustand::Closed;
            z.link = None;
            (war_aktiv, z.timer_nehmen())
        };
        info!(call_id = %self.params.call_id, war_aktiv, "Link geschlossen");
        self.pipeline.stop();
        self.ende_melden(SessionEnde::LinkGeschlossen);
    }

    fn stoppen(&self) {
        if self.gestoppt.swap(true, Ordering::AcqRel) {
            return;
        }
        let (link, _timer) = {
            let mut z = self.zustand.lock();
            z.phase = HandshakeZustand::Closed;
            (z.link.take(), z.timer_nehmen())
        };
        self.pipeline.stop();
        if let Some(link) = link {
            link.teardown();
        }
        debug!(call_id = %self.params.call_id, "Media Session gestoppt");
    }

    fn ende_melden(&self, grund: SessionEnde) {
        if self.gestoppt.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cb) = &self.ende_callback {
            cb(&self.params.call_id, grund);
        }
    }

    // -----------------------------------------------------------------------
    // Senden und Empfangen
    // -----------------------------------------------------------------------

    fn aktiver_link(&self) -> Option<Arc<dyn MediaLink>> {
        let z = self.zustand.lock();
        if z.phase != HandshakeZustand::Active {
            return None;
        }
        z.link.clone()
    }

    fn audio_senden(&self, daten: Vec<u8>) {
        let Some(link) = self.aktiver_link() else {
            return;
        };
        if !link.is_active() {
            return;
        }
        if !self.senden_gemeldet.swap(true, Ordering::Relaxed) {
            info!(call_id = %self.params.call_id, "Erste Audio-Frames werden gesendet");
        }

        let seq = self.tx_seq.fetch_add(1, Ordering::Relaxed);
        let frame = MediaFrame::Audio {
            seq,
            payload: Bytes::from(daten),
        }
        .encode();
        self.metrics.lock().record_packet_sent(frame.len());
        if let Err(e) = link.send(&frame) {
            debug!(seq, "Audio-Frame nicht gesendet: {}", e);
        }
    }

    fn frame_senden(&self, frame: &MediaFrame) {
        let Some(link) = self.aktiver_link() else {
            return;
        };
        if let Err(e) = link.send(&frame.encode()) {
            debug!(typ = ?frame.packet_type(), "Frame nicht gesendet: {}", e);
        }
    }

    fn ping_senden(&self) {
        self.frame_senden(&MediaFrame::Ping(PingPayload::anfrage(zeitstempel_jetzt())));
    }

    fn daten_empfangen(&self, daten: &[u8]) {
        let frame = match MediaFrame::decode(daten) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(bytes = daten.len(), "Medien-Paket verworfen: {}", e);
                return;
            }
        };

        match frame {
            MediaFrame::Audio { seq, payload } => {
                self.metrics.lock().record_packet_received(seq, daten.len());
                self.pipeline.receive_frame(&payload);
            }
            MediaFrame::Ping(ping) => match ping.richtung {
                PingRichtung::Anfrage => {
                    self.frame_senden(&MediaFrame::Ping(ping.als_antwort()));
                }
                PingRichtung::Antwort => {
                    let rtt_ms = (zeitstempel_jetzt() - ping.zeitstempel) * 1_000.0;
                    if rtt_ms.is_finite() && rtt_ms >= 0.0 {
                        let mut metrics = self.metrics.lock();
                        metrics.record_rtt(rtt_ms);
                        trace!(rtt_ms, "Ping-Antwort");
                    }
                }
            },
            MediaFrame::Control(payload) => {
                debug!(bytes = payload.len(), "Steuerdaten empfangen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
