//! Audio-Pipeline eines Anrufs
//!
//! Zwei unabhaengige Threads:
//! - Capture: Frame lesen -> Pegel -> kodieren -> Sende-Callback
//! - Playback: zeitgesteuert reifen Frame aus dem Jitter-Buffer holen ->
//!   ausgeben -> Pegel. Ist nichts reif, schlaeft der Thread einen halben
//!   Frame lang.
//!
//! Empfangene Frames werden beim Eintreffen dekodiert und in den
//! Jitter-Buffer gelegt. Fehlt ein Codec oder laesst sich ein Geraet nicht
//! oeffnen, laeuft die Pipeline im Stub-Modus: Audio wird still verworfen,
//! der Anruf laeuft weiter.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use meshcall_protocol::{CodecEinstellungen, CodecType, FRAME_MS, OPUS_ABTASTRATE};
use meshcall_voice::{JitterBuffer, JitterBufferStatistik};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::codec::{codec_erstellen, rms, CodecPaar, SprachDecoder, SprachEncoder};
use crate::device::{standard_backend, AudioAusgang, AudioEingang, GeraeteAuswahl, GeraeteBackend};
use crate::error::{AudioError, AudioResult};

/// Empfaengt jeden kodierten Frame des Capture-Threads
pub type SendeCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Laufzeitparameter der Pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineKonfig {
    /// Zielverzoegerung des Jitter-Buffers
    pub ziel_verzoegerung_ms: u64,
    /// Maximale Anzahl gepufferter Frames
    pub jitter_kapazitaet: usize,
    /// Wartezeit auf das Oeffnen der Geraete
    pub start_wartezeit: Duration,
    /// Obergrenze pro Thread beim Beenden
    pub join_wartezeit: Duration,
}

impl Default for PipelineKonfig {
    fn default() -> Self {
        Self {
            ziel_verzoegerung_ms: 60,
            jitter_kapazitaet: 200,
            start_wartezeit: Duration::from_secs(2),
            join_wartezeit: Duration::from_secs(1),
        }
    }
}

/// f32 als Bits in einem AtomicU32
#[derive(Debug, Default)]
struct Pegel(AtomicU32);

impl Pegel {
    fn setzen(&self, wert: f32) {
        self.0.store(wert.to_bits(), Ordering::Relaxed);
    }

    fn lesen(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Audio-Pipeline fuer genau einen Anruf
pub struct AudioPipeline {
    konfig: PipelineKonfig,
    backend: Arc<dyn GeraeteBackend>,
    encoder: Option<Arc<Mutex<Box<dyn SprachEncoder>>>>,
    decoder: Option<Mutex<Box<dyn SprachDecoder>>>,
    codec_type: Option<CodecType>,
    abtastrate: u32,
    frame_groesse: usize,
    frame_ms: u64,
    jitter: Arc<Mutex<JitterBuffer<Vec<f32>>>>,
    aktiv: Arc<AtomicBool>,
    gestartet: AtomicBool,
    stub: AtomicBool,
    eingangspegel: Arc<Pegel>,
    ausgangspegel: Arc<Pegel>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl AudioPipeline {
    /// Pipeline fuer die gegebenen Codec-Einstellungen und Standardgeraete.
    ///
    /// Schlaegt die Codec-Erstellung fehl, entsteht eine Stub-Pipeline.
    pub fn neu(
        einstellungen: &CodecEinstellungen,
        auswahl: GeraeteAuswahl,
        konfig: PipelineKonfig,
    ) -> Self {
        let codec = match codec_erstellen(einstellungen) {
            Ok(paar) => Some(paar),
            Err(e) => {
                warn!(codec = %einstellungen.codec, "Codec nicht verfuegbar, Stub-Modus: {}", e);
                None
            }
        };
        Self::with_backend(codec, standard_backend(auswahl), konfig)
    }

    /// Pipeline mit explizitem Codec und Geraete-Backend
    pub fn with_backend(
        codec: Option<CodecPaar>,
        backend: Arc<dyn GeraeteBackend>,
        konfig: PipelineKonfig,
    ) -> Self {
        let (codec_type, abtastrate, frame_groesse, frame_ms) = match &codec {
            Some(paar) => (
                Some(paar.codec_type()),
                paar.abtastrate(),
                paar.frame_groesse(),
                paar.frame_ms(),
            ),
            None => (
                None,
                OPUS_ABTASTRATE,
                (OPUS_ABTASTRATE * FRAME_MS / 1_000) as usize,
                FRAME_MS as u64,
            ),
        };
        let (encoder, decoder) = match codec {
            Some(CodecPaar { encoder, decoder }) => {
                (Some(Arc::new(Mutex::new(encoder))), Some(Mutex::new(decoder)))
            }
            None => (None, None),
        };

        let jitter = JitterBuffer::neu(konfig.jitter_kapazitaet);
        Self {
            konfig,
            backend,
            encoder,
            decoder,
            codec_type,
            abtastrate,
            frame_groesse,
            frame_ms,
            jitter: Arc::new(Mutex::new(jitter)),
            aktiv: Arc::new(AtomicBool::new(false)),
            gestartet: AtomicBool::new(false),
            stub: AtomicBool::new(false),
            eingangspegel: Arc::new(Pegel::default()),
            ausgangspegel: Arc::new(Pegel::default()),
            threads: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Steuerung
    // -----------------------------------------------------------------------

    /// Startet Capture und Playback.
    ///
    /// Gibt `true` zurueck wenn echtes Audio laeuft, `false` im Stub-Modus.
    /// Ein zweiter Aufruf ohne `stop()` aendert nichts.
    pub fn start(&self, sende: SendeCallback) -> bool {
        if self.gestartet.swap(true, Ordering::AcqRel) {
            return !self.ist_stub();
        }

        let Some(encoder) = self.encoder.clone() else {
            info!("Audio-Pipeline ohne Codec gestartet (Stub-Modus)");
            self.stub.store(true, Ordering::Release);
            return false;
        };

        self.aktiv.store(true, Ordering::Release);
        match self.threads_starten(encoder, sende) {
            Ok(()) => {
                info!(
                    codec = ?self.codec_type,
                    abtastrate = self.abtastrate,
                    frame_ms = self.frame_ms,
                    backend = self.backend.name(),
                    "Audio-Pipeline gestartet"
                );
                true
            }
            Err(e) => {
                warn!("Audio-Geraete nicht verfuegbar, Stub-Modus: {}", e);
                self.threads_beenden();
                self.stub.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Stoppt beide Threads und leert den Puffer. Mehrfacher Aufruf ist
    /// unschaedlich.
    pub fn stop(&self) {
        if !self.gestartet.swap(false, Ordering::AcqRel) {
            return;
        }
        self.threads_beenden();
        self.jitter.lock().clear();
        self.eingangspegel.setzen(0.0);
        self.ausgangspegel.setzen(0.0);
        self.stub.store(false, Ordering::Release);
        debug!("Audio-Pipeline gestoppt");
    }

    /// Nimmt einen empfangenen Frame entgegen. Dekodierfehler verwerfen nur
    /// diesen Frame.
    pub fn receive_frame(&self, daten: &[u8]) {
        if !self.laeuft() || self.ist_stub() {
            return;
        }
        let Some(decoder) = &self.decoder else {
            return;
        };
        let ergebnis = decoder.lock().decode(daten);
        match ergebnis {
            Ok(pcm) => self.jitter.lock().push(pcm),
            Err(e) => debug!(bytes = daten.len(), "Frame verworfen: {}", e),
        }
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn laeuft(&self) -> bool {
        self.gestartet.load(Ordering::Acquire)
    }

    pub fn ist_stub(&self) -> bool {
        self.stub.load(Ordering::Acquire)
    }

    pub fn codec_type(&self) -> Option<CodecType> {
        self.codec_type
    }

    pub fn abtastrate(&self) -> u32 {
        self.abtastrate
    }

    pub fn frame_groesse(&self) -> usize {
        self.frame_groesse
    }

    pub fn frame_ms(&self) -> u64 {
        self.frame_ms
    }

    /// RMS des zuletzt aufgenommenen Frames
    pub fn eingangspegel(&self) -> f32 {
        self.eingangspegel.lesen()
    }

    /// RMS des zuletzt ausgegebenen Frames
    pub fn ausgangspegel(&self) -> f32 {
        self.ausgangspegel.lesen()
    }

    pub fn puffer_tiefe(&self) -> usize {
        self.jitter.lock().depth()
    }

    pub fn jitter_statistik(&self) -> JitterBufferStatistik {
        self.jitter.lock().statistik()
    }

    // -----------------------------------------------------------------------
    // Threads
    // -----------------------------------------------------------------------

    fn threads_starten(
        &self,
        encoder: Arc<Mutex<Box<dyn SprachEncoder>>>,
        sende: SendeCallback,
    ) -> AudioResult<()> {
        let (capture_tx, capture_rx) = bounded::<AudioResult<()>>(1);
        let (playback_tx, playback_rx) = bounded::<AudioResult<()>>(1);

        let capture = {
            let backend = self.backend.clone();
            let aktiv = self.aktiv.clone();
            let pegel = self.eingangspegel.clone();
            let abtastrate = self.abtastrate;
            let frame_groesse = self.frame_groesse;
            thread::Builder::new()
                .name("meshcall-capture".to_string())
                .spawn(move || match backend.eingang_oeffnen(abtastrate) {
                    Ok(eingang) => {
                        let _ = capture_tx.send(Ok(()));
                        capture_schleife(eingang, encoder, frame_groesse, aktiv, pegel, sende);
                    }
                    Err(e) => {
                        let _ = capture_tx.send(Err(e));
                    }
                })
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        };
        self.threads.lock().push(capture);

        let playback = {
            let backend = self.backend.clone();
            let aktiv = self.aktiv.clone();
            let pegel = self.ausgangspegel.clone();
            let jitter = self.jitter.clone();
            let abtastrate = self.abtastrate;
            let ziel = self.konfig.ziel_verzoegerung_ms;
            let halber_frame = Duration::from_millis((self.frame_ms / 2).max(1));
            thread::Builder::new()
                .name("meshcall-playback".to_string())
                .spawn(move || match backend.ausgang_oeffnen(abtastrate) {
                    Ok(ausgang) => {
                        let _ = playback_tx.send(Ok(()));
                        playback_schleife(ausgang, jitter, ziel, halber_frame, aktiv, pegel);
                    }
                    Err(e) => {
                        let _ = playback_tx.send(Err(e));
                    }
                })
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        };
        self.threads.lock().push(playback);

        let frist = self.konfig.start_wartezeit;
        for (rx, seite) in [(capture_rx, "Eingabe"), (playback_rx, "Ausgabe")] {
            match rx.recv_timeout(frist) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(AudioError::StreamFehler(format!(
                        "{seite}-Geraet nicht rechtzeitig geoeffnet"
                    )))
                }
            }
        }
        Ok(())
    }

    fn threads_beenden(&self) {
        self.aktiv.store(false, Ordering::Release);
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            begrenzt_beitreten(handle, self.konfig.join_wartezeit);
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_schleife(
    mut eingang: Box<dyn AudioEingang>,
    encoder: Arc<Mutex<Box<dyn SprachEncoder>>>,
    frame_groesse: usize,
    aktiv: Arc<AtomicBool>,
    pegel: Arc<Pegel>,
    sende: SendeCallback,
) {
    let mut frame = vec![0.0f32; frame_groesse];
    debug!("Capture-Thread gestartet");

    while aktiv.load(Ordering::Acquire) {
        match eingang.lesen(&mut frame) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Capture abgebrochen: {}", e);
                break;
            }
        }

        pegel.setzen(rms(&frame));
        let kodiert = encoder.lock().encode(&frame);
        match kodiert {
            Ok(daten) => sende(daten),
            Err(e) => debug!("Encode fehlgeschlagen, Frame verworfen: {}", e),
        }
    }
    debug!("Capture-Thread beendet");
}

fn playback_schleife(
    mut ausgang: Box<dyn AudioAusgang>,
    jitter: Arc<Mutex<JitterBuffer<Vec<f32>>>>,
    ziel_ms: u64,
    halber_frame: Duration,
    aktiv: Arc<AtomicBool>,
    pegel: Arc<Pegel>,
) {
    debug!("Playback-Thread gestartet");

    while aktiv.load(Ordering::Acquire) {
        let frame = jitter.lock().pop_ready(ziel_ms);
        match frame {
            Some(pcm) => {
                pegel.setzen(rms(&pcm));
                if let Err(e) = ausgang.schreiben(&pcm) {
                    warn!("Playback abgebrochen: {}", e);
                    break;
                }
            }
            None => thread::sleep(halber_frame),
        }
    }
    debug!("Playback-Thread beendet");
}

/// Wartet hoechstens `frist` auf das Thread-Ende. Haengt der Thread, wird
/// er abgekoppelt.
fn begrenzt_beitreten(handle: JoinHandle<()>, frist: Duration) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let ende = Instant::now() + frist;
    while !handle.is_finished() {
        if Instant::now() >= ende {
            warn!(
                thread = handle.thread().name().unwrap_or("?"),
                "Audio-Thread reagiert nicht, wird abgekoppelt"
            );
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        warn!("Audio-Thread mit Panik beendet");
    } else {
        trace!("Audio-Thread beigetreten");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
