//! Demo: zwei Knoten im selben Prozess
//!
//! Der lokale Knoten ruft eine Gegenstelle an, die automatisch annimmt.
//! Waehrend des Gespraechs werden Metriken und SAS protokolliert, nach
//! der konfigurierten Dauer oder bei Ctrl-C wird aufgelegt.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meshcall_core::PeerId;
use meshcall_media::{IdentityKey, LoopbackNetz, MediaTransport};
use meshcall_signaling::{CallInfo, CallPhase};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::engine::{CallEngine, EngineKonfig};
use crate::peers::PeerVerzeichnis;
use crate::versand::{Posteingang, SignalNetz};

/// Ein laufender Knoten mit seinen Hintergrund-Tasks
pub struct Knoten {
    pub engine: Arc<CallEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl Knoten {
    /// Baut einen Knoten auf und startet die Empfangs-Task
    pub fn starten(
        config: &NodeConfig,
        key: IdentityKey,
        media_netz: &Arc<LoopbackNetz>,
        signal_netz: &Arc<SignalNetz>,
    ) -> Self {
        let local_id = PeerId::from(key.identity_hash_hex());
        let transport: Arc<dyn MediaTransport> = media_netz.transport(key);
        let (versand, posteingang) = signal_netz.anmelden(local_id.clone());
        let engine = CallEngine::neu(
            local_id,
            EngineKonfig::aus_node_config(config),
            PeerVerzeichnis::aus_konfig(&config.peers),
            transport,
            versand,
        );
        let empfang = tokio::spawn(empfangen(engine.clone(), posteingang));
        Self {
            engine,
            tasks: vec![empfang],
        }
    }

    /// Nimmt eingehende Anrufe automatisch an
    pub fn automatisch_annehmen(&mut self) {
        let engine = self.engine.clone();
        let mut phasen = engine.phasen_abonnieren();
        self.tasks.push(tokio::spawn(async move {
            while let Ok(wechsel) = phasen.recv().await {
                if wechsel.phase != CallPhase::IncomingCall {
                    continue;
                }
                let annehmend = engine.clone();
                match tokio::task::spawn_blocking(move || annehmend.annehmen()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Automatische Annahme fehlgeschlagen: {}", e),
                    Err(e) => warn!("Annahme-Task abgebrochen: {}", e),
                }
            }
        }));
    }

    /// Raeumt Filter und Rate Limiter periodisch auf
    pub fn bereinigung_starten(&mut self, takt: Duration) {
        let engine = self.engine.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(takt);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (filter, limiter) = engine.bereinigen();
                tracing::debug!(filter, limiter, "Bereinigung");
            }
        }));
    }

    pub fn local_id(&self) -> &PeerId {
        self.engine.local_id()
    }
}

impl Drop for Knoten {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Verarbeitet eingehende Signalisierung der Reihe nach. Die Engine
/// startet und stoppt Audio-Threads synchron, daher laeuft jede Nachricht
/// im Blocking-Pool.
async fn empfangen(engine: Arc<CallEngine>, mut posteingang: Posteingang) {
    while let Some(daten) = posteingang.recv().await {
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.nachricht_empfangen(&daten)).await {
            Ok(Ok(ergebnis)) => tracing::trace!(?ergebnis, "Signalisierung verarbeitet"),
            Ok(Err(e)) => warn!("Signalisierung fehlerhaft: {}", e),
            Err(e) => warn!("Verarbeitung abgebrochen: {}", e),
        }
    }
}

/// Legt auf, ohne einen Runtime-Thread auf die Audio-Threads warten zu lassen
async fn auflegen(engine: &Arc<CallEngine>) -> Option<CallInfo> {
    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || engine.auflegen()).await {
        Ok(call) => call,
        Err(e) => {
            warn!("Auflegen abgebrochen: {}", e);
            None
        }
    }
}

/// Fuehrt die Demo aus
pub async fn ausfuehren(config: NodeConfig) -> anyhow::Result<()> {
    let media_netz = LoopbackNetz::neu();
    let signal_netz = SignalNetz::neu();

    let mut lokal = Knoten::starten(
        &config,
        config.identitaet_schluessel()?,
        &media_netz,
        &signal_netz,
    );
    let mut gegen_config = config.clone();
    gegen_config.identitaet.display_name = "Gegenstelle".into();
    gegen_config.identitaet.identity_key = None;
    let mut gegenstelle = Knoten::starten(
        &gegen_config,
        IdentityKey::zufaellig(),
        &media_netz,
        &signal_netz,
    );
    gegenstelle.automatisch_annehmen();

    let takt = Duration::from_secs(config.filter.bereinigung_s.max(1));
    lokal.bereinigung_starten(takt);
    gegenstelle.bereinigung_starten(takt);

    lokal.engine.ankuendigen()?;
    gegenstelle.engine.ankuendigen()?;
    sleep(Duration::from_millis(100)).await;

    let call_id = lokal
        .engine
        .anrufen(gegenstelle.local_id())
        .context("Anruf konnte nicht gestartet werden")?;
    info!(
        call_id = %call_id,
        ziel = %gegenstelle.local_id().kurz(),
        dauer_s = config.demo.dauer_s,
        "Demo-Anruf gestartet"
    );

    let mut metriken = interval(Duration::from_secs(config.demo.metrik_intervall_s.max(1)));
    metriken.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ende = sleep(Duration::from_secs(config.demo.dauer_s));
    tokio::pin!(ende);

    loop {
        tokio::select! {
            _ = &mut ende => {
                info!("Demo-Dauer erreicht");
                break;
            }
            ergebnis = tokio::signal::ctrl_c() => {
                ergebnis?;
                info!("Shutdown-Signal empfangen");
                break;
            }
            _ = metriken.tick() => {
                if lokal.engine.phase() == CallPhase::Idle {
                    info!("Anruf wurde beendet");
                    break;
                }
                status_protokollieren(&lokal.engine);
            }
        }
    }

    if let Some(call) = auflegen(&lokal.engine).await {
        info!(call_id = %call.call_id, "Aufgelegt");
    }
    sleep(Duration::from_millis(100)).await;
    info!(
        lokal = %lokal.engine.phase(),
        gegenstelle = %gegenstelle.engine.phase(),
        "Demo beendet"
    );
    Ok(())
}

fn status_protokollieren(engine: &CallEngine) {
    let Some(metrics) = engine.get_metrics() else {
        info!(phase = %engine.phase(), "Noch keine Media Session");
        return;
    };
    let sicherheit = engine.get_security_info().unwrap_or_default();
    info!(
        phase = %engine.phase(),
        sas = sicherheit.sas_code.as_deref().unwrap_or("-"),
        verschluesselt = sicherheit.encrypted,
        "{}",
        metrics.zusammenfassung()
    );
}
