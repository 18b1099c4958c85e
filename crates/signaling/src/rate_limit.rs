//! Anruf-Ratenbegrenzung pro Peer
//!
//! Gleitendes Fenster ueber die Zeitpunkte eingehender Einladungen.
//! Eine Einladung wird abgelehnt, sobald der Peer in der letzten Minute
//! oder der letzten Stunde sein Kontingent ausgeschoepft hat. Abgelehnte
//! Versuche zaehlen nicht mit.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use meshcall_core::PeerId;
use parking_lot::Mutex;
use serde::Serialize;

const MINUTE: Duration = Duration::from_secs(60);
const STUNDE: Duration = Duration::from_secs(3_600);

/// Konfiguration fuer den Rate Limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitKonfig {
    /// Maximale Anrufe pro Minute pro Peer
    pub max_calls_per_minute: u32,
    /// Maximale Anrufe pro Stunde pro Peer
    pub max_calls_per_hour: u32,
    /// Abstand zwischen zwei Bereinigungslaeufen
    pub bereinigungs_intervall: Duration,
}

impl Default for RateLimitKonfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 5,
            max_calls_per_hour: 20,
            bereinigungs_intervall: Duration::from_secs(300),
        }
    }
}

/// Zaehler eines einzelnen Peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PeerStatistik {
    pub calls_last_minute: usize,
    pub calls_last_hour: usize,
    pub total_calls: usize,
}

/// Gesamtuebersicht fuer Verwaltung und Oberflaeche
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatistik {
    pub tracked_peers: usize,
    pub total_calls_tracked: usize,
    pub max_calls_per_minute: u32,
    pub max_calls_per_hour: u32,
}

struct Verlauf {
    anrufe: HashMap<PeerId, VecDeque<Instant>>,
    letzte_bereinigung: Instant,
}

/// Gleitende Anrufbegrenzung
pub struct RateLimiter {
    konfig: RateLimitKonfig,
    verlauf: Mutex<Verlauf>,
}

impl RateLimiter {
    pub fn neu(konfig: RateLimitKonfig) -> Arc<Self> {
        Arc::new(Self {
            konfig,
            verlauf: Mutex::new(Verlauf {
                anrufe: HashMap::new(),
                letzte_bereinigung: Instant::now(),
            }),
        })
    }

    pub fn konfig(&self) -> RateLimitKonfig {
        self.konfig
    }

    /// Prueft ob der Peer jetzt anrufen darf und zaehlt den Anruf wenn ja
    pub fn is_allowed(&self, peer: &PeerId) -> bool {
        self.is_allowed_at(peer, Instant::now())
    }

    pub fn is_allowed_at(&self, peer: &PeerId, jetzt: Instant) -> bool {
        let mut verlauf = self.verlauf.lock();

        if jetzt.saturating_duration_since(verlauf.letzte_bereinigung)
            >= self.konfig.bereinigungs_intervall
        {
            Self::bereinigen_intern(&mut verlauf, jetzt);
        }

        let zeiten = verlauf.anrufe.entry(peer.clone()).or_default();
        kuerzen(zeiten, jetzt);

        let letzte_minute = zaehle_seit(zeiten, jetzt, MINUTE);
        let letzte_stunde = zeiten.len();

        if letzte_minute >= self.konfig.max_calls_per_minute as usize {
            tracing::warn!(
                peer = %peer.kurz(),
                anrufe = letzte_minute,
                limit = self.konfig.max_calls_per_minute,
                "Anruflimit pro Minute erreicht"
            );
            return false;
        }
        if letzte_stunde >= self.konfig.max_calls_per_hour as usize {
            tracing::warn!(
                peer = %peer.kurz(),
                anrufe = letzte_stunde,
                limit = self.konfig.max_calls_per_hour,
                "Anruflimit pro Stunde erreicht"
            );
            return false;
        }

        zeiten.push_back(jetzt);
        true
    }

    /// Setzt den Verlauf eines Peers zurueck
    pub fn reset_peer(&self, peer: &PeerId) {
        if self.verlauf.lock().anrufe.remove(peer).is_some() {
            tracing::info!(peer = %peer.kurz(), "Anrufverlauf zurueckgesetzt");
        }
    }

    pub fn get_peer_stats(&self, peer: &PeerId) -> PeerStatistik {
        self.get_peer_stats_at(peer, Instant::now())
    }

    pub fn get_peer_stats_at(&self, peer: &PeerId, jetzt: Instant) -> PeerStatistik {
        let verlauf = self.verlauf.lock();
        let Some(zeiten) = verlauf.anrufe.get(peer) else {
            return PeerStatistik::default();
        };
        PeerStatistik {
            calls_last_minute: zaehle_seit(zeiten, jetzt, MINUTE),
            calls_last_hour: zaehle_seit(zeiten, jetzt, STUNDE),
            total_calls: zeiten.len(),
        }
    }

    pub fn get_all_stats(&self) -> RateLimitStatistik {
        let verlauf = self.verlauf.lock();
        RateLimitStatistik {
            tracked_peers: verlauf.anrufe.len(),
            total_calls_tracked: verlauf.anrufe.values().map(VecDeque::len).sum(),
            max_calls_per_minute: self.konfig.max_calls_per_minute,
            max_calls_per_hour: self.konfig.max_calls_per_hour,
        }
    }

    /// Entfernt Peers ohne Anruf in der letzten Stunde. Gibt die Anzahl
    /// entfernter Peers zurueck.
    pub fn bereinigen(&self) -> usize {
        self.bereinigen_at(Instant::now())
    }

    pub fn bereinigen_at(&self, jetzt: Instant) -> usize {
        Self::bereinigen_intern(&mut self.verlauf.lock(), jetzt)
    }

    fn bereinigen_intern(verlauf: &mut Verlauf, jetzt: Instant) -> usize {
        let vorher = verlauf.anrufe.len();
        verlauf.anrufe.retain(|_, zeiten| {
            kuerzen(zeiten, jetzt);
            !zeiten.is_empty()
        });
        verlauf.letzte_bereinigung = jetzt;

        let entfernt = vorher - verlauf.anrufe.len();
        if entfernt > 0 {
            tracing::debug!(entfernt, verbleibend = verlauf.anrufe.len(), "Inaktive Peers bereinigt");
        }
        entfernt
    }
}

/// Verwirft Zeitpunkte aelter als eine Stunde
fn kuerzen(zeiten: &mut VecDeque<Instant>, jetzt: Instant) {
    while let Some(aeltester) = zeiten.front() {
        if jetzt.saturating_duration_since(*aeltester) >= STUNDE {
            zeiten.pop_front();
        } else {
            break;
        }
    }
}

fn zaehle_seit(zeiten: &VecDeque<Instant>, jetzt: Instant, fenster: Duration) -> usize {
    zeiten
        .iter()
        .rev()
        .take_while(|t| jetzt.saturating_duration_since(**t) < fenster)
        .count()
}
