//! Gespraechsqualitaets-Metriken pro Anruf
//!
//! ## Gesammelte Metriken
//! - RTT aus Ping/Pong-Messungen (rollierendes Fenster, min/max/avg)
//! - Paketverlust aus Luecken in den Sequenznummern (modulo 65536)
//! - Bitrate als Naeherung: mittlere Frame-Groesse x 8 x 50 Frames/s
//! - Ein- und Ausgangspegel der Audio-Pipeline
//! - Jitter als Fuellstand des Jitter Buffers x Frame-Dauer
//!
//! ## Qualitaetsbewertung
//!
//! ```text
//! RTT   < 200ms -> 2   < 500ms -> 1   sonst 0
//! Loss  < 2%    -> 2   < 5%    -> 1   sonst 0
//! Mittel >= 1.5 Good, >= 0.5 Fair, sonst Poor
//! ```
//!
//! Ohne RTT-Messung oder mit weniger als 10 erwarteten Paketen bleibt die
//! Bewertung `Unknown`.
//!
//! `CallMetrics` ist nicht thread-safe; die Media Session haelt die
//! Metriken hinter einem Mutex.

use serde::Serialize;
use std::collections::VecDeque;

/// Groesse des RTT-Fensters
pub const RTT_FENSTER: usize = 100;

/// Groesse des Frame-Groessen-Fensters fuer die Bitrate
pub const BITRATE_FENSTER: usize = 50;

/// Nominale Frame-Rate (20ms-Frames)
pub const NOMINALE_FRAMES_PRO_SEKUNDE: f64 = 50.0;

/// Frame-Dauer in ms fuer die Jitter-Schaetzung
pub const FRAME_DAUER_MS: f64 = 20.0;

/// Mindestanzahl erwarteter Pakete fuer eine Bewertung
pub const MIN_ERWARTETE_PAKETE: u64 = 10;

// ---------------------------------------------------------------------------
// ConnectionQuality
// ---------------------------------------------------------------------------

/// Zusammengefasste Verbindungsqualitaet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Unveraenderlicher Metrik-Snapshot fuer die Oberflaeche
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMetricsSnapshot {
    pub rtt_min_ms: Option<f64>,
    pub rtt_max_ms: Option<f64>,
    pub rtt_avg_ms: Option<f64>,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_expected: u64,
    pub packets_lost: u64,
    pub loss_percentage: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bitrate_kbps: f64,
    pub input_level: f32,
    pub output_level: f32,
    pub jitter_ms: f64,
    pub quality: ConnectionQuality,
}

impl CallMetricsSnapshot {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        format!(
            "RTT={} Loss={:.1}% ({}/{}) Bitrate={:.1}kbps Jitter={:.0}ms Qualitaet={}",
            self.rtt_avg_ms
                .map(|r| format!("{r:.0}ms"))
                .unwrap_or_else(|| "-".into()),
            self.loss_percentage,
            self.packets_lost,
            self.packets_expected,
            self.bitrate_kbps,
            self.jitter_ms,
            self.quality,
        )
    }
}

// ---------------------------------------------------------------------------
// CallMetrics
// ---------------------------------------------------------------------------

/// Ab dieser Vorwaertsdistanz gilt ein Frame als verspaetet oder doppelt
const RUECKWAERTS_SCHWELLE: u16 = 0x8000;

/// Rollierende Qualitaetsmetriken einer Media Session
#[derive(Debug, Clone, Default)]
pub struct CallMetrics {
    rtt_samples: VecDeque<f64>,
    rtt_min: Option<f64>,
    rtt_max: Option<f64>,
    rtt_avg: Option<f64>,

    packets_sent: u64,
    packets_received: u64,
    packets_expected: u64,
    packets_lost: u64,
    last_seq_received: Option<u16>,

    bytes_sent: u64,
    bytes_received: u64,
    frame_groessen: VecDeque<usize>,

    input_level: f32,
    output_level: f32,
    jitter_ms: f64,
}

impl CallMetrics {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Neue RTT-Messung in ms
    pub fn record_rtt(&mut self, rtt_ms: f64) {
        if self.rtt_samples.len() >= RTT_FENSTER {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt_ms);
        self.rtt_min = Some(self.rtt_min.map_or(rtt_ms, |m| m.min(rtt_ms)));
        self.rtt_max = Some(self.rtt_max.map_or(rtt_ms, |m| m.max(rtt_ms)));
        self.rtt_avg =
            Some(self.rtt_samples.iter().sum::<f64>() / self.rtt_samples.len() as f64);
    }

    /// Gesendeter Audio-Frame der Groesse `groesse` Bytes
    pub fn record_packet_sent(&mut self, groesse: usize) {
        self.packets_sent += 1;
        self.bytes_sent += groesse as u64;
        if self.frame_groessen.len() >= BITRATE_FENSTER {
            self.frame_groessen.pop_front();
        }
        self.frame_groessen.push_back(groesse);
    }

    /// Empfangener Audio-Frame mit Sequenznummer
    ///
    /// Eine Luecke ist die Vorwaertsdistanz modulo 65536 zur erwarteten
    /// Sequenznummer und zaehlt sowohl als verloren als auch als erwartet.
    /// Liegt die Distanz in der hinteren Haelfte des Zahlenraums, ist der
    /// Frame verspaetet oder doppelt: er zaehlt nur als empfangen.
    pub fn record_packet_received(&mut self, seq: u16, groesse: usize) {
        self.packets_received += 1;
        self.bytes_received += groesse as u64;

        if let Some(letzte) = self.last_seq_received {
            let erwartet = letzte.wrapping_add(1);
            let distanz = seq.wrapping_sub(erwartet);
            if distanz >= RUECKWAERTS_SCHWELLE {
                tracing::trace!(seq, erwartet, "Verspaeteter oder doppelter Frame");
                return;
            }
            if distanz > 0 {
                let luecke = distanz as u64;
                tracing::trace!(seq, erwartet, luecke, "Sequenzluecke erkannt");
                self.packets_lost += luecke;
                self.packets_expected += luecke;
            }
        }

        self.last_seq_received = Some(seq);
        self.packets_expected += 1;
    }

    /// Aktualisiert die Audio-Pegel (0.0-1.0)
    pub fn set_levels(&mut self, eingang: f32, ausgang: f32) {
        self.input_level = eingang;
        self.output_level = ausgang;
    }

    /// Leitet den Jitter aus dem Fuellstand des Jitter Buffers ab
    pub fn set_buffer_depth(&mut self, fuellstand: usize) {
        self.jitter_ms = fuellstand as f64 * FRAME_DAUER_MS;
    }

    pub fn loss_percentage(&self) -> f64 {
        if self.packets_expected == 0 {
            return 0.0;
        }
        self.packets_lost as f64 / self.packets_expected as f64 * 100.0
    }

    /// Geschaetzte Sende-Bitrate in kbps
    pub fn bitrate_kbps(&self) -> f64 {
        if self.frame_groessen.is_empty() {
            return 0.0;
        }
        let mittel =
            self.frame_groessen.iter().sum::<usize>() as f64 / self.frame_groessen.len() as f64;
        mittel * 8.0 * NOMINALE_FRAMES_PRO_SEKUNDE / 1000.0
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        let Some(rtt) = self.rtt_avg else {
            return ConnectionQuality::Unknown;
        };
        if self.packets_expected < MIN_ERWARTETE_PAKETE {
            return ConnectionQuality::Unknown;
        }

        let rtt_punkte = if rtt < 200.0 {
            2
        } else if rtt < 500.0 {
            1
        } else {
            0
        };

        let verlust = self.loss_percentage();
        let verlust_punkte = if verlust < 2.0 {
            2
        } else if verlust < 5.0 {
            1
        } else {
            0
        };

        let gesamt = (rtt_punkte + verlust_punkte) as f64 / 2.0;
        if gesamt >= 1.5 {
            ConnectionQuality::Good
        } else if gesamt >= 0.5 {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    pub fn packets_expected(&self) -> u64 {
        self.packets_expected
    }

    pub fn snapshot(&self) -> CallMetricsSnapshot {
        CallMetricsSnapshot {
            rtt_min_ms: self.rtt_min,
            rtt_max_ms: self.rtt_max,
            rtt_avg_ms: self.rtt_avg,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_expected: self.packets_expected,
            packets_lost: self.packets_lost,
            loss_percentage: self.loss_percentage(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            bitrate_kbps: self.bitrate_kbps(),
            input_level: self.input_level,
            output_level: self.output_level,
            jitter_ms: self.jitter_ms,
            quality: self.connection_quality(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
