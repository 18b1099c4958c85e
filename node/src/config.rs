//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Knoten ohne Konfigurationsdatei
//! lauffaehig ist.

use std::time::Duration;

use anyhow::{anyhow, bail};
use meshcall_audio::{GeraeteAuswahl, PipelineKonfig};
use meshcall_media::{IdentityKey, SessionKonfig};
use meshcall_observability::{log_format_gueltig, log_level_gueltig};
use meshcall_protocol::CodecEinstellungen;
use meshcall_signaling::{FilterKonfig, RateLimitKonfig};
use serde::{Deserialize, Serialize};

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identitaet und Anzeigename
    pub identitaet: IdentitaetEinstellungen,
    /// Codec-Voreinstellungen
    pub codec: CodecEinstellungen,
    /// Audio- und Session-Einstellungen
    pub audio: AudioEinstellungen,
    /// Anruflimits pro Peer
    pub rate_limit: RateLimitEinstellungen,
    /// Nachrichtenfilter
    pub filter: FilterEinstellungen,
    /// Gesperrte und verifizierte Peers
    pub peers: PeerEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Demo-Ablauf
    pub demo: DemoEinstellungen,
}

/// Identitaet des Knotens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitaetEinstellungen {
    /// Anzeigename in Announces und Einladungen
    pub display_name: String,
    /// Oeffentlicher Identitaetsschluessel (base64), fehlt = zufaellig
    pub identity_key: Option<String>,
}

impl Default for IdentitaetEinstellungen {
    fn default() -> Self {
        Self {
            display_name: "Meshcall Knoten".into(),
            identity_key: None,
        }
    }
}

/// Audio- und Session-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// `false` = Anrufe ohne Ton (Stub-Pipeline)
    pub aktiviert: bool,
    /// Ziel-Verzoegerung des Jitter Buffers in Millisekunden
    pub jitter_ziel_ms: u64,
    /// Maximale Anzahl gepufferter Frames
    pub jitter_kapazitaet: usize,
    /// Maximale Dauer des Link-Aufbaus in Sekunden
    pub handshake_timeout_s: u64,
    /// Intervall der Link-Status-Logs in Sekunden
    pub status_intervall_s: u64,
    /// Laenge des SAS in Ziffern (1-9)
    pub sas_laenge: usize,
    /// Eingabegeraet (Namensteil, leer = Standard)
    pub eingabegeraet: Option<String>,
    /// Ausgabegeraet (Namensteil, leer = Standard)
    pub ausgabegeraet: Option<String>,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            jitter_ziel_ms: 60,
            jitter_kapazitaet: 200,
            handshake_timeout_s: 30,
            status_intervall_s: 2,
            sas_laenge: 4,
            eingabegeraet: None,
            ausgabegeraet: None,
        }
    }
}

/// Anruflimits pro Peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitEinstellungen {
    pub pro_minute: u32,
    pub pro_stunde: u32,
    /// Abstand der Bereinigungslaeufe in Sekunden
    pub bereinigung_s: u64,
}

impl Default for RateLimitEinstellungen {
    fn default() -> Self {
        Self {
            pro_minute: 5,
            pro_stunde: 20,
            bereinigung_s: 300,
        }
    }
}

/// Nachrichtenfilter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterEinstellungen {
    /// Duplikatfenster in Sekunden
    pub dedup_fenster_s: f64,
    /// Abstand der Bereinigungslaeufe in Sekunden
    pub bereinigung_s: u64,
}

impl Default for FilterEinstellungen {
    fn default() -> Self {
        Self {
            dedup_fenster_s: 1.0,
            bereinigung_s: 60,
        }
    }
}

/// Bekannte Peers (hex-kodierte Identitaets-Hashes)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerEinstellungen {
    pub gesperrt: Vec<String>,
    pub verifiziert: Vec<String>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Ablauf der Demo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoEinstellungen {
    /// Gespraechsdauer in Sekunden, danach wird aufgelegt
    pub dauer_s: u64,
    /// Intervall der Metrik-Ausgabe in Sekunden
    pub metrik_intervall_s: u64,
}

impl Default for DemoEinstellungen {
    fn default() -> Self {
        Self {
            dauer_s: 10,
            metrik_intervall_s: 2,
        }
    }
}

impl NodeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}")),
        }
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Prueft Wertebereiche, die serde nicht abdeckt
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.codec.validieren().map_err(|e| anyhow!(e))?;

        if !(1..=9).contains(&self.audio.sas_laenge) {
            bail!(
                "SAS-Laenge muss zwischen 1 und 9 liegen (war: {})",
                self.audio.sas_laenge
            );
        }
        if self.audio.jitter_kapazitaet == 0 {
            bail!("Jitter-Kapazitaet muss groesser als 0 sein");
        }
        if self.audio.handshake_timeout_s == 0 {
            bail!("Handshake-Timeout muss groesser als 0 sein");
        }
        if self.rate_limit.pro_minute == 0 || self.rate_limit.pro_stunde == 0 {
            bail!("Anruflimits muessen groesser als 0 sein");
        }
        if !self.filter.dedup_fenster_s.is_finite() || self.filter.dedup_fenster_s < 0.0 {
            bail!(
                "Duplikatfenster ungueltig: {}",
                self.filter.dedup_fenster_s
            );
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiger Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format: {}", self.logging.format);
        }
        Ok(())
    }

    /// Identitaetsschluessel aus der Konfiguration oder ein neuer
    pub fn identitaet_schluessel(&self) -> anyhow::Result<IdentityKey> {
        match &self.identitaet.identity_key {
            Some(kodiert) => Ok(IdentityKey::from_base64(kodiert)?),
            None => Ok(IdentityKey::zufaellig()),
        }
    }

    pub fn session_konfig(&self) -> SessionKonfig {
        SessionKonfig {
            handshake_timeout: Duration::from_secs(self.audio.handshake_timeout_s),
            status_intervall: Duration::from_secs(self.audio.status_intervall_s.max(1)),
            sas_laenge: self.audio.sas_laenge,
            audio_aktiv: self.audio.aktiviert,
            pipeline: PipelineKonfig {
                ziel_verzoegerung_ms: self.audio.jitter_ziel_ms,
                jitter_kapazitaet: self.audio.jitter_kapazitaet,
                ..PipelineKonfig::default()
            },
            geraete: GeraeteAuswahl {
                eingang: self.audio.eingabegeraet.clone(),
                ausgang: self.audio.ausgabegeraet.clone(),
            },
        }
    }

    pub fn rate_limit_konfig(&self) -> RateLimitKonfig {
        RateLimitKonfig {
            max_calls_per_minute: self.rate_limit.pro_minute,
            max_calls_per_hour: self.rate_limit.pro_stunde,
            bereinigungs_intervall: Duration::from_secs(self.rate_limit.bereinigung_s),
        }
    }

    pub fn filter_konfig(&self) -> FilterKonfig {
        FilterKonfig {
            dedup_fenster: Duration::from_secs_f64(self.filter.dedup_fenster_s),
            bereinigungs_intervall: Duration::from_secs(self.filter.bereinigung_s),
        }
    }
}
