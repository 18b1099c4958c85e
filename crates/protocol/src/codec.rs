//! Codec-Konfiguration und Codec-Aushandlung
//!
//! Zwei Codecs werden unterstuetzt:
//! - **Opus**: variable Bitrate, 48 kHz, fuer normale Verbindungen
//! - **Codec2**: sehr niedrige Bitrate, fest 8 kHz, fuer schmalbandige
//!   Mesh-Funkstrecken. Der Codec2-"Modus" entspricht direkt der Bitrate.
//!
//! ## Aushandlung
//!
//! ```text
//! remote fehlt                  -> lokale Werte
//! genau eine Seite codec2       -> codec2 (unabhaengig von der Bitrate)
//! sonst                         -> niedrigere Bitrate, Gleichstand: lokal
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Frame-Dauer in Millisekunden (fuer beide Codecs)
pub const FRAME_MS: u32 = 20;

/// Abtastrate fuer Opus
pub const OPUS_ABTASTRATE: u32 = 48_000;

/// Feste Abtastrate von Codec2
pub const CODEC2_ABTASTRATE: u32 = 8_000;

/// Standard-Bitrate fuer Opus in bps
pub const OPUS_STANDARD_BITRATE: u32 = 24_000;

/// Standard-Komplexitaet des Opus-Encoders
pub const OPUS_STANDARD_KOMPLEXITAET: u8 = 10;

/// Standard-Modus fuer Codec2 (= bps)
pub const CODEC2_STANDARD_MODUS: u32 = 3_200;

/// Gueltige Codec2-Modi in bps
pub const CODEC2_MODI: [u32; 7] = [3200, 2400, 1600, 1400, 1300, 1200, 700];

// ---------------------------------------------------------------------------
// CodecType
// ---------------------------------------------------------------------------

/// Audio-Codec einer Verbindung
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    /// Opus (Vollband, variable Bitrate)
    #[default]
    Opus,
    /// Codec2 (Schmalband-Sprachcodec)
    Codec2,
}

impl CodecType {
    /// Name wie auf dem Draht verwendet
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Codec2 => "codec2",
        }
    }

    /// Gibt true zurueck fuer den Schmalband-Codec
    pub fn ist_schmalband(&self) -> bool {
        matches!(self, Self::Codec2)
    }

    /// Abtastrate des Codecs in Hz
    pub fn abtastrate(&self) -> u32 {
        match self {
            Self::Opus => OPUS_ABTASTRATE,
            Self::Codec2 => CODEC2_ABTASTRATE,
        }
    }

    /// Samples pro 20ms-Frame
    pub fn samples_pro_frame(&self) -> usize {
        (self.abtastrate() * FRAME_MS / 1000) as usize
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(Self::Opus),
            "codec2" => Ok(Self::Codec2),
            anders => Err(format!("Unbekannter Codec: {anders}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Aushandlung
// ---------------------------------------------------------------------------

/// Ergebnis einer Codec-Aushandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedCodec {
    pub codec: CodecType,
    /// Bitrate in bps (bei Codec2 identisch mit dem Modus)
    pub bitrate: u32,
}

impl NegotiatedCodec {
    pub fn neu(codec: CodecType, bitrate: u32) -> Self {
        Self { codec, bitrate }
    }
}

/// Bildet den nativen Parameter eines Codecs auf bps ab.
///
/// Fuer beide unterstuetzten Codecs ein Durchreichen: Opus wird in bps
/// konfiguriert, der Codec2-Modus ist bereits die Bitrate.
pub fn normalize_codec_bitrate(codec: CodecType, wert: u32) -> u32 {
    match codec {
        CodecType::Opus => wert,
        CodecType::Codec2 => wert,
    }
}

/// Handelt Codec und Bitrate zwischen lokaler und entfernter Seite aus.
///
/// Fehlt eine der entfernten Angaben, gelten die lokalen Werte. Gibt genau
/// eine Seite Codec2 an, gewinnt Codec2 unabhaengig von der Bitrate.
/// Ansonsten gewinnt die niedrigere normalisierte Bitrate, bei Gleichstand
/// die lokale Seite.
pub fn negotiate_codec(
    lokal_typ: CodecType,
    lokal_rate: u32,
    remote_typ: Option<CodecType>,
    remote_rate: Option<u32>,
) -> NegotiatedCodec {
    let lokal = NegotiatedCodec::neu(lokal_typ, lokal_rate);
    let (Some(remote_typ), Some(remote_rate)) = (remote_typ, remote_rate) else {
        return lokal;
    };
    let remote = NegotiatedCodec::neu(remote_typ, remote_rate);

    match (lokal_typ.ist_schmalband(), remote_typ.ist_schmalband()) {
        (true, false) => return lokal,
        (false, true) => return remote,
        _ => {}
    }

    if normalize_codec_bitrate(lokal_typ, lokal_rate)
        <= normalize_codec_bitrate(remote_typ, remote_rate)
    {
        lokal
    } else {
        remote
    }
}

// ---------------------------------------------------------------------------
// Lokale Codec-Einstellungen
// ---------------------------------------------------------------------------

/// Lokale Codec-Voreinstellungen eines Knotens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecEinstellungen {
    /// Bevorzugter Codec
    pub codec: CodecType,
    /// Opus-Bitrate in bps (6000-510000)
    pub opus_bitrate: u32,
    /// Opus-Encoder-Komplexitaet (0-10)
    pub opus_komplexitaet: u8,
    /// Codec2-Modus in bps
    pub codec2_modus: u32,
}

impl Default for CodecEinstellungen {
    fn default() -> Self {
        Self {
            codec: CodecType::Opus,
            opus_bitrate: OPUS_STANDARD_BITRATE,
            opus_komplexitaet: OPUS_STANDARD_KOMPLEXITAET,
            codec2_modus: CODEC2_STANDARD_MODUS,
        }
    }
}

impl CodecEinstellungen {
    /// Validiert die Einstellungen
    pub fn validieren(&self) -> Result<(), String> {
        if !(6_000..=510_000).contains(&self.opus_bitrate) {
            return Err(format!(
                "Opus-Bitrate muss zwischen 6000 und 510000 bps liegen (war: {})",
                self.opus_bitrate
            ));
        }
        if self.opus_komplexitaet > 10 {
            return Err(format!(
                "Opus-Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.opus_komplexitaet
            ));
        }
        if !CODEC2_MODI.contains(&self.codec2_modus) {
            return Err(format!(
                "Ungueltiger Codec2-Modus: {} (erlaubt: {:?})",
                self.codec2_modus, CODEC2_MODI
            ));
        }
        Ok(())
    }

    /// Bitrate des bevorzugten Codecs (Angebot fuer die Aushandlung)
    pub fn angebot(&self) -> NegotiatedCodec {
        let bitrate = match self.codec {
            CodecType::Opus => self.opus_bitrate,
            CodecType::Codec2 => self.codec2_modus,
        };
        NegotiatedCodec::neu(self.codec, bitrate)
    }

    /// Uebernimmt ein Aushandlungsergebnis in die Einstellungen
    pub fn mit_aushandlung(&self, ergebnis: NegotiatedCodec) -> Self {
        let mut neu = self.clone();
        neu.codec = ergebnis.codec;
        match ergebnis.codec {
            CodecType::Opus => neu.opus_bitrate = ergebnis.bitrate,
            CodecType::Codec2 => neu.codec2_modus = ergebnis.bitrate,
        }
        neu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec2_gewinnt_immer() {
        assert_eq!(
            negotiate_codec(CodecType::Codec2, 1200, Some(CodecType::Opus), Some(64_000)),
            NegotiatedCodec::neu(CodecType::Codec2, 1200)
        );
        assert_eq!(
            negotiate_codec(CodecType::Opus, 64_000, Some(CodecType::Codec2), Some(700)),
            NegotiatedCodec::neu(CodecType::Codec2, 700)
        );
        // Auch wenn Codec2 numerisch hoeher waere
        assert_eq!(
            negotiate_codec(CodecType::Opus, 1_000, Some(CodecType::Codec2), Some(3_200)),
            NegotiatedCodec::neu(CodecType::Codec2, 3_200)
        );
    }

    #[test]
    fn niedrigere_bitrate_gewinnt() {
        assert_eq!(
            negotiate_codec(CodecType::Opus, 32_000, Some(CodecType::Opus), Some(16_000)),
            NegotiatedCodec::neu(CodecType::Opus, 16_000)
        );
        assert_eq!(
            negotiate_codec(CodecType::Codec2, 1_200, Some(CodecType::Codec2), Some(3_200)),
            NegotiatedCodec::neu(CodecType::Codec2, 1_200)
        );
    }

    #[test]
    fn gleichstand_bevorzugt_lokal() {
        let ergebnis =
            negotiate_codec(CodecType::Opus, 24_000, Some(CodecType::Opus), Some(24_000));
        assert_eq!(ergebnis, NegotiatedCodec::neu(CodecType::Opus, 24_000));
    }

    #[test]
    fn fehlende_remote_werte_ergeben_lokal() {
        let lokal = NegotiatedCodec::neu(CodecType::Opus, 48_000);
        assert_eq!(negotiate_codec(CodecType::Opus, 48_000, None, None), lokal);
        assert_eq!(
            negotiate_codec(CodecType::Opus, 48_000, Some(CodecType::Codec2), None),
            lokal
        );
        assert_eq!(negotiate_codec(CodecType::Opus, 48_000, None, Some(700)), lokal);
    }

    #[test]
    fn codec_typ_aus_string() {
        assert_eq!("opus".parse::<CodecType>().unwrap(), CodecType::Opus);
        assert_eq!("Codec2".parse::<CodecType>().unwrap(), CodecType::Codec2);
        assert!("speex".parse::<CodecType>().is_err());
    }

    #[test]
    fn frame_groessen() {
        assert_eq!(CodecType::Opus.samples_pro_frame(), 960);
        assert_eq!(CodecType::Codec2.samples_pro_frame(), 160);
    }

    #[test]
    fn einstellungen_validierung() {
        assert!(CodecEinstellungen::default().validieren().is_ok());

        let mut e = CodecEinstellungen::default();
        e.opus_bitrate = 1_000;
        assert!(e.validieren().is_err());

        let mut e = CodecEinstellungen::default();
        e.codec2_modus = 4_800;
        assert!(e.validieren().is_err());

        let mut e = CodecEinstellungen::default();
        e.opus_komplexitaet = 11;
        assert!(e.validieren().is_err());
    }

    #[test]
    fn aushandlung_uebernehmen() {
        let basis = CodecEinstellungen::default();
        let neu = basis.mit_aushandlung(NegotiatedCodec::neu(CodecType::Codec2, 1_200));
        assert_eq!(neu.codec, CodecType::Codec2);
        assert_eq!(neu.codec2_modus, 1_200);
        assert_eq!(neu.opus_bitrate, basis.opus_bitrate);
        assert_eq!(neu.angebot(), NegotiatedCodec::neu(CodecType::Codec2, 1_200));
    }
}
