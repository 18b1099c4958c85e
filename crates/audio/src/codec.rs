//! Sprach-Codecs
//!
//! Einheitliche f32-PCM API fuer Opus (Breitband, variable Bitrate) und
//! Codec2 (Schmalband, feste Modi). Encoder und Decoder sind getrennte
//! Objekte, weil sie in verschiedenen Threads laufen: der Encoder im
//! Capture-Thread, der Decoder im Empfangspfad.
//!
//! Ohne das jeweilige Cargo-Feature liefert [`codec_erstellen`]
//! `AudioError::CodecNichtVerfuegbar`, die Pipeline laeuft dann im
//! Stub-Modus.

use meshcall_protocol::{CodecEinstellungen, CodecType, FRAME_MS};

use crate::error::{AudioError, AudioResult};

/// Kodiert PCM-Frames fester Groesse
pub trait SprachEncoder: Send {
    fn codec_type(&self) -> CodecType;

    /// Abtastrate in Hz
    fn abtastrate(&self) -> u32;

    /// Erwartete Frame-Groesse in Samples
    fn frame_groesse(&self) -> usize;

    /// Kodiert genau einen Frame (`frame_groesse()` Samples, -1.0..1.0)
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>>;
}

/// Dekodiert einzelne Frames zu PCM
pub trait SprachDecoder: Send {
    fn codec_type(&self) -> CodecType;

    fn abtastrate(&self) -> u32;

    fn frame_groesse(&self) -> usize;

    fn decode(&mut self, daten: &[u8]) -> AudioResult<Vec<f32>>;
}

/// Encoder/Decoder-Paar fuer einen Anruf
pub struct CodecPaar {
    pub encoder: Box<dyn SprachEncoder>,
    pub decoder: Box<dyn SprachDecoder>,
}

impl CodecPaar {
    pub fn neu(encoder: Box<dyn SprachEncoder>, decoder: Box<dyn SprachDecoder>) -> Self {
        Self { encoder, decoder }
    }

    pub fn codec_type(&self) -> CodecType {
        self.encoder.codec_type()
    }

    pub fn abtastrate(&self) -> u32 {
        self.encoder.abtastrate()
    }

    pub fn frame_groesse(&self) -> usize {
        self.encoder.frame_groesse()
    }

    /// Frame-Dauer in Millisekunden
    pub fn frame_ms(&self) -> u64 {
        let rate = self.abtastrate().max(1) as u64;
        (self.frame_groesse() as u64 * 1_000 / rate).max(1)
    }
}

/// Erstellt Encoder und Decoder fuer die gegebenen Einstellungen.
///
/// Codec2 erzwingt 8 kHz und die vom Modus abhaengige Frame-Groesse.
pub fn codec_erstellen(einstellungen: &CodecEinstellungen) -> AudioResult<CodecPaar> {
    einstellungen
        .validieren()
        .map_err(AudioError::Konfiguration)?;

    match einstellungen.codec {
        CodecType::Opus => opus_erstellen(einstellungen),
        CodecType::Codec2 => codec2_erstellen(einstellungen),
    }
}

/// Frame-Groesse eines Codecs bei 20 ms Frames
pub fn standard_frame_groesse(codec: CodecType) -> usize {
    (codec.abtastrate() * FRAME_MS / 1_000) as usize
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

#[cfg(feature = "opus")]
fn opus_erstellen(einstellungen: &CodecEinstellungen) -> AudioResult<CodecPaar> {
    let encoder = opus::OpusEncoder::neu(einstellungen.opus_bitrate, einstellungen.opus_komplexitaet)?;
    let decoder = opus::OpusDecoder::neu()?;
    Ok(CodecPaar::neu(Box::new(encoder), Box::new(decoder)))
}

#[cfg(not(feature = "opus"))]
fn opus_erstellen(_einstellungen: &CodecEinstellungen) -> AudioResult<CodecPaar> {
    Err(AudioError::CodecNichtVerfuegbar(
        "opus (Feature 'opus' nicht aktiviert)".into(),
    ))
}

#[cfg(feature = "opus")]
mod opus {
    use audiopus::{
        coder::{Decoder, Encoder},
        Application, Bitrate, Channels, SampleRate,
    };
    use meshcall_protocol::{CodecType, OPUS_ABTASTRATE};
    use tracing::debug;

    use super::{standard_frame_groesse, SprachDecoder, SprachEncoder};
    use crate::error::{AudioError, AudioResult};

    /// Groesster moeglicher Opus-Frame
    const MAX_PAKET: usize = 4_000;

    pub struct OpusEncoder {
        encoder: Encoder,
        frame_groesse: usize,
    }

    impl OpusEncoder {
        pub fn neu(bitrate: u32, komplexitaet: u8) -> AudioResult<Self> {
            let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

            encoder
                .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

            // audiopus 0.2 erwartet u8
            encoder
                .set_complexity(komplexitaet)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

            let frame_groesse = standard_frame_groesse(CodecType::Opus);
            debug!(bitrate, komplexitaet, frame_groesse, "OpusEncoder erstellt");

            Ok(Self {
                encoder,
                frame_groesse,
            })
        }
    }

    impl SprachEncoder for OpusEncoder {
        fn codec_type(&self) -> CodecType {
            CodecType::Opus
        }

        fn abtastrate(&self) -> u32 {
            OPUS_ABTASTRATE
        }

        fn frame_groesse(&self) -> usize {
            self.frame_groesse
        }

        fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
            if pcm.len() != self.frame_groesse {
                return Err(AudioError::CodecFehler(format!(
                    "PCM-Frame muss {} Samples lang sein, war {}",
                    self.frame_groesse,
                    pcm.len()
                )));
            }
            let mut output = vec![0u8; MAX_PAKET];
            let geschrieben = self
                .encoder
                .encode_float(pcm, &mut output)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            output.truncate(geschrieben);
            Ok(output)
        }
    }

    pub struct OpusDecoder {
        decoder: Decoder,
        frame_groesse: usize,
    }

    impl OpusDecoder {
        pub fn neu() -> AudioResult<Self> {
            let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            Ok(Self {
                decoder,
                frame_groesse: standard_frame_groesse(CodecType::Opus),
            })
        }
    }

    impl SprachDecoder for OpusDecoder {
        fn codec_type(&self) -> CodecType {
            CodecType::Opus
        }

        fn abtastrate(&self) -> u32 {
            OPUS_ABTASTRATE
        }

        fn frame_groesse(&self) -> usize {
            self.frame_groesse
        }

        fn decode(&mut self, daten: &[u8]) -> AudioResult<Vec<f32>> {
            let mut output = vec![0.0f32; self.frame_groesse];
            let dekodiert = self
                .decoder
                .decode_float(Some(daten), &mut output, false)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            output.truncate(dekodiert);
            Ok(output)
        }
    }
}

// ---------------------------------------------------------------------------
// Codec2
// ---------------------------------------------------------------------------

#[cfg(feature = "codec2")]
fn codec2_erstellen(einstellungen: &CodecEinstellungen) -> AudioResult<CodecPaar> {
    let modus = einstellungen.codec2_modus;
    let encoder = schmalband::Codec2Encoder::neu(modus)?;
    let decoder = schmalband::Codec2Decoder::neu(modus)?;
    Ok(CodecPaar::neu(Box::new(encoder), Box::new(decoder)))
}

#[cfg(not(feature = "codec2"))]
fn codec2_erstellen(_einstellungen: &CodecEinstellungen) -> AudioResult<CodecPaar> {
    Err(AudioError::CodecNichtVerfuegbar(
        "codec2 (Feature 'codec2' nicht aktiviert)".into(),
    ))
}

#[cfg(feature = "codec2")]
mod schmalband {
    use codec2::{Codec2, Codec2Mode};
    use meshcall_protocol::{CodecType, CODEC2_ABTASTRATE};
    use tracing::{debug, warn};

    use super::{f32_zu_i16, i16_zu_f32, SprachDecoder, SprachEncoder};
    use crate::error::{AudioError, AudioResult};

    fn modus(bitrate: u32) -> Codec2Mode {
        match bitrate {
            3200 => Codec2Mode::MODE_3200,
            2400 => Codec2Mode::MODE_2400,
            1600 => Codec2Mode::MODE_1600,
            1400 => Codec2Mode::MODE_1400,
            1300 => Codec2Mode::MODE_1300,
            1200 => Codec2Mode::MODE_1200,
            andere => {
                // 700C fehlt in der Rust-Implementierung
                warn!(modus = andere, "Codec2-Modus nicht verfuegbar, nutze 1200");
                Codec2Mode::MODE_1200
            }
        }
    }

    pub struct Codec2Encoder {
        codec: Codec2,
        bits: Vec<u8>,
        samples: Vec<i16>,
    }

    impl Codec2Encoder {
        pub fn neu(bitrate: u32) -> AudioResult<Self> {
            let codec = Codec2::new(modus(bitrate));
            let bytes = codec.bits_per_frame().div_ceil(8);
            let samples = codec.samples_per_frame();
            debug!(bitrate, samples, bytes, "Codec2Encoder erstellt");
            Ok(Self {
                codec,
                bits: vec![0u8; bytes],
                samples: vec![0i16; samples],
            })
        }
    }

    impl SprachEncoder for Codec2Encoder {
        fn codec_type(&self) -> CodecType {
            CodecType::Codec2
        }

        fn abtastrate(&self) -> u32 {
            CODEC2_ABTASTRATE
        }

        fn frame_groesse(&self) -> usize {
            self.samples.len()
        }

        fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
            if pcm.len() != self.samples.len() {
                return Err(AudioError::CodecFehler(format!(
                    "PCM-Frame muss {} Samples lang sein, war {}",
                    self.samples.len(),
                    pcm.len()
                )));
            }
            f32_zu_i16(pcm, &mut self.samples);
            self.codec.encode(&mut self.bits, &self.samples);
            Ok(self.bits.clone())
        }
    }

    pub struct Codec2Decoder {
        codec: Codec2,
        bytes: usize,
        samples: Vec<i16>,
    }

    impl Codec2Decoder {
        pub fn neu(bitrate: u32) -> AudioResult<Self> {
            let codec = Codec2::new(modus(bitrate));
            let bytes = codec.bits_per_frame().div_ceil(8);
            let samples = vec![0i16; codec.samples_per_frame()];
            Ok(Self {
                codec,
                bytes,
                samples,
            })
        }
    }

    impl SprachDecoder for Codec2Decoder {
        fn codec_type(&self) -> CodecType {
            CodecType::Codec2
        }

        fn abtastrate(&self) -> u32 {
            CODEC2_ABTASTRATE
        }

        fn frame_groesse(&self) -> usize {
            self.samples.len()
        }

        fn decode(&mut self, daten: &[u8]) -> AudioResult<Vec<f32>> {
            if daten.len() < self.bytes {
                return Err(AudioError::CodecFehler(format!(
                    "Codec2-Frame zu kurz: {} statt {} Bytes",
                    daten.len(),
                    self.bytes
                )));
            }
            self.codec.decode(&mut self.samples, &daten[..self.bytes]);
            let mut pcm = vec![0.0f32; self.samples.len()];
            i16_zu_f32(&self.samples, &mut pcm);
            Ok(pcm)
        }
    }
}

// ---------------------------------------------------------------------------
// Sample-Konvertierung
// ---------------------------------------------------------------------------

/// f32 (-1.0..1.0) nach i16, mit Begrenzung
pub fn f32_zu_i16(eingabe: &[f32], ausgabe: &mut [i16]) {
    for (out, s) in ausgabe.iter_mut().zip(eingabe) {
        *out = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

pub fn i16_zu_f32(eingabe: &[i16], ausgabe: &mut [f32]) {
    for (out, s) in ausgabe.iter_mut().zip(eingabe) {
        *out = *s as f32 / i16::MAX as f32;
    }
}

/// Effektivwert eines Frames
pub fn rms(pcm: &[f32]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let summe: f32 = pcm.iter().map(|s| s * s).sum();
    (summe / pcm.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_groessen() {
        assert_eq!(standard_frame_groesse(CodecType::Opus), 960);
        assert_eq!(standard_frame_groesse(CodecType::Codec2), 160);
    }

    #[test]
    fn rms_werte() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 160]), 0.0);
        let voll = rms(&[1.0, -1.0, 1.0, -1.0]);
        assert!((voll - 1.0).abs() < 1e-6);
        let halb = rms(&[0.5; 10]);
        assert!((halb - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sample_konvertierung_begrenzt() {
        let mut out = [0i16; 3];
        f32_zu_i16(&[2.0, -2.0, 0.0], &mut out);
        assert_eq!(out, [i16::MAX, i16::MIN, 0]);

        let mut zurueck = [0.0f32; 1];
        i16_zu_f32(&[i16::MAX], &mut zurueck);
        assert!((zurueck[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ungueltige_einstellungen_abgelehnt() {
        let einstellungen = CodecEinstellungen {
            codec2_modus: 999,
            codec: CodecType::Codec2,
            ..Default::default()
        };
        assert!(matches!(
            codec_erstellen(&einstellungen),
            Err(AudioError::Konfiguration(_))
        ));
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn ohne_opus_feature_nicht_verfuegbar() {
        let err = codec_erstellen(&CodecEinstellungen::default()).err();
        assert!(matches!(err, Some(AudioError::CodecNichtVerfuegbar(_))));
    }

    #[cfg(feature = "opus")]
    #[test]
    fn opus_kodiert_stille() {
        let mut paar = codec_erstellen(&CodecEinstellungen::default()).unwrap();
        assert_eq!(paar.frame_ms(), 20);
        let paket = paar.encoder.encode(&vec![0.0; 960]).unwrap();
        assert!(!paket.is_empty());
        let pcm = paar.decoder.decode(&paket).unwrap();
        assert_eq!(pcm.len(), 960);
    }

    #[cfg(feature = "codec2")]
    #[test]
    fn codec2_erzwingt_8khz() {
        let einstellungen = CodecEinstellungen {
            codec: CodecType::Codec2,
            ..Default::default()
        };
        let mut paar = codec_erstellen(&einstellungen).unwrap();
        assert_eq!(paar.abtastrate(), 8_000);
        assert_eq!(paar.frame_groesse(), 160);
        let paket = paar.encoder.encode(&vec![0.0; 160]).unwrap();
        assert_eq!(paket.len(), 8);
        assert_eq!(paar.decoder.decode(&paket).unwrap().len(), 160);
    }
}
