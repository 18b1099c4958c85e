//! Audio-Geraete
//!
//! Die Pipeline spricht Geraete nur ueber [`AudioEingang`] und
//! [`AudioAusgang`] an. Ein [`GeraeteBackend`] oeffnet sie innerhalb der
//! Audio-Threads, weil cpal-Streams je nach Plattform nicht `Send` sind.
//!
//! Mit Feature `geraete` steht das cpal-Backend zur Verfuegung, sonst
//! liefert [`standard_backend`] ein Backend ohne Geraete und die Pipeline
//! laeuft im Stub-Modus.

use std::sync::Arc;

use crate::error::{AudioError, AudioResult};

/// Mikrofon-Seite: liefert PCM-Frames
pub trait AudioEingang {
    /// Fuellt `frame` vollstaendig. Gibt `Ok(false)` zurueck, wenn innerhalb
    /// der internen Wartezeit nicht genug Samples anlagen; der Aufrufer
    /// prueft dann sein Stop-Flag und versucht es erneut.
    fn lesen(&mut self, frame: &mut [f32]) -> AudioResult<bool>;
}

/// Lautsprecher-Seite: nimmt PCM-Frames entgegen
pub trait AudioAusgang {
    fn schreiben(&mut self, frame: &[f32]) -> AudioResult<()>;
}

/// Oeffnet Ein- und Ausgabe fuer eine Abtastrate (Mono)
pub trait GeraeteBackend: Send + Sync {
    fn name(&self) -> &str;

    fn eingang_oeffnen(&self, abtastrate: u32) -> AudioResult<Box<dyn AudioEingang>>;

    fn ausgang_oeffnen(&self, abtastrate: u32) -> AudioResult<Box<dyn AudioAusgang>>;
}

/// Geraeteauswahl per Namensteil, `None` = Standardgeraet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeraeteAuswahl {
    pub eingang: Option<String>,
    pub ausgang: Option<String>,
}

/// Backend ohne Geraete, jeder Oeffnungsversuch schlaegt fehl
#[derive(Debug, Default)]
pub struct OhneGeraete;

impl GeraeteBackend for OhneGeraete {
    fn name(&self) -> &str {
        "ohne-geraete"
    }

    fn eingang_oeffnen(&self, _abtastrate: u32) -> AudioResult<Box<dyn AudioEingang>> {
        Err(AudioError::GeraetNichtGefunden(
            "Audio-Geraete nicht einkompiliert (Feature 'geraete')".into(),
        ))
    }

    fn ausgang_oeffnen(&self, _abtastrate: u32) -> AudioResult<Box<dyn AudioAusgang>> {
        Err(AudioError::GeraetNichtGefunden(
            "Audio-Geraete nicht einkompiliert (Feature 'geraete')".into(),
        ))
    }
}

/// Backend fuer den Normalbetrieb
#[cfg(feature = "geraete")]
pub fn standard_backend(auswahl: GeraeteAuswahl) -> Arc<dyn GeraeteBackend> {
    Arc::new(cpal_backend::CpalBackend::neu(auswahl))
}

/// Backend fuer den Normalbetrieb
#[cfg(not(feature = "geraete"))]
pub fn standard_backend(_auswahl: GeraeteAuswahl) -> Arc<dyn GeraeteBackend> {
    Arc::new(OhneGeraete)
}

#[cfg(feature = "geraete")]
pub use cpal_backend::{list_input_devices, list_output_devices, AudioDevice, CpalBackend};

#[cfg(feature = "geraete")]
mod cpal_backend {
    use std::time::{Duration, Instant};

    use cpal::traits::{DeviceTrait, HostTrait};
    use cpal::Device;
    use ringbuf::traits::{Consumer, Observer, Producer};
    use tracing::{debug, warn};

    use super::{AudioAusgang, AudioEingang, GeraeteAuswahl, GeraeteBackend};
    use crate::capture::{open_capture_stream, CaptureConfig, CaptureConsumer, CaptureStream};
    use crate::error::{AudioError, AudioResult};
    use crate::playback::{open_playback_stream, PlaybackConfig, PlaybackProducer, PlaybackStream};

    /// Maximale Wartezeit eines einzelnen Lesevorgangs
    const LESE_WARTEZEIT: Duration = Duration::from_millis(100);

    /// Repraesentiert ein Audio-Geraet mit seinen Eigenschaften
    #[derive(Debug, Clone)]
    pub struct AudioDevice {
        pub name: String,
        /// Unterstuetzte gaengige Abtastraten
        pub sample_rates: Vec<u32>,
        pub channels: u16,
    }

    pub struct CpalBackend {
        auswahl: GeraeteAuswahl,
    }

    impl CpalBackend {
        pub fn neu(auswahl: GeraeteAuswahl) -> Self {
            Self { auswahl }
        }
    }

    impl GeraeteBackend for CpalBackend {
        fn name(&self) -> &str {
            "cpal"
        }

        fn eingang_oeffnen(&self, abtastrate: u32) -> AudioResult<Box<dyn AudioEingang>> {
            let device = load_cpal_input_device(self.auswahl.eingang.as_deref())?;
            let config = CaptureConfig {
                sample_rate: abtastrate,
                ..Default::default()
            };
            let (stream, consumer) = open_capture_stream(&device, config)?;
            Ok(Box::new(CpalEingang {
                _stream: stream,
                consumer,
            }))
        }

        fn ausgang_oeffnen(&self, abtastrate: u32) -> AudioResult<Box<dyn AudioAusgang>> {
            let device = load_cpal_output_device(self.auswahl.ausgang.as_deref())?;
            let config = PlaybackConfig {
                sample_rate: abtastrate,
                ..Default::default()
            };
            let (stream, producer) = open_playback_stream(&device, config)?;
            Ok(Box::new(CpalAusgang {
                _stream: stream,
                producer,
            }))
        }
    }

    struct CpalEingang {
        _stream: CaptureStream,
        consumer: CaptureConsumer,
    }

    impl AudioEingang for CpalEingang {
        fn lesen(&mut self, frame: &mut [f32]) -> AudioResult<bool> {
            let frist = Instant::now() + LESE_WARTEZEIT;
            while self.consumer.occupied_len() < frame.len() {
                if Instant::now() >= frist {
                    return Ok(false);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            self.consumer.pop_slice(frame);
            Ok(true)
        }
    }

    struct CpalAusgang {
        _stream: PlaybackStream,
        producer: PlaybackProducer,
    }

    impl AudioAusgang for CpalAusgang {
        fn schreiben(&mut self, frame: &[f32]) -> AudioResult<()> {
            let geschrieben = self.producer.push_slice(frame);
            if geschrieben < frame.len() {
                debug!(verworfen = frame.len() - geschrieben, "Playback Ring-Buffer voll");
            }
            Ok(())
        }
    }

    /// Listet alle verfuegbaren Eingabegeraete auf
    pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
        let mut result = Vec::new();
        for device in devices {
            match device_beschreiben(&device) {
                Ok(ad) => result.push(ad),
                Err(e) => warn!("Eingabegeraet konnte nicht gelesen werden: {}", e),
            }
        }
        debug!("Gefundene Eingabegeraete: {}", result.len());
        Ok(result)
    }

    /// Listet alle verfuegbaren Ausgabegeraete auf
    pub fn list_output_devices() -> AudioResult<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
        let mut result = Vec::new();
        for device in devices {
            match device_beschreiben(&device) {
                Ok(ad) => result.push(ad),
                Err(e) => warn!("Ausgabegeraet konnte nicht gelesen werden: {}", e),
            }
        }
        debug!("Gefundene Ausgabegeraete: {}", result.len());
        Ok(result)
    }

    fn load_cpal_input_device(name: Option<&str>) -> AudioResult<Device> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_input_device()
                .ok_or(AudioError::KeinStandardEingabegeraet),
            Some(n) => host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
                .find(|d| d.name().map(|dn| dn.contains(n)).unwrap_or(false))
                .ok_or_else(|| AudioError::GeraetNichtGefunden(n.to_string())),
        }
    }

    fn load_cpal_output_device(name: Option<&str>) -> AudioResult<Device> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_output_device()
                .ok_or(AudioError::KeinStandardAusgabegeraet),
            Some(n) => host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
                .find(|d| d.name().map(|dn| dn.contains(n)).unwrap_or(false))
                .ok_or_else(|| AudioError::GeraetNichtGefunden(n.to_string())),
        }
    }

    fn device_beschreiben(device: &Device) -> AudioResult<AudioDevice> {
        let name = device
            .name()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        let mut sample_rates = Vec::new();
        let mut channels = 1u16;
        let mut erfassen = |min: u32, max: u32, ch: u16| {
            for rate in [8_000u32, 16_000, 24_000, 44_100, 48_000] {
                if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                    sample_rates.push(rate);
                }
            }
            channels = channels.max(ch);
        };

        if let Ok(configs) = device.supported_input_configs() {
            for cfg in configs {
                erfassen(cfg.min_sample_rate().0, cfg.max_sample_rate().0, cfg.channels());
            }
        }
        if let Ok(configs) = device.supported_output_configs() {
            for cfg in configs {
                erfassen(cfg.min_sample_rate().0, cfg.max_sample_rate().0, cfg.channels());
            }
        }
        sample_rates.sort_unstable();

        Ok(AudioDevice {
            name,
            sample_rates,
            channels,
        })
    }
}
