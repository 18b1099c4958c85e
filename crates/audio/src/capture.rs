//! Mikrofon-Capture via cpal
//!
//! Oeffnet einen cpal InputStream und schreibt Mono-Samples in einen
//! lock-free Ring-Buffer. Mehrkanalige Geraete werden im Callback auf
//! Mono heruntergemischt.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, trace};

use crate::error::{AudioError, AudioResult};

/// Konfiguration fuer den Audio-Capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Abtastrate in Hz (48000 fuer Opus, 8000 fuer Codec2)
    pub sample_rate: u32,
    /// Ring-Buffer Kapazitaet in Samples
    pub buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 48_000, // 1 Sekunde
        }
    }
}

pub type CaptureProducer = HeapProd<f32>;
pub type CaptureConsumer = HeapCons<f32>;

/// Haelt den cpal-Stream am Leben, beim Drop endet die Aufnahme
pub struct CaptureStream {
    _stream: Stream,
    config: CaptureConfig,
    kanaele: u16,
}

impl CaptureStream {
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Kanalanzahl des Geraets vor dem Heruntermischen
    pub fn geraete_kanaele(&self) -> u16 {
        self.kanaele
    }
}

/// Mischt verschachtelte Samples auf Mono und schiebt sie in den Puffer
fn mono_schieben<S: Copy>(
    producer: &mut CaptureProducer,
    data: &[S],
    kanaele: usize,
    wandeln: impl Fn(S) -> f32,
) {
    let kanaele = kanaele.max(1);
    let mut verworfen = 0usize;
    for frame in data.chunks(kanaele) {
        let summe: f32 = frame.iter().map(|s| wandeln(*s)).sum();
        if producer.try_push(summe / frame.len() as f32).is_err() {
            verworfen += 1;
        }
    }
    if verworfen > 0 {
        trace!(verworfen, "Capture Ring-Buffer voll");
    }
}

/// Oeffnet einen Capture-Stream auf dem gegebenen Geraet
pub fn open_capture_stream(
    device: &Device,
    config: CaptureConfig,
) -> AudioResult<(CaptureStream, CaptureConsumer)> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
        })
        .ok_or_else(|| {
            AudioError::StreamFehler(format!(
                "Eingabegeraet unterstuetzt {} Hz nicht",
                config.sample_rate
            ))
        })?;

    let kanaele = supported.channels();
    let sample_format = supported.sample_format();
    let stream_config = StreamConfig {
        channels: kanaele,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let rb = HeapRb::<f32>::new(config.buffer_size);
    let (mut producer, consumer) = rb.split();
    let n = kanaele as usize;
    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| mono_schieben(&mut producer, data, n, |s| s),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                mono_schieben(&mut producer, data, n, |s| s as f32 / i16::MAX as f32)
            },
            err_fn,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &stream_config,
            move |data: &[u8], _| {
                mono_schieben(&mut producer, data, n, |s| (s as f32 - 128.0) / 128.0)
            },
            err_fn,
            None,
        ),
        andere => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                andere
            )))
        }
    }
    .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        abtastrate = config.sample_rate,
        kanaele, "Capture-Stream geoeffnet"
    );

    Ok((
        CaptureStream {
            _stream: stream,
            config,
            kanaele,
        },
        consumer,
    ))
}
