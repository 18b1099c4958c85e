//! Audio-Playback via cpal
//!
//! Liest Mono-Samples aus einem lock-free Ring-Buffer und verteilt sie im
//! cpal-Callback auf alle Geraetekanaele. Fehlende Samples werden mit
//! Stille aufgefuellt.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, trace};

use crate::error::{AudioError, AudioResult};

/// Konfiguration fuer den Audio-Playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Ring-Buffer Kapazitaet in Samples
    pub buffer_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 48_000,
        }
    }
}

pub type PlaybackProducer = HeapProd<f32>;
pub type PlaybackConsumer = HeapCons<f32>;

pub struct PlaybackStream {
    _stream: Stream,
    config: PlaybackConfig,
}

impl PlaybackStream {
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }
}

/// Fuellt einen verschachtelten Ausgabepuffer aus dem Mono-Puffer
fn mono_verteilen<S: Copy>(
    consumer: &mut PlaybackConsumer,
    data: &mut [S],
    kanaele: usize,
    stille: S,
    wandeln: impl Fn(f32) -> S,
) {
    let kanaele = kanaele.max(1);
    let mut fehlend = 0usize;
    for frame in data.chunks_mut(kanaele) {
        let wert = match consumer.try_pop() {
            Some(s) => wandeln(s),
            None => {
                fehlend += 1;
                stille
            }
        };
        frame.fill(wert);
    }
    if fehlend > 0 {
        trace!(fehlend, "Playback Underrun");
    }
}

/// Oeffnet einen Playback-Stream auf dem gegebenen Geraet
pub fn open_playback_stream(
    device: &Device,
    config: PlaybackConfig,
) -> AudioResult<(PlaybackStream, PlaybackProducer)> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
        })
        .ok_or_else(|| {
            AudioError::StreamFehler(format!(
                "Ausgabegeraet unterstuetzt {} Hz nicht",
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
    let (producer, mut consumer) = rb.split();
    let n = kanaele as usize;
    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| mono_verteilen(&mut consumer, data, n, 0.0, |s| s),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _| {
                mono_verteilen(&mut consumer, data, n, 0, |s| {
                    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
                })
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
        kanaele, "Playback-Stream geoeffnet"
    );

    Ok((
        PlaybackStream {
            _stream: stream,
            config,
        },
        producer,
    ))
}
