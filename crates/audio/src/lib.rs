//! meshcall-audio - Audio-Pipeline fuer Sprachanrufe
//!
//! - Opus (Feature `opus`) und Codec2 (Feature `codec2`) hinter einer
//!   gemeinsamen f32-PCM API
//! - Mikrofon-Capture und Lautsprecher-Playback via cpal (Feature `geraete`)
//! - Pipeline mit Capture- und Playback-Thread, zeitgesteuertem
//!   Jitter-Buffer und Pegelmessung
//!
//! Ohne Features baut die Crate vollstaendig und die Pipeline laeuft im
//! Stub-Modus.

#[cfg(feature = "geraete")]
pub mod capture;
pub mod codec;
pub mod device;
pub mod error;
pub mod pipeline;
#[cfg(feature = "geraete")]
pub mod playback;

pub use codec::{codec_erstellen, rms, CodecPaar, SprachDecoder, SprachEncoder};
pub use device::{standard_backend, AudioAusgang, AudioEingang, GeraeteAuswahl, GeraeteBackend, OhneGeraete};
pub use error::{AudioError, AudioResult};
pub use pipeline::{AudioPipeline, PipelineKonfig, SendeCallback};
