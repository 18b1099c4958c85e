//! meshcall-voice - Empfangsseitige Sprachverarbeitung
//!
//! ## Module
//! - [`jitter_buffer`] - zeitbasierte Abspielwarteschlange fuer dekodiertes Audio
//! - [`metrics`] - RTT, Paketverlust, Bitrate und Qualitaetsbewertung eines Anrufs

pub mod jitter_buffer;
pub mod metrics;

pub use jitter_buffer::{JitterBuffer, JitterBufferStatistik};
pub use metrics::{CallMetrics, CallMetricsSnapshot, ConnectionQuality};
