//! meshcall-signaling - Anrufsteuerung
//!
//! ## Module
//! - [`call_state`] - Zustandsautomat fuer genau einen Anruf
//! - [`filter`] - Zulassung und Deduplizierung eingehender Nachrichten
//! - [`rate_limit`] - Gleitendes Anruflimit pro Peer
//!
//! Eingehende Nachrichten laufen erst durch Sperrliste und Ratenbegrenzung
//! (nur Einladungen), dann durch den Filter und erst danach in den
//! Zustandsautomaten.

pub mod call_state;
pub mod filter;
pub mod rate_limit;

pub use call_state::{CallInfo, CallPhase, CallStage, CallStateMachine};
pub use filter::{CallMessageFilter, FilterGrund, FilterKonfig};
pub use rate_limit::{PeerStatistik, RateLimitKonfig, RateLimitStatistik, RateLimiter};
