//! meshcall-media - Sprach-Links zwischen zwei Peers
//!
//! ## Module
//! - [`link`] - Link- und Transport-Traits des Mesh-Netzes
//! - [`address`] - Identitaetsschluessel und Medien-Zieladressen
//! - [`security`] - SAS-Ableitung und Sicherheitsstatus
//! - [`session`] - Handshake, Audio und Ping einer Session
//! - [`manager`] - Verwaltung der aktiven Session
//! - [`loopback`] - Prozessinterner Transport fuer Demo und Tests
//! - [`timer`] - Einmalige und periodische Thread-Timer

pub mod address;
pub mod link;
pub mod loopback;
pub mod manager;
pub mod security;
pub mod session;
pub mod timer;

pub use address::{IdentityKey, MediaDestination, MEDIA_ASPEKT};
pub use link::{LinkStatus, MediaLink, MediaTransport};
pub use loopback::{LoopbackLink, LoopbackNetz, LoopbackTransport};
pub use manager::{EndeBeobachter, MediaManager};
pub use security::{generate_sas, generate_sas_grouped, SecurityInfo};
pub use session::{
    HandshakeZustand, MediaSession, SessionEnde, SessionEndeCallback, SessionKonfig,
    SessionParameter,
};
