//! meshcall-core - Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Meshcall-Crates gemeinsam genutzt werden: Anruf- und Peer-IDs sowie
//! die zentrale Fehler-Taxonomie.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{MeshcallError, Result};
pub use types::{CallId, PeerId};
