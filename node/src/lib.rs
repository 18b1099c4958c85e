//! meshcall-node - Bibliotheks-Root
//!
//! Deklariert alle Knoten-Module und stellt die Anruf-Engine fuer den
//! Demo-Binary und die Integrationstests bereit.

pub mod config;
pub mod demo;
pub mod engine;
pub mod peers;
pub mod versand;

pub use config::NodeConfig;
pub use engine::{AblehnGrund, CallEngine, EngineKonfig, PhasenWechsel, Verarbeitung};
pub use peers::{PeerEintrag, PeerVerzeichnis};
pub use versand::{KanalVersand, Posteingang, SignalNetz, SignalingVersand};
