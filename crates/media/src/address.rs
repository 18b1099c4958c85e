//! Identitaeten und Medien-Zieladressen
//!
//! Eine Medien-Zieladresse ist ein 16-Byte-Hash, abgeleitet aus dem
//! Aspekt `meshcall.media` und dem Identitaets-Hash des Peers:
//!
//! ```text
//! identity_hash = sha256(public_key)[..16]
//! name_hash     = sha256("meshcall.media")[..10]
//! ziel          = sha256(name_hash || identity_hash)[..16]
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use meshcall_core::{MeshcallError, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Aspekt der Medien-Destination
pub const MEDIA_ASPEKT: &str = "meshcall.media";

/// Laenge aller abgeleiteten Hashes in Bytes
pub const HASH_LAENGE: usize = 16;

const NAME_HASH_LAENGE: usize = 10;

/// Oeffentlicher Identitaetsschluessel eines Peers
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityKey(Vec<u8>);

impl IdentityKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(MeshcallError::protokoll("Identitaetsschluessel ist leer"));
        }
        Ok(Self(bytes))
    }

    pub fn from_base64(kodiert: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(kodiert.trim())
            .map_err(|e| MeshcallError::protokoll(format!("Ungueltiger Identitaetsschluessel: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Neuer zufaelliger 64-Byte-Schluessel
    pub fn zufaellig() -> Self {
        let mut bytes = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn identity_hash(&self) -> [u8; HASH_LAENGE] {
        kuerzen(&Sha256::digest(&self.0))
    }

    /// Identitaets-Hash als Hex, dient auch als Peer-ID
    pub fn identity_hash_hex(&self) -> String {
        hex::encode(self.identity_hash())
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKey({})", self.identity_hash_hex())
    }
}

/// Medien-Zieladresse eines Peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaDestination([u8; HASH_LAENGE]);

impl MediaDestination {
    /// Leitet die Zieladresse aus einem Identitaetsschluessel ab
    pub fn aus_identitaet(key: &IdentityKey) -> Self {
        let name_hash = Sha256::digest(MEDIA_ASPEKT.as_bytes());
        let mut hasher = Sha256::new();
        hasher.update(&name_hash[..NAME_HASH_LAENGE]);
        hasher.update(key.identity_hash());
        Self(kuerzen(&hasher.finalize()))
    }

    pub fn from_hex(kodiert: &str) -> Result<Self> {
        let bytes = hex::decode(kodiert.trim())
            .map_err(|e| MeshcallError::protokoll(format!("Ungueltige Zieladresse: {e}")))?;
        let arr: [u8; HASH_LAENGE] = bytes.as_slice().try_into().map_err(|_| {
            MeshcallError::protokoll(format!(
                "Zieladresse muss {HASH_LAENGE} Bytes lang sein (war {})",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LAENGE] {
        &self.0
    }

    /// Vergleicht mit einer angekuendigten Adresse. Abweichungen werden
    /// nur protokolliert, der Verbindungsaufbau laeuft weiter.
    pub fn pruefe_erwartet(&self, erwartet: &str) -> bool {
        let passt = self.to_hex().eq_ignore_ascii_case(erwartet.trim());
        if !passt {
            tracing::warn!(
                berechnet = %self.to_hex(),
                erwartet,
                "Medien-Zieladresse passt nicht zum Identitaetsschluessel"
            );
        }
        passt
    }
}

impl std::fmt::Display for MediaDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn kuerzen(hash: &[u8]) -> [u8; HASH_LAENGE] {
    let mut out = [0u8; HASH_LAENGE];
    out.copy_from_slice(&hash[..HASH_LAENGE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_hin_und_zurueck() {
        let key = IdentityKey::zufaellig();
        let wieder = IdentityKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, wieder);
    }

    #[test]
    fn ungueltige_schluessel() {
        assert!(IdentityKey::from_base64("%%%").is_err());
        assert!(IdentityKey::from_base64("").is_err());
    }

    #[test]
    fn zieladresse_deterministisch() {
        let key = IdentityKey::from_bytes(vec![7u8; 64]).unwrap();
        let a = MediaDestination::aus_identitaet(&key);
        let b = MediaDestination::aus_identitaet(&key);
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
        assert_ne!(a.as_bytes(), &key.identity_hash());

        let anders = IdentityKey::from_bytes(vec![8u8; 64]).unwrap();
        assert_ne!(a, MediaDestination::aus_identitaet(&anders));
    }

    #[test]
    fn zieladresse_aus_hex() {
        let key = IdentityKey::zufaellig();
        let ziel = MediaDestination::aus_identitaet(&key);
        assert_eq!(MediaDestination::from_hex(&ziel.to_hex()).unwrap(), ziel);
        assert!(MediaDestination::from_hex("00ff").is_err());
        assert!(MediaDestination::from_hex("zz").is_err());
    }

    #[test]
    fn pruefung_gegen_ankuendigung() {
        let key = IdentityKey::zufaellig();
        let ziel = MediaDestination::aus_identitaet(&key);
        assert!(ziel.pruefe_erwartet(&ziel.to_hex().to_uppercase()));
        assert!(!ziel.pruefe_erwartet("00000000000000000000000000000000"));
    }
}
