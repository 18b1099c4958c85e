//! Short Authentication String (SAS)
//!
//! Beide Seiten leiten aus dem gemeinsamen Link-Geheimnis denselben
//! kurzen Zifferncode ab und vergleichen ihn muendlich.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Standardlaenge des SAS in Ziffern
pub const SAS_STANDARD_LAENGE: usize = 4;

/// Groesste sinnvolle Laenge: 10^9 passt noch in u32
pub const SAS_MAX_LAENGE: usize = 9;

/// Sicherheitsstatus einer Session fuer die Oberflaeche
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityInfo {
    pub encrypted: bool,
    pub sas_code: Option<String>,
    pub sas_verified: bool,
}

fn hash_praefix(secret: &[u8]) -> [u8; 4] {
    let hash = Sha256::digest(secret);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// SAS mit `laenge` Dezimalziffern (1..=9), fuehrende Nullen bleiben
/// erhalten
pub fn generate_sas(secret: &[u8], laenge: usize) -> String {
    let laenge = laenge.clamp(1, SAS_MAX_LAENGE);
    let wert = u32::from_be_bytes(hash_praefix(secret));
    let modul = 10u32.pow(laenge as u32);
    format!("{:0width$}", wert % modul, width = laenge)
}

/// Gruppierte Anzeigeform `NN-NN-NN-NN`
pub fn generate_sas_grouped(secret: &[u8]) -> String {
    hash_praefix(secret)
        .iter()
        .map(|b| format!("{:02}", b % 100))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use std::collections::HashSet;

    #[test]
    fn deterministisch_und_laenge() {
        let secret = b"gemeinsames-geheimnis";
        assert_eq!(generate_sas(secret, 4), generate_sas(secret, 4));
        for laenge in 1..=9 {
            let sas = generate_sas(secret, laenge);
            assert_eq!(sas.len(), laenge);
            assert!(sas.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn bekannter_wert() {
        // sha256("") beginnt mit e3 b0 c4 42 = 3820012610
        assert_eq!(generate_sas(b"", 4), "2610");
        assert_eq!(generate_sas(b"", 6), "012610");
        assert_eq!(generate_sas_grouped(b""), "27-76-96-66");
    }

    #[test]
    fn verschiedene_geheimnisse_streuen() {
        let mut rng = rand::thread_rng();
        let mut codes = HashSet::new();
        for _ in 0..200 {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            codes.insert(generate_sas(&secret, 6));
        }
        // Kollisionen bei 10^6 Werten sind selten
        assert!(codes.len() >= 195, "nur {} verschiedene Codes", codes.len());
    }

    #[test]
    fn gruppierte_form() {
        let sas = generate_sas_grouped(b"abc");
        assert_eq!(sas.len(), 11);
        assert_eq!(sas.matches('-').count(), 3);
    }
}
