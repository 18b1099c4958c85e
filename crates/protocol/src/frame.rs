//! Medien-Framing fuer den Sprach-Link
//!
//! Jede Nutzlast auf dem Link bekommt ein Typ-Byte vorangestellt.
//! Audio-Frames tragen zusaetzlich eine 16-Bit-Sequenznummer.
//!
//! ## Frame-Format
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   PacketType (0x01 = Audio, 0x02 = Ping, 0x03 = Control)
//!  1       2   Sequenznummer (big-endian, nur Audio, modulo 65536)
//!  1|3     N   Nutzdaten
//! ```
//!
//! Ping-Nutzdaten:
//!
//! ```text
//!  0       1   Richtung (0 = Anfrage, 1 = Antwort)
//!  1       8   Zeitstempel (f64 big-endian, Sekunden)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::io;

/// Laenge der Ping-Nutzdaten in Bytes
pub const PING_LAENGE: usize = 9;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Art eines Medien-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Kodiertes Audio mit Sequenznummer
    Audio = 0x01,
    /// RTT-Messung
    Ping = 0x02,
    /// Steuerdaten (derzeit nur protokolliert)
    Control = 0x03,
}

impl PacketType {
    pub fn from_u8(wert: u8) -> Option<Self> {
        match wert {
            0x01 => Some(Self::Audio),
            0x02 => Some(Self::Ping),
            0x03 => Some(Self::Control),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

/// Richtung eines Pings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PingRichtung {
    Anfrage = 0,
    Antwort = 1,
}

/// Nutzdaten eines Ping-Frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingPayload {
    pub richtung: PingRichtung,
    /// Sendezeitpunkt der Anfrage in Sekunden
    pub zeitstempel: f64,
}

impl PingPayload {
    /// Neue Anfrage mit aktuellem Zeitstempel
    pub fn anfrage(zeitstempel: f64) -> Self {
        Self {
            richtung: PingRichtung::Anfrage,
            zeitstempel,
        }
    }

    /// Antwort auf diese Anfrage (Zeitstempel wird zurueckgespiegelt)
    pub fn als_antwort(&self) -> Self {
        Self {
            richtung: PingRichtung::Antwort,
            zeitstempel: self.zeitstempel,
        }
    }

    pub fn encode(&self) -> [u8; PING_LAENGE] {
        let mut buf = [0u8; PING_LAENGE];
        buf[0] = self.richtung as u8;
        buf[1..].copy_from_slice(&self.zeitstempel.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < PING_LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Ping zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    PING_LAENGE
                ),
            ));
        }
        let richtung = match buf[0] {
            0 => PingRichtung::Anfrage,
            1 => PingRichtung::Antwort,
            anders => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unbekannte Ping-Richtung: {anders}"),
                ))
            }
        };
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&buf[1..PING_LAENGE]);
        Ok(Self {
            richtung,
            zeitstempel: f64::from_be_bytes(ts),
        })
    }
}

// ---------------------------------------------------------------------------
// MediaFrame
// ---------------------------------------------------------------------------

/// Ein dekodierter Frame auf dem Sprach-Link
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFrame {
    Audio { seq: u16, payload: Bytes },
    Ping(PingPayload),
    Control(Bytes),
}

impl MediaFrame {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Audio { .. } => PacketType::Audio,
            Self::Ping(_) => PacketType::Ping,
            Self::Control(_) => PacketType::Control,
        }
    }

    /// Serialisiert den Frame in das Wire-Format
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Audio { seq, payload } => {
                let mut buf = BytesMut::with_capacity(3 + payload.len());
                buf.put_u8(PacketType::Audio as u8);
                buf.put_u16(*seq);
                buf.put_slice(payload);
                buf.freeze()
            }
            Self::Ping(ping) => {
                let mut buf = BytesMut::with_capacity(1 + PING_LAENGE);
                buf.put_u8(PacketType::Ping as u8);
                buf.put_slice(&ping.encode());
                buf.freeze()
            }
            Self::Control(payload) => {
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.put_u8(PacketType::Control as u8);
                buf.put_slice(payload);
                buf.freeze()
            }
        }
    }

    /// Parst einen Frame aus Link-Bytes
    ///
    /// # Fehler
    /// - `InvalidData` bei leerem Frame oder unbekanntem Typ-Byte
    /// - `InvalidData` bei Audio-Frames ohne vollstaendige Sequenznummer
    /// - `InvalidData` bei zu kurzen Ping-Nutzdaten
    pub fn decode(raw: &[u8]) -> io::Result<Self> {
        let Some((&typ, rest)) = raw.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Leerer Frame"));
        };
        let typ = PacketType::from_u8(typ).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter PacketType: {typ:#04x}"),
            )
        })?;

        match typ {
            PacketType::Audio => {
                if rest.len() < 2 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Audio-Frame zu kurz: {} Bytes", raw.len()),
                    ));
                }
                let seq = u16::from_be_bytes([rest[0], rest[1]]);
                Ok(Self::Audio {
                    seq,
                    payload: Bytes::copy_from_slice(&rest[2..]),
                })
            }
            PacketType::Ping => Ok(Self::Ping(PingPayload::decode(rest)?)),
            PacketType::Control => Ok(Self::Control(Bytes::copy_from_slice(rest))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_layout() {
        let frame = MediaFrame::Audio {
            seq: 0x1234,
            payload: Bytes::from_static(&[0xAA, 0xBB]),
        };
        assert_eq!(&frame.encode()[..], &[0x01, 0x12, 0x34, 0xAA, 0xBB]);
        assert_eq!(MediaFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn ping_layout_und_antwort() {
        let anfrage = PingPayload::anfrage(1234.5);
        let bytes = MediaFrame::Ping(anfrage).encode();
        assert_eq!(bytes.len(), 1 + PING_LAENGE);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(&bytes[2..], &1234.5f64.to_be_bytes());

        let antwort = anfrage.als_antwort();
        assert_eq!(antwort.richtung, PingRichtung::Antwort);
        assert_eq!(antwort.zeitstempel, 1234.5);
        match MediaFrame::decode(&MediaFrame::Ping(antwort).encode()).unwrap() {
            MediaFrame::Ping(p) => assert_eq!(p, antwort),
            anders => panic!("Ping erwartet, war {anders:?}"),
        }
    }

    #[test]
    fn control_nutzdaten_unveraendert() {
        let bytes = MediaFrame::Control(Bytes::from_static(b"mute")).encode();
        assert_eq!(&bytes[..], b"\x03mute");
    }

    #[test]
    fn ungueltige_frames() {
        assert!(MediaFrame::decode(&[]).is_err());
        assert!(MediaFrame::decode(&[0x7F, 1, 2]).is_err());
        assert!(MediaFrame::decode(&[0x01, 0x00]).is_err());
        assert!(MediaFrame::decode(&[0x02, 0x00, 1, 2]).is_err());
        let mut falsche_richtung = vec![0x02, 0x05];
        falsche_richtung.extend_from_slice(&1.0f64.to_be_bytes());
        assert!(MediaFrame::decode(&falsche_richtung).is_err());
    }

    #[test]
    fn audio_ohne_nutzdaten_ist_gueltig() {
        let frame = MediaFrame::decode(&[0x01, 0xFF, 0xFF]).unwrap();
        assert_eq!(
            frame,
            MediaFrame::Audio {
                seq: u16::MAX,
                payload: Bytes::new()
            }
        );
    }
}
