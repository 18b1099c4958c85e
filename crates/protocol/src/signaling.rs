//! Signalisierungsnachrichten
//!
//! Alle Anrufsteuerungsnachrichten werden als JSON-Objekt ueber das
//! Nachrichten-Primitiv des Transports verschickt.
//!
//! ## Wire-Format
//!
//! ```text
//! { "type": "CALL_INVITE", "call_id": "...", "from": "<id>", "to": "<id>",
//!   "display_name"?: "...", "call_dest"?: "<hex>", "call_identity_key"?: "<base64>",
//!   "codec_type"?: "opus"|"codec2", "codec_bitrate"?: 24000, "timestamp"?: 1700000000.5 }
//! ```
//!
//! Fehlende optionale Felder werden weggelassen, nie als `null` gesendet.
//! Beim Einlesen werden die aelteren Feldnamen `media_dest` und
//! `media_identity_key` weiterhin akzeptiert.

use meshcall_core::{CallId, MeshcallError, PeerId, Result};
use serde::{Deserialize, Serialize};

use crate::codec::{CodecType, NegotiatedCodec};

// ---------------------------------------------------------------------------
// Nachrichtentypen
// ---------------------------------------------------------------------------

/// Art einer Signalisierungsnachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    CallInvite,
    CallRinging,
    CallAccept,
    CallReject,
    CallEnd,
    PresenceAnnounce,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallInvite => "CALL_INVITE",
            Self::CallRinging => "CALL_RINGING",
            Self::CallAccept => "CALL_ACCEPT",
            Self::CallReject => "CALL_REJECT",
            Self::CallEnd => "CALL_END",
            Self::PresenceAnnounce => "PRESENCE_ANNOUNCE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Medien-Endpunkt
// ---------------------------------------------------------------------------

/// Adresse, unter der ein Peer Sprach-Links annimmt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEndpoint {
    /// Ziel-Hash (hex)
    pub ziel: String,
    /// Oeffentlicher Identitaetsschluessel (base64)
    pub identity_key: String,
}

impl MediaEndpoint {
    pub fn neu(ziel: impl Into<String>, identity_key: impl Into<String>) -> Self {
        Self {
            ziel: ziel.into(),
            identity_key: identity_key.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CallMessage
// ---------------------------------------------------------------------------

fn ist_null(wert: &f64) -> bool {
    *wert == 0.0
}

/// Eine Signalisierungsnachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default = "CallId::leer")]
    pub call_id: CallId,
    pub from: PeerId,
    #[serde(default)]
    pub to: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, alias = "media_dest", skip_serializing_if = "Option::is_none")]
    pub call_dest: Option<String>,
    #[serde(
        default,
        alias = "media_identity_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub call_identity_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<CodecType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_bitrate: Option<u32>,
    /// Sekunden seit Unix-Epoche
    #[serde(default, skip_serializing_if = "ist_null")]
    pub timestamp: f64,
}

impl CallMessage {
    fn neu(msg_type: MessageType, call_id: CallId, from: &PeerId, to: &PeerId) -> Self {
        Self {
            msg_type,
            call_id,
            from: from.clone(),
            to: to.clone(),
            display_name: None,
            call_dest: None,
            call_identity_key: None,
            codec_type: None,
            codec_bitrate: None,
            timestamp: zeitstempel_jetzt(),
        }
    }

    /// Prueft die Nachrichten-Invarianten
    ///
    /// Jede Nachricht ausser `PRESENCE_ANNOUNCE` braucht einen Empfaenger
    /// und eine Anruf-ID.
    pub fn validieren(&self) -> Result<()> {
        if self.from.ist_broadcast() {
            return Err(MeshcallError::protokoll("Absender fehlt"));
        }
        if self.msg_type == MessageType::PresenceAnnounce {
            return Ok(());
        }
        if self.to.ist_broadcast() {
            return Err(MeshcallError::protokoll(format!(
                "{} ohne Empfaenger",
                self.msg_type
            )));
        }
        if self.call_id.ist_leer() {
            return Err(MeshcallError::protokoll(format!(
                "{} ohne Anruf-ID",
                self.msg_type
            )));
        }
        Ok(())
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialisiert die Nachricht als UTF-8-Bytes fuer den Transport
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parst und validiert eine Nachricht
    pub fn from_json(json: &str) -> Result<Self> {
        let msg: Self = serde_json::from_str(json)?;
        msg.validieren()?;
        Ok(msg)
    }

    /// Parst und validiert eine Nachricht aus Transport-Bytes
    pub fn from_bytes(daten: &[u8]) -> Result<Self> {
        let msg: Self = serde_json::from_slice(daten)?;
        msg.validieren()?;
        Ok(msg)
    }

    /// Medien-Endpunkt, falls Ziel und Schluessel beide vorhanden sind
    pub fn media_endpoint(&self) -> Option<MediaEndpoint> {
        match (self.call_dest.as_deref(), self.call_identity_key.as_deref()) {
            (Some(ziel), Some(key)) if !ziel.is_empty() && !key.is_empty() => {
                Some(MediaEndpoint::neu(ziel, key))
            }
            _ => None,
        }
    }

    /// Codec-Angebot, falls Typ und Bitrate beide vorhanden sind
    pub fn codec_angebot(&self) -> Option<NegotiatedCodec> {
        Some(NegotiatedCodec::neu(self.codec_type?, self.codec_bitrate?))
    }

    fn mit_endpoint(mut self, media: Option<&MediaEndpoint>) -> Self {
        if let Some(m) = media {
            self.call_dest = Some(m.ziel.clone());
            self.call_identity_key = Some(m.identity_key.clone());
        }
        self
    }

    fn mit_codec(mut self, codec: Option<NegotiatedCodec>) -> Self {
        if let Some(c) = codec {
            self.codec_type = Some(c.codec);
            self.codec_bitrate = Some(c.bitrate);
        }
        self
    }
}

/// Aktuelle Zeit als Sekunden seit Unix-Epoche
pub fn zeitstempel_jetzt() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Neue Anruf-ID
pub fn new_call_id() -> CallId {
    CallId::neu()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Anrufeinladung. Ohne `call_id` wird eine neue ID erzeugt.
///
/// Der Medien-Endpunkt wird nicht mitgeschickt, der Angerufene
/// kennt ihn aus dem Presence-Announce.
pub fn build_invite(
    from: &PeerId,
    to: &PeerId,
    call_id: Option<CallId>,
    display_name: Option<&str>,
    codec: Option<NegotiatedCodec>,
) -> CallMessage {
    let mut msg = CallMessage::neu(
        MessageType::CallInvite,
        call_id.unwrap_or_else(new_call_id),
        from,
        to,
    )
    .mit_codec(codec);
    msg.display_name = display_name.map(str::to_string);
    msg
}

pub fn build_ringing(from: &PeerId, to: &PeerId, call_id: &CallId) -> CallMessage {
    CallMessage::neu(MessageType::CallRinging, call_id.clone(), from, to)
}

pub fn build_accept(
    from: &PeerId,
    to: &PeerId,
    call_id: &CallId,
    media: Option<&MediaEndpoint>,
    codec: Option<NegotiatedCodec>,
) -> CallMessage {
    CallMessage::neu(MessageType::CallAccept, call_id.clone(), from, to)
        .mit_endpoint(media)
        .mit_codec(codec)
}

pub fn build_reject(from: &PeerId, to: &PeerId, call_id: &CallId) -> CallMessage {
    CallMessage::neu(MessageType::CallReject, call_id.clone(), from, to)
}

pub fn build_end(from: &PeerId, to: &PeerId, call_id: &CallId) -> CallMessage {
    CallMessage::neu(MessageType::CallEnd, call_id.clone(), from, to)
}

/// Presence-Announce: Broadcast ohne Anruf-ID
pub fn build_announce(
    from: &PeerId,
    display_name: Option<&str>,
    media: Option<&MediaEndpoint>,
) -> CallMessage {
    let mut msg = CallMessage::neu(
        MessageType::PresenceAnnounce,
        CallId::leer(),
        from,
        &PeerId::broadcast(),
    )
    .mit_endpoint(media);
    msg.display_name = display_name.map(str::to_string);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PeerId {
        PeerId::from("a1a1")
    }

    fn bob() -> PeerId {
        PeerId::from("b0b0")
    }

    #[test]
    fn optionale_felder_werden_weggelassen() {
        let msg = build_end(&alice(), &bob(), &CallId::from("c1"));
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj["type"], "CALL_END");
        assert_eq!(obj["call_id"], "c1");
        assert_eq!(obj["from"], "a1a1");
        assert_eq!(obj["to"], "b0b0");
        assert!(obj.contains_key("timestamp"));
        for feld in [
            "display_name",
            "call_dest",
            "call_identity_key",
            "codec_type",
            "codec_bitrate",
        ] {
            assert!(!obj.contains_key(feld), "{feld} darf nicht gesendet werden");
        }
    }

    #[test]
    fn invite_traegt_codec_aber_keinen_endpunkt() {
        let msg = build_invite(
            &alice(),
            &bob(),
            None,
            Some("Alice"),
            Some(NegotiatedCodec::neu(CodecType::Codec2, 1200)),
        );
        assert!(!msg.call_id.ist_leer());
        assert_eq!(msg.codec_type, Some(CodecType::Codec2));
        assert_eq!(msg.codec_bitrate, Some(1200));
        assert!(msg.media_endpoint().is_none());

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"codec_type\":\"codec2\""));
        let zurueck = CallMessage::from_json(&json).unwrap();
        assert_eq!(zurueck.display_name.as_deref(), Some("Alice"));
        assert_eq!(zurueck.codec_angebot(), msg.codec_angebot());
    }

    #[test]
    fn accept_mit_endpunkt() {
        let media = MediaEndpoint::neu("00ff", "a2V5");
        let msg = build_accept(&bob(), &alice(), &CallId::from("c9"), Some(&media), None);
        assert_eq!(msg.media_endpoint(), Some(media));
        assert!(msg.codec_angebot().is_none());
    }

    #[test]
    fn announce_ist_broadcast() {
        let msg = build_announce(&alice(), Some("Alice"), None);
        assert!(msg.to.ist_broadcast());
        assert!(msg.call_id.ist_leer());
        assert!(msg.validieren().is_ok());
    }

    #[test]
    fn alte_feldnamen_werden_akzeptiert() {
        let json = r#"{"type":"CALL_ACCEPT","call_id":"c1","from":"b0b0","to":"a1a1",
            "media_dest":"abcd","media_identity_key":"S0VZ"}"#;
        let msg = CallMessage::from_json(json).unwrap();
        assert_eq!(msg.media_endpoint(), Some(MediaEndpoint::neu("abcd", "S0VZ")));
        assert_eq!(msg.timestamp, 0.0);
    }

    #[test]
    fn fehlender_empfaenger_ist_protokollfehler() {
        let json = r#"{"type":"CALL_INVITE","call_id":"c1","from":"a1a1","to":""}"#;
        assert!(matches!(
            CallMessage::from_json(json),
            Err(MeshcallError::Protokoll(_))
        ));
    }

    #[test]
    fn fehlende_anruf_id_ist_protokollfehler() {
        let json = r#"{"type":"CALL_END","from":"a1a1","to":"b0b0"}"#;
        assert!(CallMessage::from_json(json).is_err());
    }

    #[test]
    fn kaputtes_json_und_unbekannte_werte() {
        assert!(CallMessage::from_bytes(b"\xff\x00").is_err());
        assert!(CallMessage::from_json(r#"{"type":"CALL_HOLD","call_id":"c","from":"a","to":"b"}"#).is_err());
        assert!(CallMessage::from_json(
            r#"{"type":"CALL_INVITE","call_id":"c","from":"a","to":"b","codec_type":"speex"}"#
        )
        .is_err());
    }

    #[test]
    fn zeitstempel_ist_plausibel() {
        let msg = build_ringing(&alice(), &bob(), &CallId::from("c1"));
        // Nach 2020-01-01
        assert!(msg.timestamp > 1_577_836_800.0);
    }
}
