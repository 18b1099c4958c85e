//! meshcall-protocol - Wireformate der Anruf-Engine
//!
//! Enthaelt:
//! - Signalisierungsnachrichten (JSON) inklusive Builder ([`signaling`])
//! - Codec-Typen und Codec-Aushandlung ([`codec`])
//! - Binaeres Medien-Framing fuer den Sprach-Link ([`frame`])

pub mod codec;
pub mod frame;
pub mod signaling;

pub use codec::{
    negotiate_codec, normalize_codec_bitrate, CodecEinstellungen, CodecType, NegotiatedCodec,
    CODEC2_ABTASTRATE, CODEC2_MODI, CODEC2_STANDARD_MODUS, FRAME_MS, OPUS_ABTASTRATE,
    OPUS_STANDARD_BITRATE, OPUS_STANDARD_KOMPLEXITAET,
};
pub use frame::{MediaFrame, PacketType, PingPayload, PingRichtung, PING_LAENGE};
pub use signaling::{
    build_accept, build_announce, build_end, build_invite, build_reject, build_ringing,
    new_call_id, zeitstempel_jetzt, CallMessage, MediaEndpoint, MessageType,
};
