//! Shared HUD protocol helpers.
//!
//! Every message is a fixed-size header followed by a MessagePack payload.
//! The kiosk engine produces these frames and any HUD bridge (a browser
//! shim, the `hud_probe` tool) consumes them, so the framing lives here.

use std::convert::TryFrom;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every HUD message ("JHUD").
pub const HEADER_MAGIC: [u8; 4] = *b"JHUD";

/// Protocol revision understood by this crate.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Upper bound accepted for a single payload.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

/// Message kinds understood by the HUD protocol v1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Hello = 0x0001,
    Navigate = 0x0002,
    Labels = 0x0003,
    Meters = 0x0004,
    Heartbeat = 0x0005,
}

/// Envelope describing the upcoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from raw bytes.
    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut cursor = &input[4..HEADER_LEN];
        let version = cursor.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind_raw = cursor.get_u16();
        let kind = MessageKind::try_from(kind_raw)
            .map_err(|_| ProtocolError::UnknownMessageKind(kind_raw))?;
        let length = cursor.get_u32();
        if length > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(length));
        }
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Hello),
            0x0002 => Ok(Self::Navigate),
            0x0003 => Ok(Self::Labels),
            0x0004 => Ok(Self::Meters),
            0x0005 => Ok(Self::Heartbeat),
            _ => Err(()),
        }
    }
}

/// Handshake sent by the engine as soon as a HUD client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub producer: String,
    pub build: Option<String>,
}

impl Hello {
    pub fn new(producer: impl Into<String>, build: Option<String>) -> Self {
        Self {
            protocol: "KioskHud".to_string(),
            producer: producer.into(),
            build,
        }
    }
}

/// Switch the HUD to another sprite page and show its initial labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigate {
    pub sprite: String,
    pub labels: [String; 3],
}

/// Replace the three button labels on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub labels: [String; 3],
}

/// Meter levels as whole percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meters {
    pub temp_pct: u8,
    pub money_pct: u8,
}

/// Liveness probe; a failed write tells the producer the client is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub seq: u64,
    pub host_time_ns: u64,
}

/// Any decoded HUD message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HudMessage {
    Hello(Hello),
    Navigate(Navigate),
    Labels(Labels),
    Meters(Meters),
    Heartbeat(Heartbeat),
}

impl HudMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            HudMessage::Hello(_) => MessageKind::Hello,
            HudMessage::Navigate(_) => MessageKind::Navigate,
            HudMessage::Labels(_) => MessageKind::Labels,
            HudMessage::Meters(_) => MessageKind::Meters,
            HudMessage::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }

    /// Frame the message for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            HudMessage::Hello(payload) => encode_message(MessageKind::Hello, payload),
            HudMessage::Navigate(payload) => encode_message(MessageKind::Navigate, payload),
            HudMessage::Labels(payload) => encode_message(MessageKind::Labels, payload),
            HudMessage::Meters(payload) => encode_message(MessageKind::Meters, payload),
            HudMessage::Heartbeat(payload) => encode_message(MessageKind::Heartbeat, payload),
        }
    }

    /// Decode a payload whose kind was announced by `header`.
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != header.length as usize {
            return Err(ProtocolError::LengthMismatch {
                expected: header.length,
                actual: payload.len(),
            });
        }
        let message = match header.kind {
            MessageKind::Hello => HudMessage::Hello(decode_payload(payload)?),
            MessageKind::Navigate => HudMessage::Navigate(decode_payload(payload)?),
            MessageKind::Labels => HudMessage::Labels(decode_payload(payload)?),
            MessageKind::Meters => HudMessage::Meters(decode_payload(payload)?),
            MessageKind::Heartbeat => HudMessage::Heartbeat(decode_payload(payload)?),
        };
        Ok(message)
    }
}

/// Error conditions returned by the protocol helpers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("protocol version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("message kind {0:#06x} is unknown")]
    UnknownMessageKind(u16),
    #[error("payload of {0} bytes exceeds the protocol limit")]
    PayloadTooLarge(u32),
    #[error("payload length mismatch: header declared {expected} bytes but read {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Wraps a payload with framing suitable for the wire.
pub fn encode_message<T>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize,
{
    let payload_bytes = rmp_serde::to_vec_named(payload)?;
    let length = u32::try_from(payload_bytes.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or(ProtocolError::PayloadTooLarge(u32::MAX))?;
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Decodes a framed message returning both header and payload bytes.
pub fn decode_envelope(bytes: &[u8]) -> std::result::Result<(MessageHeader, &[u8]), ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader);
    }
    let header = MessageHeader::decode(&bytes[..HEADER_LEN])?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

/// Decode a payload straight into the requested type.
pub fn decode_payload<T>(payload: &[u8]) -> std::result::Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = rmp_serde::from_slice(payload)?;
    Ok(value)
}
