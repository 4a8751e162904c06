//! Pure encode/decode of the 12-byte frame header. No I/O lives here; the
//! receive loop (`crate::reader`) supplies the bytes and the send scheduler
//! (`crate::scheduler`) writes the encoded result to the transport.

use bitflags::bitflags;

use crate::error::{Error, Result};

/// The only version this implementation speaks. Any other byte on the wire
/// is a fatal protocol error.
pub const MAX_VERSION: u8 = 0;

/// Size of the fixed frame header, in bytes.
pub const HEADER_LEN: usize = 12;

/// Session-level stream identifier: `PING` and `GO_AWAY` are the only
/// frame types allowed to use it.
pub const SESSION_STREAM_ID: u32 = 0;

bitflags! {
    /// Frame flag bitfield (bytes 2-3 of the header).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Flags: u16 {
        /// Opens a new stream.
        const SYN = 0x1;
        /// Accepts a new stream, or acknowledges a ping.
        const ACK = 0x2;
        /// Send-side of the stream is now closed.
        const FIN = 0x4;
        /// Abort the stream immediately.
        const RST = 0x8;
    }
}

/// Frame type (byte 1 of the header).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Carries stream payload bytes.
    Data = 0,
    /// Grants additional send-window credit to the peer.
    WindowUpdate = 1,
    /// Liveness probe / RTT measurement.
    Ping = 2,
    /// Graceful session shutdown announcement.
    GoAway = 3,
}

impl FrameType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::WindowUpdate),
            2 => Ok(FrameType::Ping),
            3 => Ok(FrameType::GoAway),
            got => Err(Error::InvalidType { got }),
        }
    }
}

/// Reason code carried in the `length` field of a `GO_AWAY` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayReason {
    Normal = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl GoAwayReason {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => GoAwayReason::ProtocolError,
            2 => GoAwayReason::InternalError,
            _ => GoAwayReason::Normal,
        }
    }
}

/// The fixed 12-byte frame header, decoded.
///
/// `length` is reinterpreted per frame type: payload length for `DATA`,
/// window delta for `WINDOW_UPDATE`, opaque nonce for `PING`, reason code
/// for `GO_AWAY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: Flags,
    pub stream_id: u32,
    pub length: u32,
}

impl FrameHeader {
    pub fn data(stream_id: u32, flags: Flags, length: u32) -> Self {
        Self { frame_type: FrameType::Data, flags, stream_id, length }
    }

    pub fn window_update(stream_id: u32, flags: Flags, delta: u32) -> Self {
        Self { frame_type: FrameType::WindowUpdate, flags, stream_id, length: delta }
    }

    pub fn ping(flags: Flags, nonce: u32) -> Self {
        Self { frame_type: FrameType::Ping, flags, stream_id: SESSION_STREAM_ID, length: nonce }
    }

    pub fn go_away(reason: GoAwayReason) -> Self {
        Self {
            frame_type: FrameType::GoAway,
            flags: Flags::empty(),
            stream_id: SESSION_STREAM_ID,
            length: reason as u32,
        }
    }

    /// Encode this header into a fixed 12-byte array, big-endian.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = MAX_VERSION;
        out[1] = self.frame_type as u8;
        out[2..4].copy_from_slice(&self.flags.bits().to_be_bytes());
        out[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from exactly `HEADER_LEN` bytes.
    ///
    /// `max_payload` bounds `DATA` frame length (`spec` caps it at the
    /// session's `MaxStreamWindowSize`); it is ignored for other types.
    pub fn decode(bytes: &[u8; HEADER_LEN], max_payload: u32) -> Result<Self> {
        let version = bytes[0];
        if version != MAX_VERSION {
            return Err(Error::InvalidVersion { got: version });
        }
        let frame_type = FrameType::from_byte(bytes[1])?;
        let flags = Flags::from_bits_truncate(u16::from_be_bytes([bytes[2], bytes[3]]));
        let stream_id = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        if matches!(frame_type, FrameType::Data) && length > max_payload {
            return Err(Error::OversizedFrame { length, max: max_payload });
        }

        Ok(Self { frame_type, flags, stream_id, length })
    }

    /// Only `DATA` frames carry a payload on the wire.
    pub fn payload_len(&self) -> usize {
        match self.frame_type {
            FrameType::Data => self.length as usize,
            _ => 0,
        }
    }
}
