//! The TLV envelope shared by data and control PDUs.
//!
//! Every PDU on the wire, whether carrying application payload on a data
//! transport or a control-protocol message on the signalling association,
//! starts with the same 4-byte big-endian header: `Type: u8, Flags: u8,
//! Length: u16`, where `Length` counts the whole frame including the
//! header. `HEADER_LEN` is used throughout the framed reader and the
//! sender to size buffers and validate incoming lengths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NetMeterError, Result};

pub const HEADER_LEN: usize = 4;

/// Frame type carried in the TLV header's `Type` byte.
///
/// `Data` (0x01) carries application/measurement payload. The control
/// protocol types (0x10-0x14) are defined by the control protocol (see
/// `control.rs`) and reuse this same envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x01,
    AddFlow = 0x10,
    RemoveFlow = 0x11,
    StartMeas = 0x12,
    StopMeas = 0x13,
    Ack = 0x14,
}

impl TryFrom<u8> for FrameType {
    type Error = NetMeterError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Data),
            0x10 => Ok(FrameType::AddFlow),
            0x11 => Ok(FrameType::RemoveFlow),
            0x12 => Ok(FrameType::StartMeas),
            0x13 => Ok(FrameType::StopMeas),
            0x14 => Ok(FrameType::Ack),
            other => Err(NetMeterError::UnknownFrameType(other)),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> u8 {
        t as u8
    }
}

/// Flags carried in the TLV header's `Flags` byte. Data frames use `FIN`
/// to mark the last frame of a flow; the remaining bits are currently
/// unused and must be zero on send, ignored on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: Self = Self(0x00);
    pub const FIN: Self = Self(0x01);

    pub fn contains(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

/// One parsed TLV frame: header plus its payload bytes (payload excludes
/// the 4-byte header; `Length` on the wire counts the header too).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: FrameFlags, payload: Bytes) -> Self {
        Self {
            frame_type,
            flags,
            payload,
        }
    }

    pub fn data(payload: Bytes, fin: bool) -> Self {
        Self::new(
            FrameType::Data,
            if fin { FrameFlags::FIN } else { FrameFlags::NONE },
            payload,
        )
    }

    /// Total length this frame occupies on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.frame_type.into());
        buf.put_u8(self.flags.0);
        buf.put_u16(self.encoded_len() as u16);
        buf.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Validate a header-carried `Length` against the allowed range
    /// `HEADER_LEN ..= buffer_size`, per the wire-format invariant.
    pub fn validate_length(length: usize, buffer_size: usize) -> Result<()> {
        if length < HEADER_LEN {
            return Err(NetMeterError::FrameTooShort {
                expected: HEADER_LEN,
                actual: length,
            });
        }
        if length > buffer_size {
            return Err(NetMeterError::FrameTooLong {
                length,
                buffer_size,
            });
        }
        Ok(())
    }

    /// Decode one frame from `buf`, which must contain at least
    /// `Length` bytes (the caller, typically the framed reader, is
    /// responsible for buffering until that much is available).
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(NetMeterError::FrameTooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        let frame_type = FrameType::try_from(buf[0])?;
        let flags = FrameFlags(buf[1]);
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        Self::validate_length(length, buf.len())?;
        buf.advance(HEADER_LEN);
        let payload = buf.slice(0..length - HEADER_LEN);
        Ok(Self {
            frame_type,
            flags,
            payload,
        })
    }

    /// Peek the `Length` field out of a header that may not yet be fully
    /// buffered; returns `None` if fewer than `HEADER_LEN` bytes are
    /// available.
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(u16::from_be_bytes([buf[2], buf[3]]) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_roundtrip() {
        let f = Frame::data(Bytes::from_static(b"hello"), false);
        let encoded = f.encode();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded, f);
    }

    #[test]
    fn data_frame_with_fin() {
        let f = Frame::data(Bytes::from_static(b"bye"), true);
        let encoded = f.encode();
        let decoded = Frame::decode(encoded).unwrap();
        assert!(decoded.flags.contains(FrameFlags::FIN));
    }

    #[test]
    fn empty_payload_roundtrip() {
        let f = Frame::data(Bytes::new(), false);
        let decoded = Frame::decode(f.encode()).unwrap();
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn control_frame_type_roundtrip() {
        let f = Frame::new(FrameType::AddFlow, FrameFlags::NONE, Bytes::from_static(b"x"));
        let decoded = Frame::decode(f.encode()).unwrap();
        assert_eq!(decoded.frame_type, FrameType::AddFlow);
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xEE);
        buf.put_u8(0);
        buf.put_u16(4);
        let err = Frame::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, NetMeterError::UnknownFrameType(0xEE)));
    }

    #[test]
    fn length_below_header_rejected() {
        assert!(Frame::validate_length(2, 100).is_err());
    }

    #[test]
    fn length_above_buffer_rejected() {
        assert!(Frame::validate_length(10, 5).is_err());
    }

    #[test]
    fn peek_length_needs_full_header() {
        assert_eq!(Frame::peek_length(&[1, 2]), None);
        assert_eq!(Frame::peek_length(&[1, 0, 0, 10]), Some(10));
    }
}
