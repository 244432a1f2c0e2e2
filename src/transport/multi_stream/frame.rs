//! Internal wire format for the multi-stream transport's software
//! multiplexing layer.
//!
//! A `MultiStreamMessage` flow group shares one reliable byte connection
//! (see `transport/multi_stream/mod.rs`). On top of that connection this
//! module runs a small per-stream ARQ protocol so that independent
//! `StreamID`s can each get their own ordered-or-not, reliable-or-not
//! delivery, mirroring what a real one-to-many SCTP association gives for
//! free. These frames never reach the wire directly; they are themselves
//! carried as the payload of the outer TLV envelope (`crate::frame::Frame`)
//! so that the framed reader's byte-oriented reassembly still applies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NetMeterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MuxFrameType {
    Data = 0x01,
    Fin = 0x02,
    Rst = 0x03,
}

impl TryFrom<u8> for MuxFrameType {
    type Error = NetMeterError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MuxFrameType::Data),
            0x02 => Ok(MuxFrameType::Fin),
            0x03 => Ok(MuxFrameType::Rst),
            other => Err(NetMeterError::UnknownFrameType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuxDataFlags(pub u8);

impl MuxDataFlags {
    pub const NONE: Self = Self(0x00);
    pub const ORDERED: Self = Self(0x01);
    pub const RELIABLE: Self = Self(0x02);

    pub fn contains(self, flag: MuxDataFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn from_bools(ordered: bool, reliable: bool) -> Self {
        let mut bits = 0u8;
        if ordered {
            bits |= Self::ORDERED.0;
        }
        if reliable {
            bits |= Self::RELIABLE.0;
        }
        Self(bits)
    }
}

/// One internal multiplexer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxFrame {
    Data {
        stream_id: u16,
        seq: u32,
        flags: MuxDataFlags,
        payload: Bytes,
    },
    Fin {
        stream_id: u16,
    },
    Rst {
        stream_id: u16,
        error_code: u16,
    },
}

impl MuxFrame {
    pub fn stream_id(&self) -> u16 {
        match self {
            MuxFrame::Data { stream_id, .. } => *stream_id,
            MuxFrame::Fin { stream_id } => *stream_id,
            MuxFrame::Rst { stream_id, .. } => *stream_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            MuxFrame::Data {
                stream_id,
                seq,
                flags,
                payload,
            } => {
                buf.put_u8(MuxFrameType::Data as u8);
                buf.put_u16(*stream_id);
                buf.put_u32(*seq);
                buf.put_u8(flags.0);
                buf.extend_from_slice(payload);
            }
            MuxFrame::Fin { stream_id } => {
                buf.put_u8(MuxFrameType::Fin as u8);
                buf.put_u16(*stream_id);
            }
            MuxFrame::Rst { stream_id, error_code } => {
                buf.put_u8(MuxFrameType::Rst as u8);
                buf.put_u16(*stream_id);
                buf.put_u16(*error_code);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(NetMeterError::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        }
        let frame_type = MuxFrameType::try_from(buf[0])?;
        buf.advance(1);
        match frame_type {
            MuxFrameType::Data => {
                if buf.len() < 7 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 7,
                        actual: buf.len(),
                    });
                }
                let stream_id = buf.get_u16();
                let seq = buf.get_u32();
                let flags = MuxDataFlags(buf.get_u8());
                Ok(MuxFrame::Data {
                    stream_id,
                    seq,
                    flags,
                    payload: buf,
                })
            }
            MuxFrameType::Fin => {
                if buf.len() < 2 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 2,
                        actual: buf.len(),
                    });
                }
                Ok(MuxFrame::Fin {
                    stream_id: buf.get_u16(),
                })
            }
            MuxFrameType::Rst => {
                if buf.len() < 4 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 4,
                        actual: buf.len(),
                    });
                }
                let stream_id = buf.get_u16();
                let error_code = buf.get_u16();
                Ok(MuxFrame::Rst {
                    stream_id,
                    error_code,
                })
            }
        }
    }
}
