//! Per-connection TLV reassembly state machine (spec.md §4.C).
//!
//! Grounded in the original meter's `messagereader.cc` `Socket` struct
//! (`MessageBuffer`/`BytesRead`/`MessageSize`/`Status`), translated into
//! safe Rust with `bytes::BytesMut` standing in for the raw buffer. One
//! `FramedReader` is shared by the scheduler across every registered
//! handle; each handle gets its own `ReaderState`.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::{NetMeterError, Result};
use crate::frame::HEADER_LEN;
use crate::transport::{Handle, RecvFlags};

/// Per-handle reassembly state.
#[derive(Debug)]
enum ReaderState {
    WaitingForHeader,
    PartialRead { message_size: usize },
    StreamError,
}

/// Outcome of one `FramedReader::feed` call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A full message was assembled; `n` bytes consumed to produce it.
    Complete(Bytes),
    /// Not enough bytes yet; the caller re-polls.
    Partial,
    /// A notification record was delivered (multi-stream transport only);
    /// surfaced but never treated as a data frame.
    Notification(Bytes),
    /// Framing was violated; the handle must be torn down.
    StreamError(NetMeterError),
    BadSocket,
}

struct SocketState {
    state: ReaderState,
    buf: BytesMut,
}

impl SocketState {
    fn new() -> Self {
        Self {
            state: ReaderState::WaitingForHeader,
            buf: BytesMut::new(),
        }
    }
}

/// Reassembles bytes from any transport into complete TLV messages,
/// per spec.md §4.C's four read paths.
pub struct FramedReader {
    sockets: HashMap<Handle, SocketState>,
    max_message_size: usize,
}

impl FramedReader {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            sockets: HashMap::new(),
            max_message_size,
        }
    }

    pub fn register(&mut self, handle: Handle) {
        self.sockets.insert(handle, SocketState::new());
    }

    pub fn deregister(&mut self, handle: Handle) {
        self.sockets.remove(&handle);
    }

    fn socket_mut(&mut self, handle: Handle) -> Option<&mut SocketState> {
        self.sockets.get_mut(&handle)
    }

    /// Byte-oriented path (spec.md §4.C.1): accumulate `chunk` for `handle`
    /// and attempt to drain as many complete messages as are now buffered.
    /// Returns one outcome per call; callers that want to drain multiple
    /// buffered messages call repeatedly until `Partial` comes back.
    pub fn feed_bytes(&mut self, handle: Handle, chunk: &[u8]) -> ReadOutcome {
        let max = self.max_message_size;
        let Some(sock) = self.socket_mut(handle) else {
            return ReadOutcome::BadSocket;
        };
        if matches!(sock.state, ReaderState::StreamError) {
            return ReadOutcome::BadSocket;
        }
        sock.buf.extend_from_slice(chunk);
        Self::drain_one(sock, max)
    }

    /// Attempt to drain one more complete message from bytes already
    /// buffered (no new bytes arrive). Used by the scheduler to catch up
    /// on messages pipelined in a single read.
    pub fn drain_buffered(&mut self, handle: Handle) -> ReadOutcome {
        let max = self.max_message_size;
        let Some(sock) = self.socket_mut(handle) else {
            return ReadOutcome::BadSocket;
        };
        if matches!(sock.state, ReaderState::StreamError) {
            return ReadOutcome::BadSocket;
        }
        Self::drain_one(sock, max)
    }

    fn drain_one(sock: &mut SocketState, max_message_size: usize) -> ReadOutcome {
        loop {
            match sock.state {
                ReaderState::WaitingForHeader => {
                    if sock.buf.len() < HEADER_LEN {
                        return ReadOutcome::Partial;
                    }
                    let length = match crate::frame::Frame::peek_length(&sock.buf) {
                        Some(l) => l,
                        None => return ReadOutcome::Partial,
                    };
                    if length < HEADER_LEN || length > max_message_size {
                        sock.state = ReaderState::StreamError;
                        return ReadOutcome::StreamError(NetMeterError::FrameTooLong {
                            length,
                            buffer_size: max_message_size,
                        });
                    }
                    sock.state = ReaderState::PartialRead { message_size: length };
                }
                ReaderState::PartialRead { message_size } => {
                    if sock.buf.len() < message_size {
                        return ReadOutcome::Partial;
                    }
                    let message = sock.buf.split_to(message_size).freeze();
                    sock.state = ReaderState::WaitingForHeader;
                    return ReadOutcome::Complete(message);
                }
                ReaderState::StreamError => return ReadOutcome::BadSocket,
            }
        }
    }

    /// Message-oriented path (spec.md §4.C.2/3): one transport read already
    /// produced exactly one record; validate it as a TLV (data transports)
    /// or pass it through opaquely (notifications on the multi-stream
    /// transport).
    pub fn feed_message(&mut self, handle: Handle, data: &[u8], flags: RecvFlags) -> ReadOutcome {
        if self.sockets.get(&handle).is_none() {
            return ReadOutcome::BadSocket;
        }
        if flags.notification {
            return ReadOutcome::Notification(Bytes::copy_from_slice(data));
        }
        if !flags.end_of_record {
            // A multi-stream record that doesn't end where the transport
            // record ends is a framing violation (spec.md §4.C.3).
            if let Some(sock) = self.sockets.get_mut(&handle) {
                sock.state = ReaderState::StreamError;
            }
            return ReadOutcome::StreamError(NetMeterError::RecordBoundaryViolation(
                "record ended before end-of-record flag".into(),
            ));
        }
        let length = match crate::frame::Frame::peek_length(data) {
            Some(l) => l,
            None => {
                return ReadOutcome::StreamError(NetMeterError::FrameTooShort {
                    expected: HEADER_LEN,
                    actual: data.len(),
                });
            }
        };
        if length != data.len() {
            if let Some(sock) = self.sockets.get_mut(&handle) {
                sock.state = ReaderState::StreamError;
            }
            return ReadOutcome::StreamError(NetMeterError::RecordBoundaryViolation(format!(
                "TLV length {length} does not match record length {}",
                data.len()
            )));
        }
        if length < HEADER_LEN || length > self.max_message_size {
            if let Some(sock) = self.sockets.get_mut(&handle) {
                sock.state = ReaderState::StreamError;
            }
            return ReadOutcome::StreamError(NetMeterError::FrameTooLong {
                length,
                buffer_size: self.max_message_size,
            });
        }
        ReadOutcome::Complete(Bytes::copy_from_slice(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn valid_frame(payload_len: usize) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u8(0x00);
        buf.put_u16((HEADER_LEN + payload_len) as u16);
        buf.extend_from_slice(&vec![0xAB; payload_len]);
        buf.freeze()
    }

    #[test]
    fn delivers_one_message_fed_whole() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let frame = valid_frame(10);
        match r.feed_bytes(h, &frame) {
            ReadOutcome::Complete(msg) => assert_eq!(msg, frame),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn reassembles_across_arbitrary_byte_splits() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let frame = valid_frame(500);
        // Feed one byte at a time: the hardest possible partition.
        let mut delivered = None;
        for b in frame.iter() {
            match r.feed_bytes(h, &[*b]) {
                ReadOutcome::Complete(msg) => {
                    delivered = Some(msg);
                }
                ReadOutcome::Partial => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(delivered.unwrap(), frame);
    }

    #[test]
    fn delivers_two_messages_pipelined_in_one_chunk() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let f1 = valid_frame(10);
        let f2 = valid_frame(20);
        let mut combined = BytesMut::new();
        combined.extend_from_slice(&f1);
        combined.extend_from_slice(&f2);

        match r.feed_bytes(h, &combined) {
            ReadOutcome::Complete(msg) => assert_eq!(msg, f1),
            other => panic!("expected Complete, got {other:?}"),
        }
        match r.drain_buffered(h) {
            ReadOutcome::Complete(msg) => assert_eq!(msg, f2),
            other => panic!("expected Complete, got {other:?}"),
        }
        assert!(matches!(r.drain_buffered(h), ReadOutcome::Partial));
    }

    #[test]
    fn length_below_header_is_stream_error() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u8(0x00);
        buf.put_u16(2);
        assert!(matches!(r.feed_bytes(h, &buf), ReadOutcome::StreamError(_)));
        assert!(matches!(r.feed_bytes(h, &[0]), ReadOutcome::BadSocket));
    }

    #[test]
    fn length_above_buffer_is_stream_error() {
        let mut r = FramedReader::new(100);
        let h = Handle(0);
        r.register(h);
        let frame = valid_frame(500);
        assert!(matches!(r.feed_bytes(h, &frame), ReadOutcome::StreamError(_)));
    }

    #[test]
    fn message_oriented_datagram_requires_no_state() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let frame = valid_frame(50);
        match r.feed_message(h, &frame, RecvFlags::default()) {
            ReadOutcome::Complete(msg) => assert_eq!(msg, frame),
            other => panic!("expected Complete, got {other:?}"),
        }
        // Independent of previous call: no partial carry-over.
        let frame2 = valid_frame(5);
        match r.feed_message(h, &frame2, RecvFlags::default()) {
            ReadOutcome::Complete(msg) => assert_eq!(msg, frame2),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn notification_passes_through_opaquely() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let flags = RecvFlags {
            end_of_record: true,
            notification: true,
        };
        match r.feed_message(h, b"not-a-tlv", flags) {
            ReadOutcome::Notification(data) => assert_eq!(&data[..], b"not-a-tlv"),
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn multi_stream_record_boundary_mismatch_is_stream_error() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        let frame = valid_frame(50);
        let flags = RecvFlags {
            end_of_record: false,
            notification: false,
        };
        assert!(matches!(
            r.feed_message(h, &frame, flags),
            ReadOutcome::StreamError(_)
        ));
    }

    #[test]
    fn multi_stream_length_not_matching_record_is_stream_error() {
        let mut r = FramedReader::new(65536);
        let h = Handle(0);
        r.register(h);
        // TLV claims 50 total bytes but the record handed to us is shorter.
        let frame = valid_frame(50);
        let short = &frame[..frame.len() - 10];
        let flags = RecvFlags {
            end_of_record: true,
            notification: false,
        };
        assert!(matches!(
            r.feed_message(h, short, flags),
            ReadOutcome::StreamError(_)
        ));
    }
}
