//! Per-association stream table for the multi-stream transport.
//!
//! `StreamID`s on this transport are assigned by `flow.rs` (contiguous from
//! 0 in creation order, per spec.md §3.4) rather than by the multiplexer
//! itself, so unlike a generic stream-multiplexing layer this one takes the
//! id as a parameter on `create_stream` instead of generating it.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::delivery::DeliveryMode;
use crate::transport::multi_stream::frame::{MuxDataFlags, MuxFrame};
use crate::transport::multi_stream::stream::{Stream, StreamState};

pub struct Multiplexer {
    streams: HashMap<u16, Stream>,
    max_streams: u32,
}

impl Multiplexer {
    pub fn new(max_streams: u32) -> Self {
        Self {
            streams: HashMap::new(),
            max_streams,
        }
    }

    pub fn create_stream(&mut self, id: u16, mode: DeliveryMode) -> Result<()> {
        if self.streams.contains_key(&id) {
            return Err(NetMeterError::StreamAlreadyExists(id as u32));
        }
        if self.streams.len() as u32 >= self.max_streams {
            return Err(NetMeterError::MaxStreamsExceeded(self.max_streams));
        }
        let mut stream = Stream::new(id, mode);
        stream.open()?;
        self.streams.insert(id, stream);
        Ok(())
    }

    pub fn send(&mut self, stream_id: u16, data: Bytes) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(NetMeterError::StreamNotFound(stream_id as u32))?;
        stream.send(data)
    }

    pub fn recv(&mut self, stream_id: u16) -> Result<Option<Bytes>> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(NetMeterError::StreamNotFound(stream_id as u32))?;
        Ok(stream.recv())
    }

    pub fn drain_frames(&mut self) -> Vec<MuxFrame> {
        let mut frames = Vec::new();
        for stream in self.streams.values_mut() {
            frames.extend(stream.drain_frames());
        }
        frames
    }

    pub fn close_stream(&mut self, stream_id: u16) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(NetMeterError::StreamNotFound(stream_id as u32))?;
        stream.close()
    }

    /// Dispatch one inbound internal frame to its stream. An unseen
    /// `stream_id` on a `Data` frame is the normal way a stream comes
    /// into existence on the receiving side -- `ADD_FLOW` tells the
    /// passive peer the flow's identity but never touches this
    /// association's stream table, so the first data frame is the only
    /// signal this side gets that a sibling stream was opened. The
    /// delivery mode is read off the frame's own flags rather than
    /// guessed, since the sender already picked it from its
    /// `ordered_mode`/`reliable_mode` draws (spec.md §4.H/§9).
    pub fn poll(&mut self, frame: &MuxFrame) -> Result<()> {
        let stream_id = frame.stream_id();
        if let MuxFrame::Data { flags, .. } = frame {
            if !self.streams.contains_key(&stream_id) {
                let mode = DeliveryMode::from_draws(
                    flags.contains(MuxDataFlags::ORDERED),
                    flags.contains(MuxDataFlags::RELIABLE),
                );
                self.create_stream(stream_id, mode)?;
            }
        }
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(NetMeterError::StreamNotFound(stream_id as u32))?;
        match frame {
            MuxFrame::Data { .. } => stream.transport_receive(frame),
            MuxFrame::Fin { .. } => {
                stream.remote_close();
                Ok(())
            }
            MuxFrame::Rst { .. } => {
                stream.reset();
                self.streams.remove(&stream_id);
                Ok(())
            }
        }
    }

    pub fn remove_closed_streams(&mut self) {
        self.streams.retain(|_, s| s.state() != StreamState::Closed);
    }

    pub fn get_stream(&self, stream_id: u16) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_stream_mut(&mut self, stream_id: u16) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| s.state() != StreamState::Closed)
            .count()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_send_recv() {
        let mut mux = Multiplexer::new(100);
        mux.create_stream(0, DeliveryMode::BestEffort).unwrap();
        mux.send(0, Bytes::from_static(b"hello")).unwrap();
        let frames = mux.drain_frames();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn dispatch_incoming_data() {
        let mut mux = Multiplexer::new(100);
        mux.create_stream(0, DeliveryMode::ReliableOrdered).unwrap();
        let frame = MuxFrame::Data {
            stream_id: 0,
            seq: 0,
            flags: crate::transport::multi_stream::frame::MuxDataFlags::NONE,
            payload: Bytes::from_static(b"incoming"),
        };
        mux.poll(&frame).unwrap();
        let data = mux.recv(0).unwrap().unwrap();
        assert_eq!(&data[..], b"incoming");
    }

    #[test]
    fn max_streams_enforced() {
        let mut mux = Multiplexer::new(2);
        mux.create_stream(0, DeliveryMode::BestEffort).unwrap();
        mux.create_stream(1, DeliveryMode::BestEffort).unwrap();
        assert!(mux.create_stream(2, DeliveryMode::BestEffort).is_err());
    }

    #[test]
    fn rst_removes_stream_from_map() {
        let mut mux = Multiplexer::new(100);
        mux.create_stream(0, DeliveryMode::ReliableOrdered).unwrap();
        let frame = MuxFrame::Rst {
            stream_id: 0,
            error_code: 42,
        };
        mux.poll(&frame).unwrap();
        assert_eq!(mux.stream_count(), 0);
    }

    #[test]
    fn remove_closed_streams_cleans_up() {
        let mut mux = Multiplexer::new(100);
        mux.create_stream(0, DeliveryMode::ReliableOrdered).unwrap();
        mux.close_stream(0).unwrap();
        assert_eq!(mux.stream_count(), 1);
        mux.poll(&MuxFrame::Fin { stream_id: 0 }).unwrap();
        mux.remove_closed_streams();
        assert_eq!(mux.stream_count(), 0);
    }

    #[test]
    fn duplicate_stream_id_rejected() {
        let mut mux = Multiplexer::new(100);
        mux.create_stream(0, DeliveryMode::BestEffort).unwrap();
        assert!(mux.create_stream(0, DeliveryMode::BestEffort).is_err());
    }

    #[test]
    fn unknown_stream_id_on_data_creates_receiving_stream() {
        let mut mux = Multiplexer::new(100);
        let frame = MuxFrame::Data {
            stream_id: 3,
            seq: 0,
            flags: MuxDataFlags::from_bools(true, true),
            payload: Bytes::from_static(b"sibling"),
        };
        mux.poll(&frame).unwrap();
        assert_eq!(mux.stream_count(), 1);
        let data = mux.recv(3).unwrap().unwrap();
        assert_eq!(&data[..], b"sibling");
        assert_eq!(mux.get_stream(3).unwrap().mode(), DeliveryMode::ReliableOrdered);
    }

    #[test]
    fn unknown_stream_respects_max_streams() {
        let mut mux = Multiplexer::new(0);
        let frame = MuxFrame::Data {
            stream_id: 0,
            seq: 0,
            flags: MuxDataFlags::NONE,
            payload: Bytes::from_static(b"x"),
        };
        assert!(mux.poll(&frame).is_err());
    }
}
