//! One internal sub-stream of a multi-stream flow group.
//!
//! Combines a `DeliverySender`/`DeliveryReceiver` pair (picked by the flow's
//! `ordered_mode`/`reliable_mode` Bernoulli draws) with a small state
//! machine and an application-facing receive queue.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::best_effort::{BestEffortReceiver, BestEffortSender};
use crate::transport::multi_stream::delivery::{DeliveryMode, DeliveryReceiver, DeliverySender};
use crate::transport::multi_stream::frame::MuxFrame;
use crate::transport::multi_stream::probabilistic::{ProbabilisticReceiver, ProbabilisticSender};
use crate::transport::multi_stream::reliable_ordered::{
    ReliableOrderedReceiver, ReliableOrderedSender,
};
use crate::transport::multi_stream::reliable_unordered::{
    ReliableUnorderedReceiver, ReliableUnorderedSender,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Idle => write!(f, "Idle"),
            StreamState::Open => write!(f, "Open"),
            StreamState::HalfClosedLocal => write!(f, "HalfClosedLocal"),
            StreamState::HalfClosedRemote => write!(f, "HalfClosedRemote"),
            StreamState::Closed => write!(f, "Closed"),
        }
    }
}

pub struct Stream {
    id: u16,
    mode: DeliveryMode,
    state: StreamState,
    sender: Box<dyn DeliverySender>,
    receiver: Box<dyn DeliveryReceiver>,
    pending_frames: Vec<MuxFrame>,
    recv_buf: VecDeque<Bytes>,
}

impl Stream {
    pub fn new(id: u16, mode: DeliveryMode) -> Self {
        let (sender, receiver): (Box<dyn DeliverySender>, Box<dyn DeliveryReceiver>) = match mode
        {
            DeliveryMode::ReliableOrdered => (
                Box::new(ReliableOrderedSender::new()),
                Box::new(ReliableOrderedReceiver::new()),
            ),
            DeliveryMode::ReliableUnordered => (
                Box::new(ReliableUnorderedSender::new()),
                Box::new(ReliableUnorderedReceiver::new()),
            ),
            DeliveryMode::BestEffort => (
                Box::new(BestEffortSender::new()),
                Box::new(BestEffortReceiver::new()),
            ),
            DeliveryMode::Probabilistic => (
                Box::new(ProbabilisticSender::new()),
                Box::new(ProbabilisticReceiver::new(0.5)),
            ),
        };
        Self {
            id,
            mode,
            state: StreamState::Idle,
            sender,
            receiver,
            pending_frames: Vec::new(),
            recv_buf: VecDeque::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn open(&mut self) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = StreamState::Open;
                Ok(())
            }
            _ => Err(NetMeterError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "Open".into(),
            }),
        }
    }

    pub fn send(&mut self, data: Bytes) -> Result<()> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote => {
                let frames = self.sender.send(self.id, data)?;
                self.pending_frames.extend(frames);
                Ok(())
            }
            StreamState::HalfClosedLocal | StreamState::Closed => {
                Err(NetMeterError::StreamClosed(self.id as u32))
            }
            StreamState::Idle => Err(NetMeterError::InvalidStateTransition {
                from: "Idle".into(),
                to: "send".into(),
            }),
        }
    }

    pub fn recv(&mut self) -> Option<Bytes> {
        self.recv_buf.pop_front()
    }

    pub fn transport_receive(&mut self, frame: &MuxFrame) -> Result<()> {
        let payloads = self.receiver.receive(frame)?;
        self.recv_buf.extend(payloads);
        Ok(())
    }

    pub fn drain_frames(&mut self) -> Vec<MuxFrame> {
        std::mem::take(&mut self.pending_frames)
    }

    pub fn on_ack(&mut self, seq: u32) {
        self.sender.on_ack(seq);
    }

    pub fn retransmit(&mut self) -> Vec<MuxFrame> {
        self.sender.retransmit()
    }

    pub fn close(&mut self) -> Result<()> {
        match self.state {
            StreamState::Open => {
                self.state = StreamState::HalfClosedLocal;
                Ok(())
            }
            StreamState::HalfClosedRemote => {
                self.state = StreamState::Closed;
                Ok(())
            }
            StreamState::Closed | StreamState::HalfClosedLocal => Ok(()),
            StreamState::Idle => Err(NetMeterError::InvalidStateTransition {
                from: "Idle".into(),
                to: "Closed".into(),
            }),
        }
    }

    pub fn remote_close(&mut self) {
        match self.state {
            StreamState::Open => self.state = StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => self.state = StreamState::Closed,
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.pending_frames.clear();
        self.recv_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut s = Stream::new(1, DeliveryMode::ReliableOrdered);
        assert_eq!(s.state(), StreamState::Idle);
        s.open().unwrap();
        assert_eq!(s.state(), StreamState::Open);
        s.close().unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        s.remote_close();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn send_produces_frames() {
        let mut s = Stream::new(1, DeliveryMode::ReliableOrdered);
        s.open().unwrap();
        s.send(Bytes::from_static(b"data")).unwrap();
        let frames = s.drain_frames();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn cannot_send_when_half_closed_local() {
        let mut s = Stream::new(1, DeliveryMode::ReliableOrdered);
        s.open().unwrap();
        s.close().unwrap();
        assert!(s.send(Bytes::from_static(b"fail")).is_err());
    }

    #[test]
    fn reset_clears_buffers() {
        let mut s = Stream::new(1, DeliveryMode::ReliableOrdered);
        s.open().unwrap();
        s.send(Bytes::from_static(b"data")).unwrap();
        s.reset();
        assert_eq!(s.state(), StreamState::Closed);
        assert!(s.drain_frames().is_empty());
    }

    #[test]
    fn on_ack_clears_retransmit_buffer() {
        let mut s = Stream::new(1, DeliveryMode::ReliableOrdered);
        s.open().unwrap();
        s.send(Bytes::from_static(b"A")).unwrap();
        s.send(Bytes::from_static(b"B")).unwrap();
        assert_eq!(s.retransmit().len(), 2);
        s.on_ack(0);
        assert_eq!(s.retransmit().len(), 1);
    }
}
