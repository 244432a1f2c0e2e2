//! Delivery-mode traits shared by the four per-stream behaviours a
//! multi-stream flow group can pick between (reliable-ordered,
//! reliable-unordered, best-effort, probabilistic). Each inbound message on
//! the `MultiStreamMessage` transport independently draws `ordered` and
//! `reliable` Bernoulli trials from the flow's `ordered_mode`/`reliable_mode`
//! probabilities (spec.md §3.2); the sender/receiver pair installed on a
//! stream is selected once at stream-creation time from those draws.

use bytes::Bytes;

use crate::error::Result;
use crate::transport::multi_stream::frame::MuxFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryMode {
    ReliableOrdered = 0x01,
    ReliableUnordered = 0x02,
    BestEffort = 0x03,
    Probabilistic = 0x04,
}

impl DeliveryMode {
    /// Pick the mode implied by a pair of Bernoulli draws. Reliable and
    /// ordered together means in-order ARQ; reliable alone means ARQ without
    /// reordering; neither means best-effort.
    pub fn from_draws(ordered: bool, reliable: bool) -> Self {
        match (ordered, reliable) {
            (true, true) => DeliveryMode::ReliableOrdered,
            (false, true) => DeliveryMode::ReliableUnordered,
            _ => DeliveryMode::BestEffort,
        }
    }
}

pub trait DeliverySender: Send {
    fn send(&mut self, stream_id: u16, data: Bytes) -> Result<Vec<MuxFrame>>;
    fn on_ack(&mut self, seq: u32);
    fn retransmit(&mut self) -> Vec<MuxFrame>;
}

pub trait DeliveryReceiver: Send {
    fn receive(&mut self, frame: &MuxFrame) -> Result<Vec<Bytes>>;
}
