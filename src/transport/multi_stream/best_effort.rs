//! Best-effort delivery for one internal multi-stream sub-stream:
//! fire-and-forget, no retransmission, no ordering.

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::delivery::{DeliveryReceiver, DeliverySender};
use crate::transport::multi_stream::frame::{MuxDataFlags, MuxFrame};

pub struct BestEffortSender {
    next_seq: u32,
}

impl BestEffortSender {
    pub fn new() -> Self {
        Self { next_seq: 0 }
    }
}

impl Default for BestEffortSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySender for BestEffortSender {
    fn send(&mut self, stream_id: u16, data: Bytes) -> Result<Vec<MuxFrame>> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(vec![MuxFrame::Data {
            stream_id,
            seq,
            flags: MuxDataFlags::NONE,
            payload: data,
        }])
    }

    fn on_ack(&mut self, _seq: u32) {}

    fn retransmit(&mut self) -> Vec<MuxFrame> {
        Vec::new()
    }
}

pub struct BestEffortReceiver;

impl BestEffortReceiver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BestEffortReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryReceiver for BestEffortReceiver {
    fn receive(&mut self, frame: &MuxFrame) -> Result<Vec<Bytes>> {
        match frame {
            MuxFrame::Data { payload, .. } => Ok(vec![payload.clone()]),
            _ => Err(NetMeterError::Internal(
                "BestEffortReceiver received non-data frame".into(),
            )),
        }
    }
}
