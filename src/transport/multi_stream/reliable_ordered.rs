//! Reliable, in-order delivery for one internal multi-stream sub-stream.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::delivery::{DeliveryReceiver, DeliverySender};
use crate::transport::multi_stream::frame::{MuxDataFlags, MuxFrame};

pub struct ReliableOrderedSender {
    next_seq: u32,
    send_buffer: BTreeMap<u32, MuxFrame>,
}

impl ReliableOrderedSender {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            send_buffer: BTreeMap::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.send_buffer.len()
    }
}

impl Default for ReliableOrderedSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySender for ReliableOrderedSender {
    fn send(&mut self, stream_id: u16, data: Bytes) -> Result<Vec<MuxFrame>> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = MuxFrame::Data {
            stream_id,
            seq,
            flags: MuxDataFlags::from_bools(true, true),
            payload: data,
        };
        self.send_buffer.insert(seq, frame.clone());
        Ok(vec![frame])
    }

    fn on_ack(&mut self, seq: u32) {
        self.send_buffer.remove(&seq);
    }

    fn retransmit(&mut self) -> Vec<MuxFrame> {
        self.send_buffer.values().cloned().collect()
    }
}

pub struct ReliableOrderedReceiver {
    expected_seq: u32,
    recv_buffer: BTreeMap<u32, Bytes>,
}

impl ReliableOrderedReceiver {
    pub fn new() -> Self {
        Self {
            expected_seq: 0,
            recv_buffer: BTreeMap::new(),
        }
    }
}

impl Default for ReliableOrderedReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryReceiver for ReliableOrderedReceiver {
    fn receive(&mut self, frame: &MuxFrame) -> Result<Vec<Bytes>> {
        match frame {
            MuxFrame::Data { seq, payload, .. } => {
                self.recv_buffer
                    .entry(*seq)
                    .or_insert_with(|| payload.clone());

                let mut delivered = Vec::new();
                while let Some(data) = self.recv_buffer.remove(&self.expected_seq) {
                    delivered.push(data);
                    self.expected_seq = self.expected_seq.wrapping_add(1);
                }
                Ok(delivered)
            }
            _ => Err(NetMeterError::Internal(
                "ReliableOrderedReceiver received non-data frame".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery() {
        let mut sender = ReliableOrderedSender::new();
        let mut receiver = ReliableOrderedReceiver::new();

        let frames = sender.send(1, Bytes::from_static(b"hello")).unwrap();
        let delivered = receiver.receive(&frames[0]).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(&delivered[0][..], b"hello");
    }

    #[test]
    fn out_of_order_buffering() {
        let mut sender = ReliableOrderedSender::new();
        let mut receiver = ReliableOrderedReceiver::new();

        let f0 = sender.send(1, Bytes::from_static(b"A")).unwrap();
        let f1 = sender.send(1, Bytes::from_static(b"B")).unwrap();
        let f2 = sender.send(1, Bytes::from_static(b"C")).unwrap();

        assert!(receiver.receive(&f1[0]).unwrap().is_empty());
        assert!(receiver.receive(&f2[0]).unwrap().is_empty());

        let d = receiver.receive(&f0[0]).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(&d[0][..], b"A");
        assert_eq!(&d[1][..], b"B");
        assert_eq!(&d[2][..], b"C");
    }

    #[test]
    fn ack_removes_from_send_buffer() {
        let mut sender = ReliableOrderedSender::new();
        sender.send(1, Bytes::from_static(b"A")).unwrap();
        sender.send(1, Bytes::from_static(b"B")).unwrap();
        assert_eq!(sender.in_flight(), 2);
        sender.on_ack(0);
        assert_eq!(sender.in_flight(), 1);
        sender.on_ack(1);
        assert_eq!(sender.in_flight(), 0);
    }
}
