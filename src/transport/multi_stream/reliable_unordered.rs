//! Reliable, unordered (exactly-once) delivery for one internal multi-stream
//! sub-stream.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::delivery::{DeliveryReceiver, DeliverySender};
use crate::transport::multi_stream::frame::{MuxDataFlags, MuxFrame};

const DELIVERED_GC_THRESHOLD: usize = 1024;
const DELIVERED_GC_DISCARD: usize = 512;

pub struct ReliableUnorderedSender {
    next_seq: u32,
    send_buffer: BTreeMap<u32, MuxFrame>,
}

impl ReliableUnorderedSender {
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

impl Default for ReliableUnorderedSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySender for ReliableUnorderedSender {
    fn send(&mut self, stream_id: u16, data: Bytes) -> Result<Vec<MuxFrame>> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = MuxFrame::Data {
            stream_id,
            seq,
            flags: MuxDataFlags::from_bools(false, true),
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

/// Delivers frames immediately; `delivered` enforces exactly-once semantics
/// and is garbage-collected once it grows past `DELIVERED_GC_THRESHOLD`.
pub struct ReliableUnorderedReceiver {
    delivered: BTreeSet<u32>,
}

impl ReliableUnorderedReceiver {
    pub fn new() -> Self {
        Self {
            delivered: BTreeSet::new(),
        }
    }

    fn gc(&mut self) {
        let to_remove: Vec<u32> = self
            .delivered
            .iter()
            .copied()
            .take(DELIVERED_GC_DISCARD)
            .collect();
        for seq in to_remove {
            self.delivered.remove(&seq);
        }
    }

    #[cfg(test)]
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

impl Default for ReliableUnorderedReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryReceiver for ReliableUnorderedReceiver {
    fn receive(&mut self, frame: &MuxFrame) -> Result<Vec<Bytes>> {
        match frame {
            MuxFrame::Data { seq, payload, .. } => {
                if self.delivered.insert(*seq) {
                    if self.delivered.len() >= DELIVERED_GC_THRESHOLD {
                        self.gc();
                    }
                    Ok(vec![payload.clone()])
                } else {
                    Ok(vec![])
                }
            }
            _ => Err(NetMeterError::Internal(
                "ReliableUnorderedReceiver received non-data frame".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_delivery() {
        let mut sender = ReliableUnorderedSender::new();
        let mut receiver = ReliableUnorderedReceiver::new();

        let f1 = sender.send(1, Bytes::from_static(b"B")).unwrap();
        let f0 = sender.send(1, Bytes::from_static(b"A")).unwrap();

        let d = receiver.receive(&f1[0]).unwrap();
        assert_eq!(&d[0][..], b"B");
        let d = receiver.receive(&f0[0]).unwrap();
        assert_eq!(&d[0][..], b"A");
    }

    #[test]
    fn dedup_duplicates() {
        let mut sender = ReliableUnorderedSender::new();
        let mut receiver = ReliableUnorderedReceiver::new();

        let f = sender.send(1, Bytes::from_static(b"X")).unwrap();
        assert_eq!(receiver.receive(&f[0]).unwrap().len(), 1);
        assert!(receiver.receive(&f[0]).unwrap().is_empty());
    }

    #[test]
    fn gc_bounds_delivered_set() {
        let mut receiver = ReliableUnorderedReceiver::new();
        let limit = DELIVERED_GC_THRESHOLD + 1;
        for seq in 0..limit as u32 {
            let frame = MuxFrame::Data {
                stream_id: 1,
                seq,
                flags: MuxDataFlags::NONE,
                payload: Bytes::from_static(b"x"),
            };
            assert_eq!(receiver.receive(&frame).unwrap().len(), 1);
        }
        assert!(receiver.delivered_count() < DELIVERED_GC_THRESHOLD);
    }

    #[test]
    fn gc_does_not_drop_recent_duplicates() {
        let mut receiver = ReliableUnorderedReceiver::new();
        for seq in 0..DELIVERED_GC_THRESHOLD as u32 {
            let frame = MuxFrame::Data {
                stream_id: 1,
                seq,
                flags: MuxDataFlags::NONE,
                payload: Bytes::from_static(b"x"),
            };
            receiver.receive(&frame).unwrap();
        }
        let high_seq = (DELIVERED_GC_THRESHOLD - 1) as u32;
        let dup = MuxFrame::Data {
            stream_id: 1,
            seq: high_seq,
            flags: MuxDataFlags::NONE,
            payload: Bytes::from_static(b"dup"),
        };
        assert!(receiver.receive(&dup).unwrap().is_empty());
    }
}
