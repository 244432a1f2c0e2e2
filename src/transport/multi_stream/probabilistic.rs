//! Probabilistic delivery -- used only for the receiver side of frames that
//! drew `reliable=false` on an otherwise lossy path emulation; the sender
//! side behaves identically to best-effort.

use bytes::Bytes;

use crate::error::{NetMeterError, Result};
use crate::transport::multi_stream::delivery::{DeliveryReceiver, DeliverySender};
use crate::transport::multi_stream::frame::{MuxDataFlags, MuxFrame};

pub struct ProbabilisticSender {
    next_seq: u32,
}

impl ProbabilisticSender {
    pub fn new() -> Self {
        Self { next_seq: 0 }
    }
}

impl Default for ProbabilisticSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySender for ProbabilisticSender {
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

/// Accepts each frame independently with probability `p`.
pub struct ProbabilisticReceiver {
    probability: f64,
}

impl ProbabilisticReceiver {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl DeliveryReceiver for ProbabilisticReceiver {
    fn receive(&mut self, frame: &MuxFrame) -> Result<Vec<Bytes>> {
        match frame {
            MuxFrame::Data { payload, .. } => {
                if rand::random::<f64>() < self.probability {
                    Ok(vec![payload.clone()])
                } else {
                    Ok(vec![])
                }
            }
            _ => Err(NetMeterError::Internal(
                "ProbabilisticReceiver received non-data frame".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_one_always_delivers() {
        let mut sender = ProbabilisticSender::new();
        let mut receiver = ProbabilisticReceiver::new(1.0);
        for _ in 0..100 {
            let f = sender.send(1, Bytes::from_static(b"data")).unwrap();
            assert_eq!(receiver.receive(&f[0]).unwrap().len(), 1);
        }
    }

    #[test]
    fn probability_zero_never_delivers() {
        let mut sender = ProbabilisticSender::new();
        let mut receiver = ProbabilisticReceiver::new(0.0);
        for _ in 0..100 {
            let f = sender.send(1, Bytes::from_static(b"data")).unwrap();
            assert!(receiver.receive(&f[0]).unwrap().is_empty());
        }
    }

    #[test]
    fn probability_delivers_roughly_expected_ratio() {
        let mut sender = ProbabilisticSender::new();
        let mut receiver = ProbabilisticReceiver::new(0.5);
        let trials = 10_000;
        let mut delivered = 0usize;
        for _ in 0..trials {
            let f = sender.send(1, Bytes::from_static(b"d")).unwrap();
            delivered += receiver.receive(&f[0]).unwrap().len();
        }
        let ratio = delivered as f64 / trials as f64;
        assert!((0.40..=0.60).contains(&ratio), "ratio {ratio} out of range");
    }
}
