//! Traffic receiver (spec.md §4.G): resolves an inbound TLV to its flow
//! and updates counters, creating a mirror flow lazily for connectionless
//! transports on the passive side.
//!
//! Grounded in the original meter's `handleDataMessage()`
//! (`examples/original_source/src/netperfmeter.cc`).

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::warn;

use crate::clock::Distribution;
use crate::flow::{Association, Counters, FlowSpec, FlowTable, Protocol, RateSize};
use crate::frame::HEADER_LEN;
use crate::transport::{Handle, StreamId};

/// One resolved, counter-updated delivery. The caller may ignore the
/// payload (the sender's fill pattern is not receiver-verified, per
/// spec.md §4.F.2) but must still have routed it to the right flow.
pub struct Delivery {
    pub measurement_id: u64,
    pub flow_id: u32,
}

/// Handles one complete TLV delivered by the framed reader for `handle`.
/// `payload` is the TLV's application payload (header already stripped by
/// `Frame::decode`); `rx_bytes` is incremented by the whole frame
/// (header + payload) to match what the sender counted. `packets` counts
/// the underlying transport read events the caller has observed since the
/// last call (normally 1; the framed reader may deliver more than one
/// message per underlying read, in which case the caller passes 1 only on
/// the read that produced bytes and 0 on subsequent drains from the same
/// buffer).
pub fn on_data_frame(
    table: &mut FlowTable,
    handle: Handle,
    stream_id: StreamId,
    source: Option<SocketAddr>,
    now: u64,
    packets: u64,
    payload: Bytes,
) -> Option<Delivery> {
    let payload_len = payload.len() as u64; // content itself is unverified (spec.md §4.F.2)

    let flow = if let Some(f) = table.by_handle_stream_mut(handle, stream_id) {
        Some(f)
    } else if let Some(addr) = source {
        if table.by_source_addr_mut(addr).is_none() {
            mirror_flow_for_source(table, handle, addr, now);
        }
        table.by_source_addr_mut(addr)
    } else {
        None
    };

    let Some(flow) = flow else {
        warn!(?handle, stream_id, "no flow found for inbound frame, dropping");
        return None;
    };

    if flow.counters.first_reception == 0 {
        flow.counters.first_reception = now;
    }
    flow.counters.last_reception = now;
    flow.counters.rx_packets += packets;
    flow.counters.rx_bytes += HEADER_LEN as u64 + payload_len;
    flow.counters.rx_frames += 1;

    Some(Delivery {
        measurement_id: flow.measurement_id,
        flow_id: flow.flow_id,
    })
}

/// Lazily materialise a mirror flow for a connectionless passive-side
/// peer never seen before (spec.md §4.G.1). A minimal placeholder flow is
/// created so that subsequent frames from the same source resolve to it;
/// real parameter negotiation happens through the control channel
/// (`ADD_FLOW`), which is expected to have already registered the proper
/// flow in the byte-oriented/multi-stream case. This path only fires for
/// the plain `Datagram`/`CongestionControlledDatagram` transports, which
/// carry no control channel of their own.
fn mirror_flow_for_source(table: &mut FlowTable, handle: Handle, addr: SocketAddr, now: u64) {
    let flow_id = table.len() as u32;
    let mut flow = FlowSpec::new(
        0,
        flow_id,
        0,
        format!("mirror:{addr}"),
        Protocol::Datagram,
        RateSize {
            rate: Distribution::Constant(0.0),
            size: Distribution::Constant(0.0),
        },
        RateSize {
            rate: Distribution::Constant(0.0),
            size: Distribution::Constant(0.0),
        },
        0.0,
        0.0,
        vec![],
    );
    flow.association = Association {
        handle: Some(handle),
        owns_handle: false,
        remote_association_id: None,
        remote_addr_bound: true,
    };
    flow.source_addr = Some(addr);
    flow.counters = Counters::default();
    let _ = now;
    table.insert(flow);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Distribution;
    use crate::flow::{Association, RateSize};

    fn rs(v: f64) -> RateSize {
        RateSize {
            rate: Distribution::Constant(v),
            size: Distribution::Constant(v),
        }
    }

    #[test]
    fn resolves_existing_flow_by_handle_and_stream() {
        let mut table = FlowTable::new();
        let handle = Handle(1);
        let mut flow = FlowSpec::new(
            1, 2, 0, "f".into(), Protocol::ReliableStream,
            rs(10.0), rs(10.0), 0.0, 0.0, vec![],
        );
        flow.association = Association {
            handle: Some(handle),
            owns_handle: true,
            remote_association_id: None,
            remote_addr_bound: false,
        };
        table.insert(flow);

        let delivery = on_data_frame(&mut table, handle, 0, None, 100, 1, Bytes::from_static(b"x"));
        assert!(delivery.is_some());
        let d = delivery.unwrap();
        assert_eq!(d.measurement_id, 1);
        assert_eq!(d.flow_id, 2);

        let flow = table.by_handle_stream(handle, 0).unwrap();
        assert_eq!(flow.counters.rx_frames, 1);
        assert_eq!(flow.counters.first_reception, 100);
        assert_eq!(flow.counters.last_reception, 100);
    }

    #[test]
    fn unresolvable_without_source_returns_none() {
        let mut table = FlowTable::new();
        let delivery = on_data_frame(&mut table, Handle(9), 0, None, 1, 1, Bytes::new());
        assert!(delivery.is_none());
    }

    #[test]
    fn creates_mirror_flow_for_unknown_datagram_source() {
        let mut table = FlowTable::new();
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let handle = Handle(3);
        let delivery = on_data_frame(&mut table, handle, 0, Some(addr), 5, 1, Bytes::new());
        assert!(delivery.is_some());
        assert!(table.by_source_addr(addr).is_some());
    }

    #[test]
    fn second_frame_from_same_source_reuses_mirror_flow() {
        let mut table = FlowTable::new();
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let handle = Handle(3);
        on_data_frame(&mut table, handle, 0, Some(addr), 5, 1, Bytes::new());
        on_data_frame(&mut table, handle, 0, Some(addr), 6, 1, Bytes::new());
        assert_eq!(table.len(), 1);
        let flow = table.by_source_addr(addr).unwrap();
        assert_eq!(flow.counters.rx_frames, 2);
    }
}
