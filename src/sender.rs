//! Traffic sender (spec.md §4.F): builds one TLV data frame per firing and
//! writes it through the flow's transport, honouring saturated vs paced
//! pacing and the multi-stream per-message reliability draws.
//!
//! Grounded in the original meter's `transmitFrame()`
//! (`examples/original_source/src/netperfmeter.cc`), reworked around the
//! `Transport` trait instead of a raw `send()`/`sendto()` call.

use rand::Rng;

use crate::clock::Distribution;
use crate::flow::{FlowSpec, Protocol};
use crate::frame::{Frame, HEADER_LEN};
use crate::transport::Transport;

/// Lower/upper bound a configured `max_msg_size` is clamped to, per
/// spec.md §4.F.4.
pub const MIN_MAX_MSG_SIZE: usize = 128;
pub const MAX_MAX_MSG_SIZE: usize = 65536;

pub fn clamp_max_msg_size(requested: usize) -> usize {
    requested.clamp(MIN_MAX_MSG_SIZE, MAX_MAX_MSG_SIZE)
}

/// Fills `buf` with a well-defined but arbitrary pattern (spec.md §4.F.2:
/// "implementers choose; the pattern is not verified by the receiver").
fn fill_pattern(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
}

/// Attempt one transmission firing for `flow`. Returns `Ok(true)` if a
/// whole TLV frame was written, `Ok(false)` if the firing was aborted on
/// `would-block` (spec.md §4.F.6 -- not an error, the poll loop retries),
/// and `Err` on a genuine transport error.
pub fn fire(
    flow: &mut FlowSpec,
    transport: &mut dyn Transport,
    max_msg_size: usize,
    now: u64,
    rng: &mut impl Rng,
) -> std::io::Result<bool> {
    let Some(handle) = flow.association.handle else {
        return Ok(false);
    };

    let sampled = flow.outbound.size.sample(rng);
    let size = (sampled.max(HEADER_LEN as f64)) as usize;
    let payload_len = size - HEADER_LEN;
    let mut payload = vec![0u8; payload_len];
    fill_pattern(&mut payload);
    let frame = Frame::data(payload.into(), false);
    let encoded = frame.encode();

    let (ordered, reliable) = if matches!(flow.protocol, Protocol::MultiStreamMessage) {
        (
            rng.gen_bool(flow.ordered_mode.clamp(0.0, 1.0)),
            rng.gen_bool(flow.reliable_mode.clamp(0.0, 1.0)),
        )
    } else {
        (true, true)
    };

    // Message-oriented transports (datagram, multi-stream) deliver one
    // write as one atomic record -- splitting it across multiple sends
    // would violate the multi-stream record-boundary invariant (spec.md
    // §4.C.3) and would simply produce extra unrelated datagrams on UDP.
    // Only byte-oriented transports get chunked across `max_msg_size`
    // writes (spec.md §4.F.4).
    let chunk_cap = if transport.is_message_oriented() {
        encoded.len().max(1)
    } else {
        clamp_max_msg_size(max_msg_size)
    };
    let mut offset = 0usize;
    while offset < encoded.len() {
        let end = (offset + chunk_cap).min(encoded.len());
        match transport.send(handle, &encoded[offset..end], flow.stream_id, ordered, reliable) {
            Ok(n) if n > 0 => {
                if flow.counters.first_transmission == 0 {
                    flow.counters.first_transmission = now;
                }
                flow.counters.last_transmission = now;
                flow.counters.tx_packets += 1;
                flow.counters.tx_bytes += n as u64;
                offset += n;
            }
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }

    if offset >= encoded.len() {
        flow.counters.tx_frames += 1;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Whether a flow's outbound parameters make it a saturated sender
/// (spec.md's glossary: rate ≈ 0, size > 0).
pub fn is_saturated(flow: &FlowSpec) -> bool {
    matches!(flow.outbound.rate, Distribution::Constant(r) if r <= 0.0)
        && !matches!(flow.outbound.size, Distribution::Constant(s) if s <= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Distribution;
    use crate::flow::{Protocol, RateSize};
    use crate::transport::reliable_stream::ReliableStreamTransport;
    use crate::transport::Transport;
    use mio::Poll;
    use rand::{rngs::StdRng, SeedableRng};

    fn rs(rate: f64, size: f64) -> RateSize {
        RateSize {
            rate: Distribution::Constant(rate),
            size: Distribution::Constant(size),
        }
    }

    #[test]
    fn clamp_max_msg_size_respects_bounds() {
        assert_eq!(clamp_max_msg_size(10), MIN_MAX_MSG_SIZE);
        assert_eq!(clamp_max_msg_size(1_000_000), MAX_MAX_MSG_SIZE);
        assert_eq!(clamp_max_msg_size(4096), 4096);
    }

    #[test]
    fn fill_pattern_is_deterministic() {
        let mut a = vec![0u8; 300];
        let mut b = vec![0u8; 300];
        fill_pattern(&mut a);
        fill_pattern(&mut b);
        assert_eq!(a, b);
        assert_eq!(a[0], 0);
        assert_eq!(a[256], 0);
        assert_eq!(a[257], 1);
    }

    #[test]
    fn is_saturated_requires_zero_rate_and_positive_size() {
        let mut f = crate::flow::FlowSpec::new(
            1, 1, 0, "t".into(), Protocol::ReliableStream,
            rs(0.0, 1400.0), rs(0.0, 0.0), 0.0, 0.0, vec![],
        );
        f.association.handle = Some(crate::transport::Handle(0));
        assert!(is_saturated(&f));
        f.outbound.size = Distribution::Constant(0.0);
        assert!(!is_saturated(&f));
    }

    #[test]
    fn fire_over_loopback_tcp_delivers_full_frame() {
        let mut poll = Poll::new().unwrap();

        // mio doesn't expose the bound port through the Transport trait;
        // grab a free one straight from std before handing the address to
        // the transport under test.
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        drop(std_listener);

        let mut server2 = ReliableStreamTransport::new();
        let server_handle = server2.listen(poll.registry(), addr).unwrap();
        let mut client = ReliableStreamTransport::new();
        let client_handle = client.connect(poll.registry(), addr).unwrap();

        let mut events = mio::Events::with_capacity(8);
        poll.poll(&mut events, Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let accepted = loop {
            if let Some(pair) = server2.accept(poll.registry(), server_handle).unwrap() {
                break pair;
            }
            poll.poll(&mut events, Some(std::time::Duration::from_millis(50)))
                .unwrap();
        };
        let (server_conn, _peer) = accepted;

        let mut flow = crate::flow::FlowSpec::new(
            1, 1, 0, "t".into(), Protocol::ReliableStream,
            rs(0.0, 100.0), rs(0.0, 0.0), 0.0, 0.0, vec![],
        );
        flow.association.handle = Some(client_handle);

        let mut rng = StdRng::seed_from_u64(1);
        let sent = fire(&mut flow, &mut client, 65536, 1, &mut rng).unwrap();
        assert!(sent);
        assert_eq!(flow.counters.tx_frames, 1);
        assert_eq!(flow.counters.tx_bytes, 100);
        assert_eq!(flow.counters.first_transmission, 1);

        poll.poll(&mut events, Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 200];
        let outcome = server2.recv(server_conn, &mut buf).unwrap();
        match outcome {
            crate::transport::RecvOutcome::Data { n, .. } => assert_eq!(n, 100),
            _ => panic!("expected data"),
        }
    }
}
