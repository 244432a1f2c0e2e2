//! Single-threaded, cooperative, poll-driven event loop (spec.md §4.E).
//!
//! Grounded in the original meter's `mainLoop()`
//! (`examples/original_source/src/netperfmeter.cc`): the five-step
//! iteration structure, the deadline-merge-into-one-poll-timeout idiom,
//! and the ≤1s paced-sender catch-up cap are all lifted from that
//! function, rebuilt around `mio::Poll` (grounded via the s2n-quic
//! platform precedent in the retrieval pack for `mio`+`socket2` in this
//! exact space) instead of a raw `poll(2)` array.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use mio::{Events, Poll};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::control::{AckPayload, AckStatus, ControlMessage, ControlStateMachine};
use crate::flow::{FlowSpec, FlowTable, Protocol};
use crate::frame::{Frame, FrameType};
use crate::reader::{FramedReader, ReadOutcome};
use crate::receiver;
use crate::sender;
use crate::stats::StatisticsWriter;
use crate::transport::cc_datagram::CcDatagramTransport;
use crate::transport::datagram::DatagramTransport;
use crate::transport::multi_stream::MultiStreamTransport;
use crate::transport::reliable_stream::ReliableStreamTransport;
use crate::transport::{Handle, RecvOutcome, Transport};

/// Non-overlapping token-base ranges handed to each transport's
/// `with_base` constructor so their independently-allocated handles never
/// collide as `mio::Token`s on the one shared `Poll`.
mod token_base {
    pub const RELIABLE: usize = 0x1000_0000;
    pub const DATAGRAM: usize = 0x2000_0000;
    pub const MULTI_STREAM: usize = 0x3000_0000;
    pub const CC_DATAGRAM: usize = 0x4000_0000;
    pub const CONTROL: usize = 0x5000_0000;
}

/// What kind of registered handle a `Token` refers to, so the dispatch
/// step (spec.md §4.E.3) knows how to route a readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Control,
    Listener(Protocol),
    Connection(Protocol),
}

/// Whether `run` returned because the stop deadline was reached or
/// because the control channel was lost on the active side (spec.md §7's
/// `abort` error kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    StopReached,
    ControlAborted,
}

pub struct Scheduler {
    pub flows: FlowTable,
    reader: FramedReader,
    poll: Poll,
    events: Events,
    roles: HashMap<Handle, Role>,
    reliable: ReliableStreamTransport,
    datagram: DatagramTransport,
    multi_stream: MultiStreamTransport,
    cc_datagram: Option<CcDatagramTransport>,
    control: MultiStreamTransport,
    control_handle: Option<Handle>,
    control_sm: ControlStateMachine,
    active_mode: bool,
    pub measurement_id: u64,
    stats: StatisticsWriter,
    max_msg_size: usize,
    rng: StdRng,
    /// Pending control requests the active side is waiting on an ACK for.
    /// Spec.md §4.H: "the active peer must not issue the next request until
    /// the previous ACK arrives" -- a depth-1 queue enforces that.
    awaiting_ack: Option<FrameType>,
}

impl Scheduler {
    pub fn new(active_mode: bool, max_msg_size: usize, stats: StatisticsWriter, seed: u64) -> std::io::Result<Self> {
        Ok(Self {
            flows: FlowTable::new(),
            reader: FramedReader::new(max_msg_size),
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            roles: HashMap::new(),
            reliable: ReliableStreamTransport::with_base(token_base::RELIABLE),
            datagram: DatagramTransport::with_base(token_base::DATAGRAM),
            multi_stream: MultiStreamTransport::with_base(token_base::MULTI_STREAM),
            cc_datagram: None,
            control: MultiStreamTransport::with_base(token_base::CONTROL),
            control_handle: None,
            control_sm: ControlStateMachine::new(),
            active_mode,
            measurement_id: 0,
            stats,
            max_msg_size,
            rng: StdRng::seed_from_u64(seed),
            awaiting_ack: None,
        })
    }

    /// Passive side: stand up the control listener on `data_port + 1` and
    /// one data listener per supported protocol on `data_port` (spec.md
    /// §6). The DCCP listener is skipped, not fatal, if the host lacks it
    /// (spec.md §6: "last may be absent if the OS lacks it").
    pub fn listen_passive(&mut self, bind_addr: SocketAddr, data_port: u16) -> std::io::Result<()> {
        let control_addr = SocketAddr::new(bind_addr.ip(), data_port + 1);
        let control_handle = self.control.listen(self.poll.registry(), control_addr)?;
        self.roles.insert(control_handle, Role::Listener(Protocol::MultiStreamMessage));
        self.control_handle = Some(control_handle);

        // Connectionless transports have no `accept()` step: the listening
        // socket IS the data-receiving socket, so it needs a framed-reader
        // registration just like a connected handle would (spec.md §4.G.1).
        let data_addr = SocketAddr::new(bind_addr.ip(), data_port);
        let h = self.reliable.listen(self.poll.registry(), data_addr)?;
        self.roles.insert(h, Role::Listener(Protocol::ReliableStream));
        let h = self.datagram.listen(self.poll.registry(), data_addr)?;
        self.roles.insert(h, Role::Listener(Protocol::Datagram));
        self.reader.register(h);
        let h = self.multi_stream.listen(self.poll.registry(), data_addr)?;
        self.roles.insert(h, Role::Listener(Protocol::MultiStreamMessage));

        let mut cc = CcDatagramTransport::with_base(token_base::CC_DATAGRAM);
        match cc.listen(self.poll.registry(), data_addr) {
            Ok(h) => {
                self.roles.insert(h, Role::Listener(Protocol::CongestionControlledDatagram));
                self.reader.register(h);
                self.cc_datagram = Some(cc);
            }
            Err(e) => {
                info!(error = %e, "congestion-controlled datagram transport unavailable on this host, skipping listener");
            }
        }
        Ok(())
    }

    /// Active side: open the control association to `remote:data_port+1`.
    pub fn connect_active(&mut self, remote: SocketAddr, data_port: u16) -> std::io::Result<()> {
        let control_addr = SocketAddr::new(remote.ip(), data_port + 1);
        let handle = self.control.connect(self.poll.registry(), control_addr)?;
        self.roles.insert(handle, Role::Connection(Protocol::MultiStreamMessage));
        self.reader.register(handle);
        self.control_handle = Some(handle);
        Ok(())
    }

    /// Fires one transmission for the flow at `idx`, dispatching to its
    /// bound transport. Takes an index rather than a borrowed `FlowSpec`
    /// so the per-flow loop in `run_once` never has to keep a `&mut
    /// FlowSpec` alive across this call: destructuring `self` into its
    /// fields here gives the flow lookup and the transport/`rng` borrows
    /// disjoint, ordinary lifetimes -- no raw pointers needed.
    fn fire_flow(&mut self, idx: usize, now: u64) -> std::io::Result<bool> {
        let max_msg_size = self.max_msg_size;
        let Scheduler {
            flows,
            reliable,
            datagram,
            multi_stream,
            cc_datagram,
            rng,
            ..
        } = self;
        let flow = flows.get_mut(idx);
        match flow.protocol {
            Protocol::ReliableStream => sender::fire(flow, reliable, max_msg_size, now, rng),
            Protocol::Datagram => sender::fire(flow, datagram, max_msg_size, now, rng),
            Protocol::MultiStreamMessage => sender::fire(flow, multi_stream, max_msg_size, now, rng),
            Protocol::CongestionControlledDatagram => {
                let cc = cc_datagram
                    .as_mut()
                    .expect("CongestionControlledDatagram transport requested but unavailable");
                sender::fire(flow, cc, max_msg_size, now, rng)
            }
        }
    }

    fn transport_for(&mut self, protocol: Protocol) -> &mut dyn Transport {
        match protocol {
            Protocol::ReliableStream => &mut self.reliable,
            Protocol::Datagram => &mut self.datagram,
            Protocol::MultiStreamMessage => &mut self.multi_stream,
            Protocol::CongestionControlledDatagram => self
                .cc_datagram
                .as_mut()
                .expect("CongestionControlledDatagram transport requested but unavailable"),
        }
    }

    /// Open an outbound connection for a new flow the active side is
    /// creating (spec.md §3.5 "Create"), registering it with the framed
    /// reader for byte-oriented transports. Lazily stands up the
    /// congestion-controlled datagram transport on first use, mirroring
    /// `listen_passive`'s on-demand probe -- the active side has no other
    /// occasion to learn whether the host's kernel has it.
    pub fn open_flow_connection(&mut self, protocol: Protocol, remote: SocketAddr) -> std::io::Result<Handle> {
        if matches!(protocol, Protocol::CongestionControlledDatagram) && self.cc_datagram.is_none() {
            self.cc_datagram = Some(CcDatagramTransport::with_base(token_base::CC_DATAGRAM));
        }
        let handle = self.transport_for(protocol).connect(self.poll.registry(), remote)?;
        self.roles.insert(handle, Role::Connection(protocol));
        if !matches!(protocol, Protocol::MultiStreamMessage) {
            self.reader.register(handle);
        }
        Ok(handle)
    }

    /// `START_MEAS`: resets every flow's counters, sets `base_time`, and
    /// starts the statistics snapshot clock (spec.md §3.5).
    pub fn start_measurement(&mut self, measurement_id: u64, now: u64) {
        self.measurement_id = measurement_id;
        for flow in self.flows.iter_mut() {
            if flow.measurement_id == measurement_id {
                flow.start_measurement(now, &mut self.rng);
            }
        }
        self.stats.start(now);
    }

    /// `STOP_MEAS`: freezes counters (no further action needed -- nothing
    /// mutates them once the flow's status stops producing/consuming
    /// traffic) and emits the scalar summary (spec.md §3.5/§4.I).
    pub fn stop_measurement(&mut self, measurement_id: u64) -> std::io::Result<()> {
        let mut matching: Vec<&FlowSpec> = self
            .flows
            .iter()
            .filter(|f| f.measurement_id == measurement_id)
            .collect();
        self.stats.write_scalar_summary(&mut matching.drain(..))?;
        Ok(())
    }

    /// One iteration of the loop, per spec.md §4.E's five numbered steps.
    /// Returns `Some(LoopExit)` once the loop should stop.
    pub fn run_once(&mut self, clock: &dyn Clock, stop_at: u64) -> std::io::Result<Option<LoopExit>> {
        let mut now = clock.now_micros();

        // ---- Step 1/2: compute next deadlines, set interest, poll -------
        let mut next_status_change = u64::MAX;
        let mut next_transmission = u64::MAX;
        for flow in self.flows.iter_mut() {
            flow.schedule_next_status_change(now);
            next_status_change = next_status_change.min(flow.next_status_change_event);
            if matches!(flow.status, crate::flow::FlowStatus::On) && !sender::is_saturated(flow) {
                flow.schedule_next_transmission(now, &mut self.rng);
                next_transmission = next_transmission.min(flow.next_transmission_event);
            }
        }
        let next_deadline = next_status_change
            .min(next_transmission)
            .min(self.stats.next_event)
            .min(stop_at);
        let timeout_micros = next_deadline.saturating_sub(now);
        let timeout = std::time::Duration::from_micros(timeout_micros);

        self.poll.poll(&mut self.events, Some(timeout))?;
        now = clock.now_micros();

        // ---- Step 3a: control channel ------------------------------------
        let control_tokens: Vec<Handle> = self
            .events
            .iter()
            .map(|e| Handle::from(e.token()))
            .filter(|h| matches!(self.roles.get(h), Some(Role::Control) | Some(Role::Connection(Protocol::MultiStreamMessage)))
                && Some(*h) == self.control_handle)
            .collect();
        for handle in control_tokens {
            if !self.poll_control(handle, now)? {
                return Ok(Some(LoopExit::ControlAborted));
            }
        }

        // ---- Step 3b: listening handles (accept) -------------------------
        let listener_events: Vec<(Handle, Protocol)> = self
            .events
            .iter()
            .filter_map(|e| {
                let h = Handle::from(e.token());
                match self.roles.get(&h) {
                    Some(Role::Listener(p)) => Some((h, *p)),
                    _ => None,
                }
            })
            .collect();
        for (listener, protocol) in listener_events {
            if Some(listener) == self.control_handle {
                self.accept_control(listener)?;
                continue;
            }
            if protocol.is_connectionless() {
                // No accept step: the listening socket is the data socket.
                self.poll_data(listener, protocol, now)?;
                continue;
            }
            if let Some((handle, _peer)) = self.transport_for(protocol).accept(self.poll.registry(), listener)? {
                self.roles.insert(handle, Role::Connection(protocol));
                if !matches!(protocol, Protocol::MultiStreamMessage) {
                    self.reader.register(handle);
                }
                debug!(?handle, ?protocol, "accepted new connection");
            }
        }

        // ---- Step 3c: readable connections (data) ------------------------
        let data_events: Vec<(Handle, Protocol)> = self
            .events
            .iter()
            .filter_map(|e| {
                let h = Handle::from(e.token());
                match self.roles.get(&h) {
                    Some(Role::Connection(p)) if Some(h) != self.control_handle => Some((h, *p)),
                    _ => None,
                }
            })
            .collect();
        for (handle, protocol) in data_events {
            self.poll_data(handle, protocol, now)?;
        }

        // ---- Step 3d: per-flow status change + transmission --------------
        // Driven by index rather than a held `&mut FlowSpec`: `fire_flow`
        // needs `&mut self` to reach the transport/rng fields, so each
        // flow is looked up fresh from `self.flows` on either side of a
        // firing instead of keeping one borrow alive across the call.
        let ids: Vec<usize> = (0..self.flows.len()).collect();
        for idx in ids {
            let is_on = {
                let flow = self.flows.get_mut(idx);
                flow.status_change_event(now);
                matches!(flow.status, crate::flow::FlowStatus::On)
            };
            if !is_on {
                continue;
            }
            let (saturated, handle, protocol) = {
                let flow = self.flows.get_mut(idx);
                (sender::is_saturated(flow), flow.association.handle, flow.protocol)
            };
            if saturated {
                let writable = handle
                    .map(|h| self.transport_for(protocol).wants_write(h))
                    .unwrap_or(true);
                if writable {
                    let _ = self.fire_flow(idx, now);
                }
            } else if self.flows.get_mut(idx).next_transmission_event <= now {
                let last_event = self.flows.get_mut(idx).counters.last_transmission;
                loop {
                    let sent = self.fire_flow(idx, now)?;
                    if !sent {
                        break;
                    }
                    // Catch-up cap (spec.md §4.E.3.d / §5): once the gap
                    // since the last successful transmission exceeds 1s,
                    // stop trying to correct -- the system is lagging
                    // badly and flooding would make it worse.
                    if now.saturating_sub(last_event) > 1_000_000 {
                        break;
                    }
                    let flow = self.flows.get_mut(idx);
                    flow.schedule_next_transmission(now, &mut self.rng);
                    if flow.next_transmission_event > now {
                        break;
                    }
                }
            }
        }

        // ---- Step 4: stop-time ------------------------------------------
        if now >= stop_at {
            return Ok(Some(LoopExit::StopReached));
        }

        // ---- Step 5: statistics snapshot ---------------------------------
        if self.stats.next_event <= now {
            self.stats.snapshot(&mut self.flows.iter_mut(), now)?;
        }

        Ok(None)
    }

    /// Drive `run_once` until it reports the loop should stop. Returns
    /// `false` only on control-channel abort on the active side (spec.md
    /// §7), mirroring the original's `mainLoop` boolean return.
    pub fn run(&mut self, clock: &dyn Clock, stop_at: u64, should_continue: &dyn Fn() -> bool) -> std::io::Result<bool> {
        while should_continue() {
            match self.run_once(clock, stop_at)? {
                Some(LoopExit::StopReached) => return Ok(true),
                Some(LoopExit::ControlAborted) => return Ok(!self.active_mode),
                None => continue,
            }
        }
        Ok(true)
    }

    fn accept_control(&mut self, listener: Handle) -> std::io::Result<()> {
        if let Some((handle, _peer)) = self.control.accept(self.poll.registry(), listener)? {
            self.roles.insert(handle, Role::Connection(Protocol::MultiStreamMessage));
            self.control_handle = Some(handle);
            debug!(?handle, "accepted control association");
        }
        Ok(())
    }

    /// Read and dispatch one batch of control messages. Returns `false` if
    /// the control channel is lost (spec.md §7's `abort` kind).
    fn poll_control(&mut self, handle: Handle, now: u64) -> std::io::Result<bool> {
        let mut buf = [0u8; 65536];
        loop {
            match self.control.recv(handle, &mut buf) {
                Ok(RecvOutcome::Data { n, flags, .. }) => {
                    if flags.notification {
                        continue;
                    }
                    let frame = match Frame::decode(bytes::Bytes::copy_from_slice(&buf[..n])) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(error = %e, "malformed control frame, dropping");
                            continue;
                        }
                    };
                    self.dispatch_control(frame, now)?;
                }
                Ok(RecvOutcome::WouldBlock) => return Ok(true),
                Ok(RecvOutcome::Closed) => {
                    warn!("control channel closed");
                    return Ok(!self.active_mode);
                }
                Err(e) => {
                    warn!(error = %e, "control channel read error");
                    return Ok(!self.active_mode);
                }
            }
        }
    }

    fn dispatch_control(&mut self, frame: Frame, now: u64) -> std::io::Result<()> {
        let referenced_type = frame.frame_type;
        let message = match ControlMessage::decode(&frame) {
            Ok(m) => m,
            Err(_) => {
                self.send_ack(referenced_type, AckStatus::Unsupported)?;
                return Ok(());
            }
        };
        match message {
            ControlMessage::AddFlow(p) => {
                let status = self.control_sm.on_add_flow();
                if matches!(status, AckStatus::Ok) {
                    self.materialise_remote_flow(p);
                }
                self.send_ack(FrameType::AddFlow, status)?;
            }
            ControlMessage::RemoveFlow(_p) => {
                let status = self.control_sm.on_remove_flow();
                self.send_ack(FrameType::RemoveFlow, status)?;
            }
            ControlMessage::StartMeas(p) => {
                let status = self.control_sm.on_start_meas();
                self.start_measurement(p.measurement_id, now);
                self.send_ack(FrameType::StartMeas, status)?;
            }
            ControlMessage::StopMeas(p) => {
                let status = self.control_sm.on_stop_meas();
                self.stop_measurement(p.measurement_id)?;
                self.send_ack(FrameType::StopMeas, status)?;
                self.control_sm.reset();
            }
            ControlMessage::Ack(p) => {
                if self.awaiting_ack == Some(p.referenced_type) {
                    self.awaiting_ack = None;
                }
            }
        }
        Ok(())
    }

    /// Send a control request and arm `awaiting_ack` so the caller can block
    /// until the peer's `ACK` arrives (spec.md §4.H's lock-step requirement),
    /// polled for via repeated `run_once` calls from the driving binary.
    pub fn send_control_request(&mut self, message: ControlMessage) -> std::io::Result<()> {
        let Some(handle) = self.control_handle else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "no control association"));
        };
        let frame = message.encode();
        let referenced_type = frame.frame_type;
        let encoded = frame.encode();
        self.control.send(handle, &encoded, 0, true, true)?;
        self.awaiting_ack = Some(referenced_type);
        Ok(())
    }

    /// `None` once the most recent `send_control_request`'s `ACK` has been
    /// observed by `dispatch_control`.
    pub fn awaiting_ack(&self) -> Option<FrameType> {
        self.awaiting_ack
    }

    /// Flush and close the statistics sinks. Called once after the run loop
    /// returns, on both sides (spec.md §4.I).
    pub fn close(&mut self) -> std::io::Result<()> {
        self.stats.close()
    }

    fn send_ack(&mut self, referenced_type: FrameType, status: AckStatus) -> std::io::Result<()> {
        let Some(handle) = self.control_handle else {
            return Ok(());
        };
        let msg = ControlMessage::Ack(AckPayload { referenced_type, status });
        let frame = msg.encode();
        let encoded = frame.encode();
        self.control.send(handle, &encoded, 0, true, true)?;
        Ok(())
    }

    /// Passive-side mirror flow created from an `ADD_FLOW` (spec.md §3.5
    /// "Register remote"). Parameters are taken from the request; the
    /// socket binding happens lazily when the first data frame arrives
    /// (connectionless transports) or was already accepted (stream/
    /// multi-stream transports, matched by creation order).
    fn materialise_remote_flow(&mut self, p: crate::control::AddFlowPayload) {
        let flow = FlowSpec::new(
            p.measurement_id,
            p.flow_id,
            p.stream_id,
            p.description,
            p.protocol,
            crate::flow::RateSize {
                rate: p.outbound_rate,
                size: p.outbound_size,
            },
            crate::flow::RateSize {
                rate: p.inbound_rate,
                size: p.inbound_size,
            },
            p.ordered_mode,
            p.reliable_mode,
            p.on_off_events,
        );
        self.flows.insert(flow);
    }

    /// One readiness-driven read on a data connection: byte-oriented
    /// transports accumulate through the framed reader; message-oriented
    /// transports deliver complete records directly (spec.md §4.C).
    fn poll_data(&mut self, handle: Handle, protocol: Protocol, now: u64) -> std::io::Result<()> {
        let mut buf = [0u8; 65536];
        loop {
            let outcome = self.transport_for(protocol).recv(handle, &mut buf)?;
            match outcome {
                RecvOutcome::WouldBlock => return Ok(()),
                RecvOutcome::Closed => {
                    self.teardown_handle(handle, protocol);
                    return Ok(());
                }
                RecvOutcome::Data { n, source, stream_id, flags } => {
                    if protocol.is_stream_oriented_kind() {
                        let read_outcome = self.reader.feed_bytes(handle, &buf[..n]);
                        self.handle_read_outcome(handle, protocol, stream_id, source, now, read_outcome, true);
                        loop {
                            let more = self.reader.drain_buffered(handle);
                            if matches!(more, ReadOutcome::Partial) {
                                break;
                            }
                            self.handle_read_outcome(handle, protocol, stream_id, source, now, more, false);
                        }
                    } else if matches!(protocol, Protocol::MultiStreamMessage) {
                        // The multi-stream transport already reassembles
                        // internally; what it hands back is one complete
                        // TLV-encoded record, the same shape `feed_bytes`
                        // would have produced.
                        let read_outcome = ReadOutcome::Complete(Bytes::copy_from_slice(&buf[..n]));
                        self.handle_read_outcome(handle, protocol, stream_id, source, now, read_outcome, true);
                    } else {
                        let read_outcome = self.reader.feed_message(handle, &buf[..n], flags);
                        self.handle_read_outcome(handle, protocol, stream_id, source, now, read_outcome, true);
                    }
                }
            }
        }
    }

    fn handle_read_outcome(
        &mut self,
        handle: Handle,
        protocol: Protocol,
        stream_id: crate::transport::StreamId,
        source: Option<SocketAddr>,
        now: u64,
        outcome: ReadOutcome,
        counts_as_packet: bool,
    ) {
        match outcome {
            ReadOutcome::Complete(encoded) => {
                let frame = match Frame::decode(encoded) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(?handle, error = %e, "malformed TLV, tearing down handle");
                        self.teardown_handle(handle, protocol);
                        return;
                    }
                };
                if !matches!(frame.frame_type, crate::frame::FrameType::Data) {
                    return;
                }
                receiver::on_data_frame(
                    &mut self.flows,
                    handle,
                    stream_id,
                    source,
                    now,
                    if counts_as_packet { 1 } else { 0 },
                    frame.payload,
                );
            }
            ReadOutcome::Notification(_) => {}
            ReadOutcome::Partial => {}
            ReadOutcome::StreamError(e) => {
                warn!(?handle, error = %e, "framing error, tearing down handle");
                self.teardown_handle(handle, protocol);
            }
            ReadOutcome::BadSocket => {}
        }
    }

    fn teardown_handle(&mut self, handle: Handle, protocol: Protocol) {
        self.transport_for(protocol).close(self.poll.registry(), handle);
        self.reader.deregister(handle);
        self.roles.remove(&handle);
    }
}

impl Protocol {
    /// Byte-oriented transports need the framed reader's accumulate-until-
    /// header-then-body state machine (spec.md §4.C.1); message-oriented
    /// ones deliver one record per read.
    fn is_stream_oriented_kind(self) -> bool {
        matches!(self, Protocol::ReliableStream)
    }

    /// Datagram-family transports have no `accept()` step: the listening
    /// socket itself is where inbound traffic arrives.
    fn is_connectionless(self) -> bool {
        matches!(self, Protocol::Datagram | Protocol::CongestionControlledDatagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Distribution, ManualClock};
    use crate::flow::RateSize;
    use crate::stats::{MemorySink, StatisticsWriter, DEFAULT_SNAPSHOT_PERIOD_MICROS};

    fn rs(rate: f64, size: f64) -> RateSize {
        RateSize {
            rate: Distribution::Constant(rate),
            size: Distribution::Constant(size),
        }
    }

    #[test]
    fn deadline_merge_picks_earliest() {
        let stats = StatisticsWriter::new(Some(Box::new(MemorySink::default())), None, DEFAULT_SNAPSHOT_PERIOD_MICROS);
        let mut sched = Scheduler::new(true, 65536, stats, 1).unwrap();
        sched.stats.start(0);

        let mut flow = FlowSpec::new(1, 1, 0, "t".into(), Protocol::ReliableStream, rs(10.0, 100.0), rs(0.0, 0.0), 0.0, 0.0, vec![1000]);
        flow.start_measurement(0, &mut rand::thread_rng());
        sched.flows.insert(flow);

        let clock = ManualClock::new(0);
        // No sockets registered; poll should still return promptly because
        // the computed timeout is bounded by the nearest flow deadline.
        let outcome = sched.run_once(&clock, 10_000_000);
        assert!(outcome.is_ok());
    }

    #[test]
    fn stop_at_reached_ends_loop() {
        let stats = StatisticsWriter::new(None, None, DEFAULT_SNAPSHOT_PERIOD_MICROS);
        let mut sched = Scheduler::new(true, 65536, stats, 1).unwrap();
        let clock = ManualClock::new(10);
        let outcome = sched.run_once(&clock, 5).unwrap();
        assert_eq!(outcome, Some(LoopExit::StopReached));
    }
}
