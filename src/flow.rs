//! The flow descriptor (spec.md §3.2) and its per-iteration operations
//! (spec.md §4.D). Grounded in the original meter's `FlowSpec` class
//! (`examples/original_source/src/flowspec.cc`): the schedule/status-change
//! machinery, the counter set, and the four lookup helpers are all lifted
//! from that class, translated into owned Rust collections instead of
//! intrusive linked lists.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use rand::Rng;

use crate::clock::Distribution;
use crate::transport::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeasurementId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(pub u32);

pub type StreamId = u16;

/// One of the four transport protocol selectors a flow can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    ReliableStream,
    Datagram,
    MultiStreamMessage,
    CongestionControlledDatagram,
}

/// Runtime traffic status. Only `On` produces traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    WaitingForStartup,
    On,
    Off,
}

/// Rate + size distribution pair, used for both the outbound (enforced
/// locally) and inbound (advisory, sent to the remote peer) directions.
#[derive(Debug, Clone, Copy)]
pub struct RateSize {
    pub rate: Distribution,
    pub size: Distribution,
}

/// Counters reset at `START_MEAS`, per spec.md §3.2/§3.4.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub first_transmission: u64,
    pub last_transmission: u64,
    pub first_reception: u64,
    pub last_reception: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_frames: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_frames: u64,
    pub snapshot_tx_bytes: u64,
    pub snapshot_tx_frames: u64,
    pub snapshot_rx_bytes: u64,
    pub snapshot_rx_frames: u64,
}

impl Counters {
    /// Deltas since the last statistics snapshot, then updates the snapshot.
    pub fn take_deltas(&mut self) -> (u64, u64, u64, u64) {
        let d = (
            self.tx_bytes - self.snapshot_tx_bytes,
            self.tx_frames - self.snapshot_tx_frames,
            self.rx_bytes - self.snapshot_rx_bytes,
            self.rx_frames - self.snapshot_rx_frames,
        );
        self.snapshot_tx_bytes = self.tx_bytes;
        self.snapshot_tx_frames = self.tx_frames;
        self.snapshot_rx_bytes = self.rx_bytes;
        self.snapshot_rx_frames = self.rx_frames;
        d
    }
}

/// Association/ownership bookkeeping for the socket handle a flow writes
/// to. The *owner* flow of a multi-stream flow group closes the handle;
/// sibling flows only reference it by `StreamID`.
#[derive(Debug, Clone, Copy)]
pub struct Association {
    pub handle: Option<Handle>,
    pub owns_handle: bool,
    pub remote_association_id: Option<u32>,
    pub remote_addr_bound: bool,
}

impl Default for Association {
    fn default() -> Self {
        Self {
            handle: None,
            owns_handle: false,
            remote_association_id: None,
            remote_addr_bound: false,
        }
    }
}

pub struct FlowSpec {
    pub measurement_id: u64,
    pub flow_id: u32,
    pub stream_id: StreamId,
    pub description: String,
    pub protocol: Protocol,
    pub outbound: RateSize,
    pub inbound: RateSize,
    pub ordered_mode: f64,
    pub reliable_mode: f64,
    pub on_off_events: VecDeque<u32>,
    pub base_time: u64,
    pub status: FlowStatus,
    pub association: Association,
    pub source_addr: Option<SocketAddr>,
    pub counters: Counters,
    pub next_status_change_event: u64,
    pub next_transmission_event: u64,
}

impl FlowSpec {
    pub fn new(
        measurement_id: u64,
        flow_id: u32,
        stream_id: StreamId,
        description: String,
        protocol: Protocol,
        outbound: RateSize,
        inbound: RateSize,
        ordered_mode: f64,
        reliable_mode: f64,
        on_off_events: Vec<u32>,
    ) -> Self {
        let mut events: Vec<u32> = on_off_events;
        events.sort_unstable();
        events.dedup();
        Self {
            measurement_id,
            flow_id,
            stream_id,
            description,
            protocol,
            outbound,
            inbound,
            ordered_mode,
            reliable_mode,
            on_off_events: events.into(),
            base_time: 0,
            status: FlowStatus::WaitingForStartup,
            association: Association::default(),
            source_addr: None,
            counters: Counters::default(),
            next_status_change_event: u64::MAX,
            next_transmission_event: u64::MAX,
        }
    }

    /// Called once at `START_MEAS`: resets counters, sets `base_time`, and
    /// puts the flow into its initial `On`/`Off` state per the schedule
    /// (the first event in an ascending schedule always means "turn on",
    /// spec.md §9). Takes the caller's own rng rather than reaching for
    /// the thread-local one, so the whole run stays reproducible from one
    /// seed (spec.md §4.A).
    pub fn start_measurement(&mut self, now: u64, rng: &mut impl Rng) {
        self.reset_statistics();
        self.base_time = now;
        self.status = if self.on_off_events.is_empty() {
            FlowStatus::On
        } else {
            FlowStatus::Off
        };
        self.schedule_next_status_change(now);
        self.schedule_next_transmission(now, rng);
    }

    pub fn reset_statistics(&mut self) {
        self.counters = Counters::default();
    }

    /// spec.md §4.D `schedule_next_status_change`.
    pub fn schedule_next_status_change(&mut self, _now: u64) {
        if matches!(self.status, FlowStatus::WaitingForStartup) || self.on_off_events.is_empty() {
            self.next_status_change_event = u64::MAX;
            return;
        }
        let next_ms = *self.on_off_events.front().unwrap();
        self.next_status_change_event = self.base_time + 1000 * next_ms as u64;
    }

    /// spec.md §4.D `status_change_event`. Returns `true` if a transition
    /// happened.
    pub fn status_change_event(&mut self, now: u64) -> bool {
        if self.next_status_change_event == u64::MAX || now < self.next_status_change_event {
            return false;
        }
        self.status = match self.status {
            FlowStatus::On => FlowStatus::Off,
            FlowStatus::Off => FlowStatus::On,
            FlowStatus::WaitingForStartup => FlowStatus::WaitingForStartup,
        };
        self.on_off_events.pop_front();
        self.schedule_next_status_change(now);
        true
    }

    /// spec.md §4.D `schedule_next_transmission`.
    pub fn schedule_next_transmission(&mut self, now: u64, rng: &mut impl Rng) {
        if !matches!(self.status, FlowStatus::On) {
            self.next_transmission_event = u64::MAX;
            return;
        }
        let rate = self.outbound.rate.sample(rng);
        if rate <= 0.0 {
            // Saturated sender: fires whenever writable, not on a timer.
            self.next_transmission_event = now;
            return;
        }
        let base = if self.counters.last_transmission > 0 {
            self.counters.last_transmission
        } else {
            now
        };
        self.next_transmission_event = base + (1_000_000.0 / rate) as u64;
    }

    pub fn is_saturated(&self) -> bool {
        matches!(self.outbound.rate, Distribution::Constant(r) if r <= 0.0)
            && !matches!(self.outbound.size, Distribution::Constant(s) if s <= 0.0)
    }

    pub fn is_owner(&self) -> bool {
        self.association.owns_handle
    }
}

/// Identity key: `(MeasurementID, FlowID, StreamID)`, unique globally in
/// the active set per spec.md §3.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub measurement_id: u64,
    pub flow_id: u32,
    pub stream_id: StreamId,
}

/// The collection of active flows plus the four lookup indices named in
/// spec.md §4.D, grounded in `flowspec.cc`'s four overloads of
/// `findFlowSpec`.
#[derive(Default)]
pub struct FlowTable {
    flows: Vec<FlowSpec>,
    by_identity: HashMap<FlowKey, usize>,
    by_handle_stream: HashMap<(Handle, StreamId), usize>,
    by_association: HashMap<u32, usize>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, flow: FlowSpec) -> usize {
        let key = FlowKey {
            measurement_id: flow.measurement_id,
            flow_id: flow.flow_id,
            stream_id: flow.stream_id,
        };
        let handle_key = flow.association.handle.map(|h| (h, flow.stream_id));
        let assoc_key = flow.association.remote_association_id;

        let idx = self.flows.len();
        self.flows.push(flow);
        self.by_identity.insert(key, idx);
        if let Some(hk) = handle_key {
            self.by_handle_stream.insert(hk, idx);
        }
        if let Some(aid) = assoc_key {
            self.by_association.insert(aid, idx);
        }
        idx
    }

    pub fn by_identity(&self, measurement_id: u64, flow_id: u32, stream_id: StreamId) -> Option<&FlowSpec> {
        self.by_identity
            .get(&FlowKey {
                measurement_id,
                flow_id,
                stream_id,
            })
            .map(|&i| &self.flows[i])
    }

    pub fn by_handle_stream(&self, handle: Handle, stream_id: StreamId) -> Option<&FlowSpec> {
        self.by_handle_stream.get(&(handle, stream_id)).map(|&i| &self.flows[i])
    }

    pub fn by_handle_stream_mut(&mut self, handle: Handle, stream_id: StreamId) -> Option<&mut FlowSpec> {
        self.by_handle_stream
            .get(&(handle, stream_id))
            .copied()
            .map(move |i| &mut self.flows[i])
    }

    /// Direct index access for the scheduler's per-flow loop (spec.md
    /// §4.E.3.d), which needs to look a flow up repeatedly by its stable
    /// position rather than hold one borrow across several transport
    /// calls. Panics on an out-of-range index; callers always derive
    /// `idx` from `0..self.len()` taken just before iterating.
    pub fn get_mut(&mut self, idx: usize) -> &mut FlowSpec {
        &mut self.flows[idx]
    }

    pub fn by_association(&self, association_id: u32) -> Option<&FlowSpec> {
        self.by_association.get(&association_id).map(|&i| &self.flows[i])
    }

    pub fn by_source_addr(&self, addr: SocketAddr) -> Option<&FlowSpec> {
        self.flows.iter().find(|f| f.source_addr == Some(addr))
    }

    pub fn by_source_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut FlowSpec> {
        self.flows.iter_mut().find(|f| f.source_addr == Some(addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowSpec> {
        self.flows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FlowSpec> {
        self.flows.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Next contiguous `StreamID` for a new sibling on an existing owner
    /// handle, per spec.md §3.4 ("start at 0 for the owner, increase
    /// contiguously in creation order").
    pub fn next_stream_id(&self, handle: Handle) -> StreamId {
        self.flows
            .iter()
            .filter(|f| f.association.handle == Some(handle))
            .map(|f| f.stream_id)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn rs(rate: f64, size: f64) -> RateSize {
        RateSize {
            rate: Distribution::Constant(rate),
            size: Distribution::Constant(size),
        }
    }

    #[test]
    fn schedule_alternates_starting_off_until_first_event() {
        let mut f = FlowSpec::new(
            1,
            1,
            0,
            "t".into(),
            Protocol::ReliableStream,
            rs(10.0, 100.0),
            rs(10.0, 100.0),
            0.0,
            1.0,
            vec![1000, 2000, 3000],
        );
        f.start_measurement(0, &mut rand::thread_rng());
        assert!(matches!(f.status, FlowStatus::Off));
        assert_eq!(f.next_status_change_event, 1_000_000);

        assert!(!f.status_change_event(999_999));
        assert!(f.status_change_event(1_000_000));
        assert!(matches!(f.status, FlowStatus::On));
        assert_eq!(f.next_status_change_event, 2_000_000);
    }

    #[test]
    fn empty_schedule_is_always_on() {
        let mut f = FlowSpec::new(
            1, 1, 0, "t".into(), Protocol::ReliableStream,
            rs(10.0, 100.0), rs(10.0, 100.0), 0.0, 1.0, vec![],
        );
        f.start_measurement(0, &mut rand::thread_rng());
        assert!(matches!(f.status, FlowStatus::On));
        assert_eq!(f.next_status_change_event, u64::MAX);
    }

    #[test]
    fn paced_transmission_schedule_uses_rate() {
        let mut f = FlowSpec::new(
            1, 1, 0, "t".into(), Protocol::Datagram,
            rs(1000.0, 1000.0), rs(0.0, 0.0), 0.0, 0.0, vec![],
        );
        f.start_measurement(0, &mut rand::thread_rng());
        let mut rng = StdRng::seed_from_u64(1);
        f.schedule_next_transmission(0, &mut rng);
        assert_eq!(f.next_transmission_event, 1000);
    }

    #[test]
    fn saturated_sender_detected() {
        let f = FlowSpec::new(
            1, 1, 0, "t".into(), Protocol::ReliableStream,
            rs(0.0, 1400.0), rs(0.0, 0.0), 0.0, 0.0, vec![],
        );
        assert!(f.is_saturated());
    }

    #[test]
    fn flow_table_lookup_by_identity() {
        let mut table = FlowTable::new();
        let f = FlowSpec::new(
            7, 3, 0, "t".into(), Protocol::ReliableStream,
            rs(10.0, 100.0), rs(10.0, 100.0), 0.0, 0.0, vec![],
        );
        table.insert(f);
        assert!(table.by_identity(7, 3, 0).is_some());
        assert!(table.by_identity(7, 4, 0).is_none());
    }

    #[test]
    fn next_stream_id_is_contiguous() {
        let mut table = FlowTable::new();
        let h = Handle(1);
        let mut owner = FlowSpec::new(
            1, 0, 0, "owner".into(), Protocol::MultiStreamMessage,
            rs(10.0, 100.0), rs(10.0, 100.0), 0.0, 0.0, vec![],
        );
        owner.association.handle = Some(h);
        owner.association.owns_handle = true;
        table.insert(owner);
        assert_eq!(table.next_stream_id(h), 1);
    }
}
