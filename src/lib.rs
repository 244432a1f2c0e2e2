//! Engine library for the distributed network-performance meter (spec.md
//! §1). `src/bin/netmeter.rs` is a thin shell around [`run`]: this crate
//! does all the work and never calls `std::process::exit` itself, so it
//! can be embedded or driven from tests without touching the process.
//!
//! Module layout mirrors spec.md's lettered sections: [`flow`] (A),
//! [`transport`] (B), [`reader`] (C), [`sender`]/[`receiver`] (F/G),
//! [`control`] (H), [`stats`] (I), [`scheduler`] (E) ties them together,
//! [`clock`] supplies time and the rate/size distributions, [`cli`] parses
//! the external argv grammar, and [`error`] holds the shared error type.

pub mod cli;
pub mod clock;
pub mod control;
pub mod error;
pub mod flow;
pub mod frame;
pub mod reader;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod stats;
pub mod transport;

use std::net::SocketAddr;

use crate::cli::{FlowConfig, RunConfig, RunMode};
use crate::clock::{Clock, SystemClock};
use crate::control::{AddFlowPayload, ControlMessage, MeasurementIdPayload};
use crate::error::{NetMeterError, Result};
use crate::flow::{Association, FlowSpec, Protocol, RateSize};
use crate::scheduler::{LoopExit, Scheduler};
use crate::stats::{FileSink, StatsSink, StatisticsWriter, DEFAULT_SNAPSHOT_PERIOD_MICROS};
use crate::transport::Handle;

/// Fallback data port for an active-mode remote endpoint given with no
/// explicit port, matching the original meter's `setPort(..., 9000)`
/// (`examples/original_source/src/netperfmeter.cc`).
pub const DEFAULT_DATA_PORT: u16 = 9000;

/// How long a setup-phase control request is allowed to wait for its `ACK`
/// before the run is treated as aborted (spec.md §7's `abort` kind covers
/// a lost control channel; a request that never gets answered is the same
/// failure observed during setup rather than mid-measurement).
const CONTROL_HANDSHAKE_TIMEOUT_MICROS: u64 = 10_000_000;

/// Run one full measurement to completion per `config`: either the active
/// (initiating) or passive (responding) side of the protocol, chosen by
/// `config.mode`. `should_continue` is polled once per loop iteration so a
/// caller can request early shutdown (e.g. on a signal); returning `false`
/// ends the run the same way reaching `-runtime=` does.
pub fn run(config: RunConfig, should_continue: &dyn Fn() -> bool) -> Result<()> {
    match &config.mode {
        RunMode::Passive { port } => run_passive(&config, *port, should_continue),
        RunMode::Active { remote } => run_active(&config, remote, should_continue),
    }
}

fn open_sink(path: Option<&str>) -> Result<Option<Box<dyn StatsSink>>> {
    match path {
        Some(p) => Ok(Some(Box::new(FileSink::open(p)?))),
        None => Ok(None),
    }
}

fn build_stats(config: &RunConfig) -> Result<StatisticsWriter> {
    let vector = open_sink(config.vector_path.as_deref())?;
    let scalar = open_sink(config.scalar_path.as_deref())?;
    Ok(StatisticsWriter::new(vector, scalar, DEFAULT_SNAPSHOT_PERIOD_MICROS))
}

/// Block until the most recent `send_control_request` either gets its `ACK`
/// or `budget_micros` elapses, driving the scheduler's own poll loop to do
/// it (spec.md §4.H: "the active peer must not issue the next request
/// until the previous ACK arrives").
fn await_ack(scheduler: &mut Scheduler, clock: &dyn Clock, budget_micros: u64) -> Result<()> {
    let deadline = clock.now_micros() + budget_micros;
    while scheduler.awaiting_ack().is_some() {
        if clock.now_micros() >= deadline {
            return Err(NetMeterError::ControlChannelLost);
        }
        match scheduler.run_once(clock, deadline)? {
            Some(LoopExit::StopReached) | Some(LoopExit::ControlAborted) => {
                return Err(NetMeterError::ControlChannelLost);
            }
            None => {}
        }
    }
    Ok(())
}

/// Register one CLI-configured flow with the scheduler and return the
/// handle/stream-id/ownership triple to report in its `ADD_FLOW` request.
/// Multi-stream flows share one association per run, added as siblings
/// on successive contiguous `StreamID`s (spec.md §3.4); every other
/// protocol gets its own connection per flow.
fn open_local_flow(
    scheduler: &mut Scheduler,
    protocol: Protocol,
    remote: SocketAddr,
    multi_stream_handle: &mut Option<Handle>,
) -> std::io::Result<(Handle, u16, bool)> {
    if matches!(protocol, Protocol::MultiStreamMessage) {
        if let Some(handle) = *multi_stream_handle {
            let stream_id = scheduler.flows.next_stream_id(handle);
            return Ok((handle, stream_id, false));
        }
        let handle = scheduler.open_flow_connection(protocol, remote)?;
        *multi_stream_handle = Some(handle);
        return Ok((handle, 0, true));
    }
    let handle = scheduler.open_flow_connection(protocol, remote)?;
    Ok((handle, 0, true))
}

fn active_side_flow_spec(measurement_id: u64, flow_id: u32, stream_id: u16, fc: &FlowConfig) -> FlowSpec {
    FlowSpec::new(
        measurement_id,
        flow_id,
        stream_id,
        fc.description.clone(),
        fc.protocol,
        RateSize {
            rate: fc.outbound_rate,
            size: fc.outbound_size,
        },
        RateSize {
            rate: fc.inbound_rate,
            size: fc.inbound_size,
        },
        fc.ordered_mode,
        fc.reliable_mode,
        fc.on_off_events.clone(),
    )
}

fn add_flow_payload(measurement_id: u64, flow_id: u32, stream_id: u16, fc: &FlowConfig) -> AddFlowPayload {
    AddFlowPayload {
        measurement_id,
        flow_id,
        stream_id,
        protocol: fc.protocol,
        // The remote peer's outbound is our inbound and vice versa: each
        // side negotiates what *it* will send (spec.md §4.H's ADD_FLOW
        // field list mirrors the flow's own outbound/inbound pair).
        inbound_rate: fc.inbound_rate,
        inbound_size: fc.inbound_size,
        outbound_rate: fc.outbound_rate,
        outbound_size: fc.outbound_size,
        ordered_mode: fc.ordered_mode,
        reliable_mode: fc.reliable_mode,
        on_off_events: fc.on_off_events.clone(),
        description: fc.description.clone(),
    }
}

fn run_active(config: &RunConfig, remote: &str, should_continue: &dyn Fn() -> bool) -> Result<()> {
    let data_addr = cli::resolve_remote(remote, DEFAULT_DATA_PORT)?;
    let data_port = data_addr.port();

    let stats = build_stats(config)?;
    let mut scheduler = Scheduler::new(true, config.max_msg_size, stats, rand::random())?;
    scheduler.connect_active(data_addr, data_port)?;

    let clock = SystemClock::new();
    let measurement_id: u64 = rand::random();
    let mut multi_stream_handle: Option<Handle> = None;

    for (i, fc) in config.flows.iter().enumerate() {
        let flow_id = i as u32;
        let (handle, stream_id, owns_handle) =
            open_local_flow(&mut scheduler, fc.protocol, data_addr, &mut multi_stream_handle)?;

        let mut flow = active_side_flow_spec(measurement_id, flow_id, stream_id, fc);
        flow.association = Association {
            handle: Some(handle),
            owns_handle,
            remote_association_id: None,
            remote_addr_bound: false,
        };
        scheduler.flows.insert(flow);

        scheduler.send_control_request(ControlMessage::AddFlow(add_flow_payload(
            measurement_id,
            flow_id,
            stream_id,
            fc,
        )))?;
        await_ack(&mut scheduler, &clock, CONTROL_HANDSHAKE_TIMEOUT_MICROS)?;
    }

    scheduler.send_control_request(ControlMessage::StartMeas(MeasurementIdPayload { measurement_id }))?;
    await_ack(&mut scheduler, &clock, CONTROL_HANDSHAKE_TIMEOUT_MICROS)?;

    let start = clock.now_micros();
    scheduler.start_measurement(measurement_id, start);
    let stop_at = start + config.runtime_secs * 1_000_000;

    let finished_normally = scheduler.run(&clock, stop_at, should_continue)?;

    scheduler.send_control_request(ControlMessage::StopMeas(MeasurementIdPayload { measurement_id }))?;
    // Best-effort: the peer may have already torn the association down.
    let _ = await_ack(&mut scheduler, &clock, CONTROL_HANDSHAKE_TIMEOUT_MICROS);
    scheduler.stop_measurement(measurement_id)?;
    scheduler.close()?;

    if !finished_normally {
        return Err(NetMeterError::ControlChannelLost);
    }
    Ok(())
}

/// Passive side: stand up the four data listeners plus the control
/// listener, then drive the loop until the control association is lost
/// (the active peer disconnecting once its run completes is the normal,
/// expected shutdown signal here -- spec.md §7's `abort` kind).
fn run_passive(config: &RunConfig, port: u16, should_continue: &dyn Fn() -> bool) -> Result<()> {
    let stats = build_stats(config)?;
    let mut scheduler = Scheduler::new(false, config.max_msg_size, stats, rand::random())?;
    let bind_addr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port);
    scheduler.listen_passive(bind_addr, port)?;

    let clock = SystemClock::new();
    scheduler.run(&clock, u64::MAX, should_continue)?;
    scheduler.close()?;
    Ok(())
}
