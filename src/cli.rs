//! CLI grammar (spec.md §6), hand-parsed over `&str` rather than through a
//! declarative flag parser: the grammar is positional and stream-consuming
//! (a protocol selector changes the meaning of the arguments that follow
//! it), which doesn't fit a `clap`-derived flag set. The original meter
//! makes the same choice for the same reason
//! (`examples/original_source/src/netperfmeter.cc`'s
//! `getNextEntry`/`getNextOption`); this module mirrors that structure.
//!
//! Library code here never exits the process; `src/bin/netmeter.rs` is the
//! only place that turns a `Err(NetMeterError::Configuration(..))` into
//! exit code 1 (spec.md §6).

use std::net::SocketAddr;

use crate::clock::Distribution;
use crate::error::{NetMeterError, Result};
use crate::flow::Protocol;
use crate::sender::{clamp_max_msg_size, MAX_MAX_MSG_SIZE};

/// Active (we connect out) or passive (we listen) run mode, per spec.md
/// §6's "first argument is either a port number ... or a remote endpoint
/// address".
#[derive(Debug, Clone)]
pub enum RunMode {
    Passive { port: u16 },
    Active { remote: String },
}

/// One flow spec as it appears on the command line: four distribution
/// entries plus the `unordered=`/`unreliable=`/`description=`/`onoff=`
/// options (spec.md §6).
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub protocol: Protocol,
    pub outbound_rate: Distribution,
    pub outbound_size: Distribution,
    pub inbound_rate: Distribution,
    pub inbound_size: Distribution,
    /// `ordered_mode` = `1 - unordered` (spec.md §3.2/§6).
    pub ordered_mode: f64,
    /// `reliable_mode` = `1 - unreliable`.
    pub reliable_mode: f64,
    pub description: String,
    pub on_off_events: Vec<u32>,
}

/// Fully parsed CLI invocation (spec.md §6's global options plus the
/// flow-spec stream).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: RunMode,
    pub flows: Vec<FlowConfig>,
    pub runtime_secs: u64,
    pub max_msg_size: usize,
    pub vector_path: Option<String>,
    pub scalar_path: Option<String>,
}

/// Parse a `constN`/`expN` distribution entry.
fn parse_distribution(token: &str) -> Result<Distribution> {
    if let Some(rest) = token.strip_prefix("const") {
        let v: f64 = rest
            .parse()
            .map_err(|_| NetMeterError::Configuration(format!("bad constant distribution: {token}")))?;
        Ok(Distribution::Constant(v))
    } else if let Some(rest) = token.strip_prefix("exp") {
        let v: f64 = rest
            .parse()
            .map_err(|_| NetMeterError::Configuration(format!("bad exponential distribution: {token}")))?;
        Ok(Distribution::NegExponential(v))
    } else {
        Err(NetMeterError::Configuration(format!(
            "expected constN or expN distribution entry, got {token}"
        )))
    }
}

/// Parse a colon-terminated `onoff=` list: entries are `<ms>` (absolute
/// from base) or `+<ms>` (relative to the prior entry), per spec.md §6.
fn parse_onoff(spec: &str) -> Result<Vec<u32>> {
    let mut events = Vec::new();
    let mut prior: u32 = 0;
    for entry in spec.split(':').filter(|e| !e.is_empty()) {
        let value: u32 = if let Some(rest) = entry.strip_prefix('+') {
            let delta: u32 = rest
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad onoff entry: {entry}")))?;
            prior + delta
        } else {
            entry
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad onoff entry: {entry}")))?
        };
        events.push(value);
        prior = value;
    }
    Ok(events)
}

/// Parse one non-dash flow-spec token plus whatever trailing
/// `key=value` option tokens follow it, consuming them from `rest`.
fn parse_flow_spec(protocol: Protocol, first: &str, rest: &mut std::iter::Peekable<std::slice::Iter<String>>) -> Result<FlowConfig> {
    let outbound_rate = parse_distribution(first)?;
    let outbound_size = parse_distribution(
        rest.next()
            .ok_or_else(|| NetMeterError::Configuration("flow spec missing outbound size".into()))?,
    )?;
    let inbound_rate = parse_distribution(
        rest.next()
            .ok_or_else(|| NetMeterError::Configuration("flow spec missing inbound rate".into()))?,
    )?;
    let inbound_size = parse_distribution(
        rest.next()
            .ok_or_else(|| NetMeterError::Configuration("flow spec missing inbound size".into()))?,
    )?;

    let mut unordered = 0.0f64;
    let mut unreliable = 0.0f64;
    let mut description = String::new();
    let mut on_off_events = Vec::new();

    while let Some(next) = rest.peek() {
        if next.starts_with('-') {
            break;
        }
        let token = rest.next().unwrap();
        if let Some(v) = token.strip_prefix("unordered=") {
            unordered = v
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad unordered= value: {v}")))?;
        } else if let Some(v) = token.strip_prefix("unreliable=") {
            unreliable = v
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad unreliable= value: {v}")))?;
        } else if let Some(v) = token.strip_prefix("description=") {
            description = v.to_string();
        } else if let Some(v) = token.strip_prefix("onoff=") {
            on_off_events = parse_onoff(v)?;
        } else {
            return Err(NetMeterError::Configuration(format!("unrecognised flow option: {token}")));
        }
    }

    Ok(FlowConfig {
        protocol,
        outbound_rate,
        outbound_size,
        inbound_rate,
        inbound_size,
        ordered_mode: (1.0 - unordered).clamp(0.0, 1.0),
        reliable_mode: (1.0 - unreliable).clamp(0.0, 1.0),
        description,
        on_off_events,
    })
}

/// Parse the full argv (excluding argv[0]) per spec.md §6.
pub fn parse_args(args: &[String]) -> Result<RunConfig> {
    let mut it = args.iter();
    let first = it
        .next()
        .ok_or_else(|| NetMeterError::Configuration("missing port or remote endpoint argument".into()))?;

    let mode = if let Ok(port) = first.parse::<u16>() {
        if !(1024..65534).contains(&port) {
            return Err(NetMeterError::Configuration(format!(
                "port {port} out of range [1024, 65534]"
            )));
        }
        RunMode::Passive { port }
    } else {
        RunMode::Active { remote: first.clone() }
    };

    let mut flows = Vec::new();
    let mut runtime_secs = 10u64;
    let mut max_msg_size = MAX_MAX_MSG_SIZE;
    let mut vector_path = None;
    let mut scalar_path = None;
    let mut current_protocol = Protocol::ReliableStream;

    let mut rest = it.peekable();
    while let Some(token) = rest.next() {
        if let Some(v) = token.strip_prefix("-runtime=") {
            runtime_secs = v
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad -runtime= value: {v}")))?;
        } else if let Some(v) = token.strip_prefix("-maxmsgsize=") {
            let requested: usize = v
                .parse()
                .map_err(|_| NetMeterError::Configuration(format!("bad -maxmsgsize= value: {v}")))?;
            max_msg_size = clamp_max_msg_size(requested);
        } else if let Some(v) = token.strip_prefix("-vector=") {
            vector_path = Some(v.to_string());
        } else if let Some(v) = token.strip_prefix("-scalar=") {
            scalar_path = Some(v.to_string());
        } else if token == "-tcp" {
            current_protocol = Protocol::ReliableStream;
        } else if token == "-udp" {
            current_protocol = Protocol::Datagram;
        } else if token == "-sctp" {
            current_protocol = Protocol::MultiStreamMessage;
        } else if token == "-dccp" {
            current_protocol = Protocol::CongestionControlledDatagram;
        } else if token.starts_with('-') {
            return Err(NetMeterError::Configuration(format!("unrecognised option: {token}")));
        } else {
            flows.push(parse_flow_spec(current_protocol, token, &mut rest)?);
        }
    }

    Ok(RunConfig {
        mode,
        flows,
        runtime_secs,
        max_msg_size,
        vector_path,
        scalar_path,
    })
}

/// Resolve an active-mode remote endpoint string to a data-port address;
/// the control association uses `port + 1` (spec.md §6).
pub fn resolve_remote(remote: &str, data_port: u16) -> Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    let with_port = format!("{remote}:{data_port}");
    with_port
        .to_socket_addrs()
        .map_err(|e| NetMeterError::Configuration(format!("cannot resolve {remote}: {e}")))?
        .next()
        .ok_or_else(|| NetMeterError::Configuration(format!("no address found for {remote}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn passive_mode_parses_port() {
        let cfg = parse_args(&args("5000")).unwrap();
        assert!(matches!(cfg.mode, RunMode::Passive { port: 5000 }));
    }

    #[test]
    fn port_out_of_range_rejected() {
        assert!(parse_args(&args("80")).is_err());
    }

    #[test]
    fn active_mode_parses_remote_address() {
        let cfg = parse_args(&args("192.168.1.1")).unwrap();
        assert!(matches!(cfg.mode, RunMode::Active { .. }));
    }

    #[test]
    fn full_tcp_flow_spec_with_options() {
        let cfg = parse_args(&args(
            "192.168.1.1 -tcp const1000 const1000 const1000 const1000 -runtime=10 -maxmsgsize=16000",
        ))
        .unwrap();
        assert_eq!(cfg.flows.len(), 1);
        let flow = &cfg.flows[0];
        assert!(matches!(flow.protocol, Protocol::ReliableStream));
        assert_eq!(flow.outbound_rate, Distribution::Constant(1000.0));
        assert_eq!(cfg.runtime_secs, 10);
        assert_eq!(cfg.max_msg_size, 16000);
    }

    #[test]
    fn sctp_flow_with_unordered_and_onoff() {
        let cfg = parse_args(&args(
            "192.168.1.1 -sctp const500 const200 const500 const200 unordered=0.5 unreliable=0.0 onoff=0:1000:2000:3000",
        ))
        .unwrap();
        let flow = &cfg.flows[0];
        assert!(matches!(flow.protocol, Protocol::MultiStreamMessage));
        assert_eq!(flow.ordered_mode, 0.5);
        assert_eq!(flow.reliable_mode, 1.0);
        assert_eq!(flow.on_off_events, vec![0, 1000, 2000, 3000]);
    }

    #[test]
    fn onoff_relative_offsets_accumulate() {
        let events = parse_onoff("0:+1000:+1000:+1000").unwrap();
        assert_eq!(events, vec![0, 1000, 2000, 3000]);
    }

    #[test]
    fn description_option_is_captured() {
        let cfg = parse_args(&args(
            "192.168.1.1 -udp const100 const1400 const100 const1400 description=primary",
        ))
        .unwrap();
        assert_eq!(cfg.flows[0].description, "primary");
    }

    #[test]
    fn maxmsgsize_is_clamped() {
        let cfg = parse_args(&args("192.168.1.1 -maxmsgsize=10")).unwrap();
        assert_eq!(cfg.max_msg_size, crate::sender::MIN_MAX_MSG_SIZE);
    }

    #[test]
    fn multiple_flows_switch_protocol_mid_stream() {
        let cfg = parse_args(&args(
            "192.168.1.1 -tcp const10 const10 const10 const10 -udp const20 const20 const20 const20",
        ))
        .unwrap();
        assert_eq!(cfg.flows.len(), 2);
        assert!(matches!(cfg.flows[0].protocol, Protocol::ReliableStream));
        assert!(matches!(cfg.flows[1].protocol, Protocol::Datagram));
    }

    #[test]
    fn unknown_option_rejected() {
        assert!(parse_args(&args("192.168.1.1 -bogus")).is_err());
    }

    #[test]
    fn missing_first_argument_rejected() {
        assert!(parse_args(&[]).is_err());
    }
}
