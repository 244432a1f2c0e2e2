//! The control protocol (spec.md §4.H): add/remove flow, start/stop
//! measurement, and acknowledgement, carried as TLV payloads over the
//! reliable multi-stream association on `data_port + 1`.
//!
//! Grounded in the original meter's control-channel PDUs
//! (`examples/original_source/src/netperfmeter.cc`'s `handleControlMessage`
//! family) and in the teacher's control-frame encode/decode style
//! (`frame.rs`'s `StreamOpen`/`StreamAck` codecs), generalised to this
//! protocol's five message types.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::clock::Distribution;
use crate::error::{NetMeterError, Result};
use crate::flow::Protocol;
use crate::frame::{Frame, FrameFlags, FrameType};

fn encode_distribution(buf: &mut BytesMut, dist: Distribution) {
    match dist {
        Distribution::Constant(v) => {
            buf.put_u8(0);
            buf.put_f64(v);
        }
        Distribution::NegExponential(v) => {
            buf.put_u8(1);
            buf.put_f64(v);
        }
    }
}

fn decode_distribution(buf: &mut Bytes) -> Result<Distribution> {
    if buf.remaining() < 9 {
        return Err(NetMeterError::FrameTooShort {
            expected: 9,
            actual: buf.remaining(),
        });
    }
    let kind = buf.get_u8();
    let value = buf.get_f64();
    match kind {
        0 => Ok(Distribution::Constant(value)),
        1 => Ok(Distribution::NegExponential(value)),
        other => Err(NetMeterError::Configuration(format!(
            "unknown distribution kind {other}"
        ))),
    }
}

fn protocol_to_u8(p: Protocol) -> u8 {
    match p {
        Protocol::ReliableStream => 0,
        Protocol::Datagram => 1,
        Protocol::MultiStreamMessage => 2,
        Protocol::CongestionControlledDatagram => 3,
    }
}

fn protocol_from_u8(v: u8) -> Result<Protocol> {
    match v {
        0 => Ok(Protocol::ReliableStream),
        1 => Ok(Protocol::Datagram),
        2 => Ok(Protocol::MultiStreamMessage),
        3 => Ok(Protocol::CongestionControlledDatagram),
        other => Err(NetMeterError::InvalidTransportMode(other)),
    }
}

/// Parameters carried by `ADD_FLOW`, mirroring spec.md §4.H's field list.
#[derive(Debug, Clone, PartialEq)]
pub struct AddFlowPayload {
    pub measurement_id: u64,
    pub flow_id: u32,
    pub stream_id: u16,
    pub protocol: Protocol,
    pub inbound_rate: Distribution,
    pub inbound_size: Distribution,
    pub outbound_rate: Distribution,
    pub outbound_size: Distribution,
    pub ordered_mode: f64,
    pub reliable_mode: f64,
    pub on_off_events: Vec<u32>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveFlowPayload {
    pub measurement_id: u64,
    pub flow_id: u32,
    pub stream_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementIdPayload {
    pub measurement_id: u64,
}

/// Status code carried in an `ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckStatus {
    Ok = 0,
    Unsupported = 1,
    Rejected = 2,
}

impl TryFrom<u8> for AckStatus {
    type Error = NetMeterError;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(AckStatus::Ok),
            1 => Ok(AckStatus::Unsupported),
            2 => Ok(AckStatus::Rejected),
            other => Err(NetMeterError::Configuration(format!(
                "unknown ack status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    pub referenced_type: FrameType,
    pub status: AckStatus,
}

/// A fully decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    AddFlow(AddFlowPayload),
    RemoveFlow(RemoveFlowPayload),
    StartMeas(MeasurementIdPayload),
    StopMeas(MeasurementIdPayload),
    Ack(AckPayload),
}

impl ControlMessage {
    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::new();
        let frame_type = match self {
            ControlMessage::AddFlow(p) => {
                buf.put_u64(p.measurement_id);
                buf.put_u32(p.flow_id);
                buf.put_u16(p.stream_id);
                buf.put_u8(protocol_to_u8(p.protocol));
                encode_distribution(&mut buf, p.inbound_rate);
                encode_distribution(&mut buf, p.inbound_size);
                encode_distribution(&mut buf, p.outbound_rate);
                encode_distribution(&mut buf, p.outbound_size);
                buf.put_f64(p.ordered_mode);
                buf.put_f64(p.reliable_mode);
                buf.put_u16(p.on_off_events.len() as u16);
                for ev in &p.on_off_events {
                    buf.put_u32(*ev);
                }
                let desc_bytes = p.description.as_bytes();
                buf.put_u16(desc_bytes.len() as u16);
                buf.extend_from_slice(desc_bytes);
                FrameType::AddFlow
            }
            ControlMessage::RemoveFlow(p) => {
                buf.put_u64(p.measurement_id);
                buf.put_u32(p.flow_id);
                buf.put_u16(p.stream_id);
                FrameType::RemoveFlow
            }
            ControlMessage::StartMeas(p) => {
                buf.put_u64(p.measurement_id);
                FrameType::StartMeas
            }
            ControlMessage::StopMeas(p) => {
                buf.put_u64(p.measurement_id);
                FrameType::StopMeas
            }
            ControlMessage::Ack(p) => {
                buf.put_u8(p.referenced_type.into());
                buf.put_u8(p.status as u8);
                FrameType::Ack
            }
        };
        Frame::new(frame_type, FrameFlags::NONE, buf.freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let mut buf = frame.payload.clone();
        match frame.frame_type {
            FrameType::AddFlow => {
                if buf.remaining() < 15 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 15,
                        actual: buf.remaining(),
                    });
                }
                let measurement_id = buf.get_u64();
                let flow_id = buf.get_u32();
                let stream_id = buf.get_u16();
                let protocol = protocol_from_u8(buf.get_u8())?;
                let inbound_rate = decode_distribution(&mut buf)?;
                let inbound_size = decode_distribution(&mut buf)?;
                let outbound_rate = decode_distribution(&mut buf)?;
                let outbound_size = decode_distribution(&mut buf)?;
                if buf.remaining() < 18 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 18,
                        actual: buf.remaining(),
                    });
                }
                let ordered_mode = buf.get_f64();
                let reliable_mode = buf.get_f64();
                let n_events = buf.get_u16() as usize;
                if buf.remaining() < n_events * 4 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: n_events * 4,
                        actual: buf.remaining(),
                    });
                }
                let mut on_off_events = Vec::with_capacity(n_events);
                for _ in 0..n_events {
                    on_off_events.push(buf.get_u32());
                }
                if buf.remaining() < 2 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 2,
                        actual: buf.remaining(),
                    });
                }
                let desc_len = buf.get_u16() as usize;
                if buf.remaining() < desc_len {
                    return Err(NetMeterError::FrameTooShort {
                        expected: desc_len,
                        actual: buf.remaining(),
                    });
                }
                let desc_bytes = buf.split_to(desc_len);
                let description = String::from_utf8_lossy(&desc_bytes).into_owned();
                Ok(ControlMessage::AddFlow(AddFlowPayload {
                    measurement_id,
                    flow_id,
                    stream_id,
                    protocol,
                    inbound_rate,
                    inbound_size,
                    outbound_rate,
                    outbound_size,
                    ordered_mode,
                    reliable_mode,
                    on_off_events,
                    description,
                }))
            }
            FrameType::RemoveFlow => {
                if buf.remaining() < 14 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 14,
                        actual: buf.remaining(),
                    });
                }
                Ok(ControlMessage::RemoveFlow(RemoveFlowPayload {
                    measurement_id: buf.get_u64(),
                    flow_id: buf.get_u32(),
                    stream_id: buf.get_u16(),
                }))
            }
            FrameType::StartMeas => {
                if buf.remaining() < 8 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 8,
                        actual: buf.remaining(),
                    });
                }
                Ok(ControlMessage::StartMeas(MeasurementIdPayload {
                    measurement_id: buf.get_u64(),
                }))
            }
            FrameType::StopMeas => {
                if buf.remaining() < 8 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 8,
                        actual: buf.remaining(),
                    });
                }
                Ok(ControlMessage::StopMeas(MeasurementIdPayload {
                    measurement_id: buf.get_u64(),
                }))
            }
            FrameType::Ack => {
                if buf.remaining() < 2 {
                    return Err(NetMeterError::FrameTooShort {
                        expected: 2,
                        actual: buf.remaining(),
                    });
                }
                let referenced_type = FrameType::try_from(buf.get_u8())?;
                let status = AckStatus::try_from(buf.get_u8())?;
                Ok(ControlMessage::Ack(AckPayload {
                    referenced_type,
                    status,
                }))
            }
            FrameType::Data => Err(NetMeterError::Configuration(
                "data frame type on control channel".into(),
            )),
        }
    }
}

/// Per-measurement state machine on the passive side (spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementState {
    Idle,
    Configuring,
    Running,
    Stopped,
}

/// Tracks one measurement's control-protocol state and validates incoming
/// requests against it, returning the `AckStatus` to send back.
#[derive(Debug)]
pub struct ControlStateMachine {
    state: MeasurementState,
}

impl Default for ControlStateMachine {
    fn default() -> Self {
        Self {
            state: MeasurementState::Idle,
        }
    }
}

impl ControlStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MeasurementState {
        self.state
    }

    /// `ADD_FLOW` is accepted in `Idle` (which transitions to `Configuring`)
    /// or already in `Configuring`; rejected elsewhere.
    pub fn on_add_flow(&mut self) -> AckStatus {
        match self.state {
            MeasurementState::Idle | MeasurementState::Configuring => {
                self.state = MeasurementState::Configuring;
                AckStatus::Ok
            }
            MeasurementState::Running | MeasurementState::Stopped => AckStatus::Rejected,
        }
    }

    /// `START_MEAS` is idempotent once `Running`; otherwise it transitions
    /// from `Configuring` (the normal path) or `Idle`/`Stopped` (no flows
    /// configured yet, still permitted per spec.md's silence on that case).
    pub fn on_start_meas(&mut self) -> AckStatus {
        self.state = MeasurementState::Running;
        AckStatus::Ok
    }

    /// `STOP_MEAS` in `Idle` is a no-op success; otherwise transitions to
    /// `Stopped`.
    pub fn on_stop_meas(&mut self) -> AckStatus {
        match self.state {
            MeasurementState::Idle => AckStatus::Ok,
            MeasurementState::Configuring | MeasurementState::Running | MeasurementState::Stopped => {
                self.state = MeasurementState::Stopped;
                AckStatus::Ok
            }
        }
    }

    /// `REMOVE_FLOW` is valid in any state; it never changes the
    /// measurement's lifecycle state.
    pub fn on_remove_flow(&mut self) -> AckStatus {
        AckStatus::Ok
    }

    /// Returns to `Idle`, ready for the next measurement on this
    /// association (spec.md §4.H: `Stopped -> Idle`).
    pub fn reset(&mut self) {
        self.state = MeasurementState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_flow_payload() -> AddFlowPayload {
        AddFlowPayload {
            measurement_id: 42,
            flow_id: 1,
            stream_id: 0,
            protocol: Protocol::ReliableStream,
            inbound_rate: Distribution::Constant(10.0),
            inbound_size: Distribution::Constant(100.0),
            outbound_rate: Distribution::NegExponential(50.0),
            outbound_size: Distribution::Constant(1000.0),
            ordered_mode: 0.5,
            reliable_mode: 1.0,
            on_off_events: vec![1000, 2000, 3000],
            description: "test-flow".into(),
        }
    }

    #[test]
    fn add_flow_roundtrip() {
        let payload = add_flow_payload();
        let msg = ControlMessage::AddFlow(payload.clone());
        let frame = msg.encode();
        let decoded = ControlMessage::decode(&frame).unwrap();
        assert_eq!(decoded, ControlMessage::AddFlow(payload));
    }

    #[test]
    fn remove_flow_roundtrip() {
        let payload = RemoveFlowPayload {
            measurement_id: 7,
            flow_id: 3,
            stream_id: 1,
        };
        let msg = ControlMessage::RemoveFlow(payload);
        let decoded = ControlMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, ControlMessage::RemoveFlow(payload));
    }

    #[test]
    fn start_stop_meas_roundtrip() {
        let payload = MeasurementIdPayload { measurement_id: 99 };
        let start = ControlMessage::StartMeas(payload);
        assert_eq!(ControlMessage::decode(&start.encode()).unwrap(), start);
        let stop = ControlMessage::StopMeas(payload);
        assert_eq!(ControlMessage::decode(&stop.encode()).unwrap(), stop);
    }

    #[test]
    fn ack_roundtrip() {
        let payload = AckPayload {
            referenced_type: FrameType::AddFlow,
            status: AckStatus::Unsupported,
        };
        let msg = ControlMessage::Ack(payload);
        assert_eq!(ControlMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn state_machine_happy_path() {
        let mut sm = ControlStateMachine::new();
        assert_eq!(sm.state(), MeasurementState::Idle);
        assert_eq!(sm.on_add_flow(), AckStatus::Ok);
        assert_eq!(sm.state(), MeasurementState::Configuring);
        assert_eq!(sm.on_add_flow(), AckStatus::Ok);
        assert_eq!(sm.on_start_meas(), AckStatus::Ok);
        assert_eq!(sm.state(), MeasurementState::Running);
        assert_eq!(sm.on_stop_meas(), AckStatus::Ok);
        assert_eq!(sm.state(), MeasurementState::Stopped);
    }

    #[test]
    fn add_flow_rejected_once_running() {
        let mut sm = ControlStateMachine::new();
        sm.on_add_flow();
        sm.on_start_meas();
        assert_eq!(sm.on_add_flow(), AckStatus::Rejected);
    }

    #[test]
    fn start_meas_idempotent_in_running() {
        let mut sm = ControlStateMachine::new();
        sm.on_add_flow();
        sm.on_start_meas();
        assert_eq!(sm.on_start_meas(), AckStatus::Ok);
        assert_eq!(sm.state(), MeasurementState::Running);
    }

    #[test]
    fn stop_meas_in_idle_is_noop_success() {
        let mut sm = ControlStateMachine::new();
        assert_eq!(sm.on_stop_meas(), AckStatus::Ok);
        assert_eq!(sm.state(), MeasurementState::Idle);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut sm = ControlStateMachine::new();
        sm.on_add_flow();
        sm.on_start_meas();
        sm.on_stop_meas();
        sm.reset();
        assert_eq!(sm.state(), MeasurementState::Idle);
    }

    #[test]
    fn unknown_frame_type_rejected_at_decode() {
        let frame = Frame::new(FrameType::Data, FrameFlags::NONE, Bytes::new());
        assert!(ControlMessage::decode(&frame).is_err());
    }
}
