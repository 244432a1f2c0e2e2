use thiserror::Error;

/// All errors produced by the measurement engine.
#[derive(Debug, Error)]
pub enum NetMeterError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("frame length {length} exceeds buffer size {buffer_size}")]
    FrameTooLong { length: usize, buffer_size: usize },

    #[error("invalid transport mode: 0x{0:02x}")]
    InvalidTransportMode(u8),

    #[error("stream {0} not found")]
    StreamNotFound(u32),

    #[error("stream {0} already exists")]
    StreamAlreadyExists(u32),

    #[error("stream {0} is closed")]
    StreamClosed(u32),

    #[error("maximum streams ({0}) exceeded")]
    MaxStreamsExceeded(u32),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("multi-stream record boundary violated: {0}")]
    RecordBoundaryViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("control channel lost")]
    ControlChannelLost,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NetMeterError>;
