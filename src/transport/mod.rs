//! Uniform operations over the four supported transport protocols
//! (spec.md §4.B), plus the mio-based socket plumbing each concrete
//! transport needs. Grounded in the teacher's `TransportMode` +
//! `TransportSender`/`TransportReceiver` split (`transport/mod.rs` in the
//! retrieval pack), generalised from "four delivery modes on one
//! connection" to "four protocol bindings, each exposing the same
//! socket-shaped operations".

pub mod cc_datagram;
pub mod datagram;
pub mod multi_stream;
pub mod reliable_stream;

use std::io;
use std::net::SocketAddr;

use crate::flow::Protocol;

/// Opaque handle to a registered socket. Wraps the `mio::Token` used to
/// register it with the shared `mio::Poll` instance; the scheduler never
/// looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub usize);

/// Stream identifier on the multi-stream transport, meaningless (always 0)
/// elsewhere. Aliased here too so transport-facing code doesn't need to
/// reach into `flow` just to name it.
pub type StreamId = u16;

impl From<Handle> for mio::Token {
    fn from(h: Handle) -> mio::Token {
        mio::Token(h.0)
    }
}

impl From<mio::Token> for Handle {
    fn from(t: mio::Token) -> Handle {
        Handle(t.0)
    }
}

/// Per-message delivery flags surfaced by transports that support them
/// (only the multi-stream transport, per spec.md §4.B/§4.C).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvFlags {
    pub end_of_record: bool,
    pub notification: bool,
}

/// Outcome of one `recv` call.
pub enum RecvOutcome {
    Data {
        n: usize,
        source: Option<SocketAddr>,
        stream_id: u16,
        flags: RecvFlags,
    },
    WouldBlock,
    /// The peer closed the connection (stream transports only).
    Closed,
}

/// Capability surface every transport protocol binding exposes. Object-safe
/// so the scheduler can hold `Box<dyn Transport>` for each of the (up to)
/// four protocol bindings uniformly.
pub trait Transport {
    fn protocol(&self) -> Protocol;
    fn is_stream_oriented(&self) -> bool;
    fn is_message_oriented(&self) -> bool;
    fn supports_multi_stream(&self) -> bool;
    fn supports_partial_reliability(&self) -> bool;
    fn supports_notifications(&self) -> bool;

    /// Bind a listening socket (passive side). Returns the handle it was
    /// registered under.
    fn listen(&mut self, registry: &mio::Registry, addr: SocketAddr) -> io::Result<Handle>;

    /// Accept one pending connection on a listening handle, if any.
    fn accept(
        &mut self,
        registry: &mio::Registry,
        listener: Handle,
    ) -> io::Result<Option<(Handle, SocketAddr)>>;

    /// Open an outbound connection/association (active side).
    fn connect(&mut self, registry: &mio::Registry, addr: SocketAddr) -> io::Result<Handle>;

    /// Write one payload. `stream_id`/`ordered`/`reliable` are honoured by
    /// transports that support them and ignored otherwise.
    fn send(
        &mut self,
        handle: Handle,
        payload: &[u8],
        stream_id: u16,
        ordered: bool,
        reliable: bool,
    ) -> io::Result<usize>;

    /// Read into `buf`. A `RecvOutcome::WouldBlock` is not an error; the
    /// caller re-polls.
    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<RecvOutcome>;

    /// Whether `handle` currently has data queued to write (used to decide
    /// whether to set `WRITABLE` interest for a saturated sender).
    fn wants_write(&self, handle: Handle) -> bool {
        let _ = handle;
        false
    }

    fn close(&mut self, registry: &mio::Registry, handle: Handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_token_roundtrip() {
        let h = Handle(42);
        let t: mio::Token = h.into();
        assert_eq!(t, mio::Token(42));
        let h2: Handle = t.into();
        assert_eq!(h2, h);
    }
}
