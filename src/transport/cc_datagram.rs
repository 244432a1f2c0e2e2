//! `CongestionControlledDatagram` transport: an unreliable, message-oriented
//! datagram transport whose congestion behaviour is whatever the kernel's
//! DCCP implementation applies. No congestion-control algorithm is
//! reimplemented here (spec.md's explicit Non-goal) — this binding only
//! creates the raw socket and relays reads/writes.
//!
//! Most hosts do not build DCCP support into their kernel, so construction
//! commonly fails; per spec.md §6 this transport "may be absent if the OS
//! lacks it", and callers must treat that as a normal, non-fatal outcome
//! rather than a setup error.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd};

use mio::net::UdpSocket;
use mio::{Interest, Registry};
use socket2::{Domain, Socket, Type};

use crate::flow::Protocol;
use crate::transport::{Handle, RecvFlags, RecvOutcome, Transport};

/// IPPROTO_DCCP, per RFC 4340. Not exposed by `libc` on every target, so
/// named directly.
const IPPROTO_DCCP: i32 = 33;

pub struct CcDatagramTransport {
    sockets: HashMap<Handle, UdpSocket>,
    next_token: usize,
}

impl CcDatagramTransport {
    pub fn new() -> Self {
        Self::with_base(0)
    }

    /// See `ReliableStreamTransport::with_base`.
    pub fn with_base(base: usize) -> Self {
        Self {
            sockets: HashMap::new(),
            next_token: base,
        }
    }

    fn alloc_handle(&mut self) -> Handle {
        let h = Handle(self.next_token);
        self.next_token += 1;
        h
    }

    /// Attempt to create a raw DCCP-protocol datagram socket. Returns
    /// `Err(ErrorKind::Unsupported)`-shaped errors when the kernel rejects
    /// the protocol number, which the caller is expected to treat as "this
    /// transport is absent on this host", not a fatal setup error.
    fn raw_socket(domain: Domain) -> io::Result<Socket> {
        Socket::new(domain, Type::DGRAM, Some(IPPROTO_DCCP.into()))
    }

    fn to_mio(raw: Socket) -> io::Result<UdpSocket> {
        raw.set_nonblocking(true)?;
        let fd = raw.as_raw_fd();
        std::mem::forget(raw);
        // SAFETY: `fd` was just produced by `socket2::Socket` with `DGRAM`
        // semantics and ownership is transferred via `forget` above, so
        // `mio::net::UdpSocket` becomes the sole owner of the descriptor.
        Ok(unsafe { UdpSocket::from_raw_fd(fd) })
    }
}

impl Default for CcDatagramTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for CcDatagramTransport {
    fn protocol(&self) -> Protocol {
        Protocol::CongestionControlledDatagram
    }
    fn is_stream_oriented(&self) -> bool {
        false
    }
    fn is_message_oriented(&self) -> bool {
        true
    }
    fn supports_multi_stream(&self) -> bool {
        false
    }
    fn supports_partial_reliability(&self) -> bool {
        false
    }
    fn supports_notifications(&self) -> bool {
        false
    }

    fn listen(&mut self, registry: &Registry, addr: SocketAddr) -> io::Result<Handle> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let raw = Self::raw_socket(domain)?;
        raw.bind(&addr.into())?;
        let mut socket = Self::to_mio(raw)?;
        let handle = self.alloc_handle();
        registry.register(&mut socket, handle.into(), Interest::READABLE)?;
        self.sockets.insert(handle, socket);
        Ok(handle)
    }

    fn accept(
        &mut self,
        _registry: &Registry,
        _listener: Handle,
    ) -> io::Result<Option<(Handle, SocketAddr)>> {
        Ok(None)
    }

    fn connect(&mut self, registry: &Registry, addr: SocketAddr) -> io::Result<Handle> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let raw = Self::raw_socket(domain)?;
        raw.connect(&addr.into())?;
        let mut socket = Self::to_mio(raw)?;
        let handle = self.alloc_handle();
        registry.register(&mut socket, handle.into(), Interest::READABLE | Interest::WRITABLE)?;
        self.sockets.insert(handle, socket);
        Ok(handle)
    }

    fn send(
        &mut self,
        handle: Handle,
        payload: &[u8],
        _stream_id: u16,
        _ordered: bool,
        _reliable: bool,
    ) -> io::Result<usize> {
        match self.sockets.get(&handle) {
            Some(s) => s.send(payload),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown handle")),
        }
    }

    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        match self.sockets.get(&handle) {
            Some(s) => match s.recv_from(buf) {
                Ok((n, source)) => Ok(RecvOutcome::Data {
                    n,
                    source: Some(source),
                    stream_id: 0,
                    flags: RecvFlags {
                        end_of_record: true,
                        notification: false,
                    },
                }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
                Err(e) => Err(e),
            },
            None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown handle")),
        }
    }

    fn close(&mut self, registry: &Registry, handle: Handle) {
        if let Some(mut s) = self.sockets.remove(&handle) {
            let _ = registry.deregister(&mut s);
        }
    }
}

/// Probe whether the host kernel supports DCCP at all, without keeping the
/// socket around. Used at startup to decide whether to stand up the fourth
/// listener (spec.md §6).
pub fn is_available() -> bool {
    CcDatagramTransport::raw_socket(Domain::IPV4).is_ok()
}
