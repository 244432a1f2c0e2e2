//! `Datagram` transport: plain UDP. Message-oriented (one `recv` = one
//! datagram), no stream framing, no multi-stream, no partial reliability,
//! no notifications. The passive side has no per-peer sockets; flows are
//! resolved by source address and materialised lazily (spec.md §4.G).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::net::UdpSocket;
use mio::{Interest, Registry};

use crate::flow::Protocol;
use crate::transport::{Handle, RecvFlags, RecvOutcome, Transport};

pub struct DatagramTransport {
    sockets: HashMap<Handle, UdpSocket>,
    next_token: usize,
}

impl DatagramTransport {
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
}

impl Default for DatagramTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DatagramTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Datagram
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
        let mut socket = UdpSocket::bind(addr)?;
        let handle = self.alloc_handle();
        registry.register(&mut socket, handle.into(), Interest::READABLE)?;
        self.sockets.insert(handle, socket);
        Ok(handle)
    }

    /// UDP has no connection setup; the listening socket itself is the only
    /// handle and all peers are distinguished by source address.
    fn accept(
        &mut self,
        _registry: &Registry,
        _listener: Handle,
    ) -> io::Result<Option<(Handle, SocketAddr)>> {
        Ok(None)
    }

    fn connect(&mut self, registry: &Registry, addr: SocketAddr) -> io::Result<Handle> {
        let local: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let mut socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
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
                    // One `recv_from` is one whole datagram: always a
                    // complete record (spec.md §4.C.2).
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
