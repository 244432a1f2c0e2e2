//! `ReliableStream` transport: a plain TCP byte connection. Stream-oriented,
//! single message per write is not guaranteed (the framed reader in
//! `reader.rs` handles reassembly), no multi-stream, no partial
//! reliability, no notifications.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry};

use crate::flow::Protocol;
use crate::transport::{Handle, RecvFlags, RecvOutcome, Transport};

enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
}

pub struct ReliableStreamTransport {
    sockets: HashMap<Handle, Socket>,
    next_token: usize,
}

impl ReliableStreamTransport {
    pub fn new() -> Self {
        Self::with_base(0)
    }

    /// `base` offsets every `Handle`/`mio::Token` this transport allocates,
    /// so that several transports sharing one `mio::Registry` (the
    /// scheduler's case) never collide on the same token value.
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

impl Default for ReliableStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReliableStreamTransport {
    fn protocol(&self) -> Protocol {
        Protocol::ReliableStream
    }
    fn is_stream_oriented(&self) -> bool {
        true
    }
    fn is_message_oriented(&self) -> bool {
        false
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
        let mut listener = TcpListener::bind(addr)?;
        let handle = self.alloc_handle();
        registry.register(&mut listener, handle.into(), Interest::READABLE)?;
        self.sockets.insert(handle, Socket::Listener(listener));
        Ok(handle)
    }

    fn accept(
        &mut self,
        registry: &Registry,
        listener: Handle,
    ) -> io::Result<Option<(Handle, SocketAddr)>> {
        let accepted = match self.sockets.get_mut(&listener) {
            Some(Socket::Listener(l)) => match l.accept() {
                Ok(pair) => Some(pair),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                Err(e) => return Err(e),
            },
            _ => return Err(io::Error::new(io::ErrorKind::NotFound, "not a listener")),
        };
        let Some((mut stream, peer)) = accepted else {
            return Ok(None);
        };
        let handle = self.alloc_handle();
        registry.register(&mut stream, handle.into(), Interest::READABLE)?;
        self.sockets.insert(handle, Socket::Stream(stream));
        Ok(Some((handle, peer)))
    }

    fn connect(&mut self, registry: &Registry, addr: SocketAddr) -> io::Result<Handle> {
        let mut stream = TcpStream::connect(addr)?;
        let handle = self.alloc_handle();
        registry.register(&mut stream, handle.into(), Interest::READABLE | Interest::WRITABLE)?;
        self.sockets.insert(handle, Socket::Stream(stream));
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
        match self.sockets.get_mut(&handle) {
            Some(Socket::Stream(s)) => s.write(payload),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "unknown handle")),
        }
    }

    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        match self.sockets.get_mut(&handle) {
            Some(Socket::Stream(s)) => match s.read(buf) {
                Ok(0) => Ok(RecvOutcome::Closed),
                Ok(n) => Ok(RecvOutcome::Data {
                    n,
                    source: None,
                    stream_id: 0,
                    flags: RecvFlags::default(),
                }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
                Err(e) => Err(e),
            },
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "unknown handle")),
        }
    }

    fn close(&mut self, registry: &Registry, handle: Handle) {
        match self.sockets.remove(&handle) {
            Some(Socket::Stream(mut s)) => {
                let _ = registry.deregister(&mut s);
            }
            Some(Socket::Listener(mut l)) => {
                let _ = registry.deregister(&mut l);
            }
            None => {}
        }
    }
}
