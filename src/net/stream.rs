//! Byte-stream seams under [`Socket`](super::socket::Socket) and
//! [`Listener`](super::listener::Listener), with their mio-backed
//! implementations.

use std::{
    io::{self, Read, Write},
    net::SocketAddr,
    os::fd::AsRawFd,
};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, SockAddr, Socket as Socket2, Type};

use crate::poll::Handle;

/// A connected (or connecting) non-blocking byte stream.
pub trait Stream: Read + Write {
    fn handle(&self) -> Handle;

    /// Pending socket error, e.g. the outcome of an asynchronous connect.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Fails with `NotConnected` while a connect is still in progress.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn set_nodelay(&self, enabled: bool) -> io::Result<()>;
}

/// A listening resource handing out accepted streams.
pub trait Acceptor {
    fn handle(&self) -> Handle;

    fn accept(&self) -> io::Result<(Box<dyn Stream>, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Stream for TcpStream {
    fn handle(&self) -> Handle {
        Handle::new(self.as_raw_fd())
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn set_nodelay(&self, enabled: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, enabled)
    }
}

impl Acceptor for TcpListener {
    fn handle(&self) -> Handle {
        Handle::new(self.as_raw_fd())
    }

    fn accept(&self) -> io::Result<(Box<dyn Stream>, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self)?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Starts a non-blocking connect to `remote`. The returned stream is still
/// connecting; completion is signalled by write readiness.
///
/// With `bind_to` set, the socket is bound to that local address first.
pub fn open_stream(remote: SocketAddr, bind_to: Option<SocketAddr>) -> io::Result<TcpStream> {
    match bind_to {
        None => TcpStream::connect(remote),
        Some(local) => connect_from(local, remote),
    }
}

pub fn open_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

fn connect_from(local: SocketAddr, remote: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket2::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(local))?;

    match socket.connect(&SockAddr::from(remote)) {
        Err(e) if e.raw_os_error() != Some(libc::EINPROGRESS) => return Err(e),
        _ => {}
    }
    Ok(TcpStream::from_std(socket.into()))
}
