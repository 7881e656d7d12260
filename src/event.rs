use std::{fmt, time::SystemTime};

use crate::{error::SocketError, net::socket::Socket};

/// Who closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// `disconnect()` was called on this side.
    Local,
    /// The peer closed its end of the stream.
    Remote,
}

/// Lifecycle notifications raised by a client [`Socket`].
#[derive(Debug)]
pub enum SocketEvent {
    Connected { at: SystemTime },
    Disconnected { cause: DisconnectCause },
    ConnectionFailed { reason: SocketError },
    ReadException { reason: SocketError },
    WriteException { reason: SocketError },
    /// Bytes were appended to the read queue. `bytes_read` may be zero.
    ReadQueueFilled { bytes_read: usize },
    WriteQueueDrained,
}

impl SocketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::Connected { .. } => EventKind::Connected,
            SocketEvent::Disconnected { .. } => EventKind::Disconnected,
            SocketEvent::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            SocketEvent::ReadException { .. } => EventKind::ReadException,
            SocketEvent::WriteException { .. } => EventKind::WriteException,
            SocketEvent::ReadQueueFilled { .. } => EventKind::ReadQueueFilled,
            SocketEvent::WriteQueueDrained => EventKind::WriteQueueDrained,
        }
    }
}

/// Notifications raised by a [`Listener`](crate::net::listener::Listener).
pub enum ListenerEvent {
    /// A connection was accepted; the socket is already connected and
    /// registered for reads. Dropping it closes the connection.
    Accepted(Socket),
    AcceptFailed(SocketError),
    Terminated,
}

impl ListenerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ListenerEvent::Accepted(_) => EventKind::Accepted,
            ListenerEvent::AcceptFailed(_) => EventKind::AcceptFailed,
            ListenerEvent::Terminated => EventKind::ListenerTerminated,
        }
    }
}

impl fmt::Debug for ListenerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerEvent::Accepted(socket) => f
                .debug_tuple("Accepted")
                .field(&socket.handle())
                .finish(),
            ListenerEvent::AcceptFailed(e) => f.debug_tuple("AcceptFailed").field(e).finish(),
            ListenerEvent::Terminated => f.write_str("Terminated"),
        }
    }
}

/// Stable identifiers for every event, usable as log keys or metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectionFailed,
    ReadException,
    WriteException,
    ReadQueueFilled,
    WriteQueueDrained,
    Accepted,
    AcceptFailed,
    ListenerTerminated,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "socket.connected",
            EventKind::Disconnected => "socket.disconnected",
            EventKind::ConnectionFailed => "socket.connection_failed",
            EventKind::ReadException => "socket.read_exception",
            EventKind::WriteException => "socket.write_exception",
            EventKind::ReadQueueFilled => "socket.read_queue_filled",
            EventKind::WriteQueueDrained => "socket.write_queue_drained",
            EventKind::Accepted => "listener.accepted",
            EventKind::AcceptFailed => "listener.accept_failed",
            EventKind::ListenerTerminated => "listener.terminated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
