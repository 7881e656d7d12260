use std::time::SystemTime;

use crate::{
    error::SocketError,
    event::{DisconnectCause, ListenerEvent, SocketEvent},
    net::{listener::Listener, socket::Socket},
};

/// Receives the events of one or more client sockets.
///
/// Override [`handle_event`](Self::handle_event) to see every event in one
/// place, or any of the `on_*` methods for just the ones you care about.
/// Closures of the form `Fn(&Socket, SocketEvent)` implement this trait.
///
/// Handlers run inside `Poller::poll` (or inside the socket call that
/// raised the event) with no borrow of the socket held, so they may freely
/// call back into it: write a reply, read lines, disconnect.
pub trait SocketHandler {
    fn handle_event(&self, socket: &Socket, event: SocketEvent) {
        match event {
            SocketEvent::Connected { at } => self.on_connected(socket, at),
            SocketEvent::Disconnected { cause } => self.on_disconnected(socket, cause),
            SocketEvent::ConnectionFailed { reason } => self.on_connection_failed(socket, reason),
            SocketEvent::ReadException { reason } => self.on_read_exception(socket, reason),
            SocketEvent::WriteException { reason } => self.on_write_exception(socket, reason),
            SocketEvent::ReadQueueFilled { bytes_read } => {
                self.on_read_queue_filled(socket, bytes_read)
            }
            SocketEvent::WriteQueueDrained => self.on_write_queue_drained(socket),
        }
    }

    fn on_connected(&self, socket: &Socket, at: SystemTime) {
        let _ = (socket, at);
    }

    fn on_disconnected(&self, socket: &Socket, cause: DisconnectCause) {
        let _ = (socket, cause);
    }

    fn on_connection_failed(&self, socket: &Socket, reason: SocketError) {
        let _ = (socket, reason);
    }

    fn on_read_exception(&self, socket: &Socket, reason: SocketError) {
        let _ = (socket, reason);
    }

    fn on_write_exception(&self, socket: &Socket, reason: SocketError) {
        let _ = (socket, reason);
    }

    /// Called after every read, including zero-length ones.
    fn on_read_queue_filled(&self, socket: &Socket, bytes_read: usize) {
        let _ = (socket, bytes_read);
    }

    fn on_write_queue_drained(&self, socket: &Socket) {
        let _ = socket;
    }
}

impl<F> SocketHandler for F
where
    F: Fn(&Socket, SocketEvent),
{
    fn handle_event(&self, socket: &Socket, event: SocketEvent) {
        self(socket, event)
    }
}

/// Receives the events of a listening socket.
pub trait ListenerHandler {
    fn handle_event(&self, listener: &Listener, event: ListenerEvent) {
        match event {
            ListenerEvent::Accepted(socket) => self.on_accepted(listener, socket),
            ListenerEvent::AcceptFailed(reason) => self.on_accept_failed(listener, reason),
            ListenerEvent::Terminated => self.on_terminated(listener),
        }
    }

    /// Takes ownership of the new connection. Keep the socket somewhere,
    /// or it is closed when this returns.
    fn on_accepted(&self, listener: &Listener, socket: Socket) {
        let _ = (listener, socket);
    }

    fn on_accept_failed(&self, listener: &Listener, reason: SocketError) {
        let _ = (listener, reason);
    }

    fn on_terminated(&self, listener: &Listener) {
        let _ = listener;
    }
}

impl<F> ListenerHandler for F
where
    F: Fn(&Listener, ListenerEvent),
{
    fn handle_event(&self, listener: &Listener, event: ListenerEvent) {
        self(listener, event)
    }
}
