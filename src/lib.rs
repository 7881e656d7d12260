//! # sockpoll
//! Non-blocking client and listening sockets on top of a single-threaded
//! readiness poller.
//!
//! A [`Poller`] holds three interest maps (read, write, except) from a
//! [`Handle`] to one callback each, and dispatches readiness reported by
//! the OS multiplexer (reached through [`mio`]). [`Socket`] and [`Listener`]
//! register themselves as their state changes, move bytes between the
//! kernel and their [`ByteQueue`]s, and report what happened through
//! events.
//!
//! ## Core Philosophy
//! - **One thread, no locks**: all state changes happen inside
//!   `Poller::poll` on the caller's thread
//! - **Explicit poller**: every socket is constructed against a poller
//!   instance, so independent reactors can coexist
//! - **No hidden I/O**: reads and writes only happen on readiness; the
//!   `read*` and `write` calls touch buffers only
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ EventLoop   │───▶│   Poller     │───▶│  Selector   │
//! └─────────────┘    └──────────────┘    └─────────────┘
//!                           │ callbacks
//!                           ▼
//!                    ┌──────────────┐    ┌─────────────┐
//!                    │ Socket /     │───▶│  Handlers   │
//!                    │ Listener     │    │  (events)   │
//!                    └──────────────┘    └─────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockpoll::prelude::*;
//!
//! struct Printer;
//!
//! impl SocketHandler for Printer {
//!     fn on_connected(&self, socket: &Socket, _at: std::time::SystemTime) {
//!         let _ = socket.write(b"HELLO\n");
//!     }
//!
//!     fn on_read_queue_filled(&self, socket: &Socket, _bytes: usize) {
//!         for line in socket.read_lines().unwrap_or_default() {
//!             println!("< {}", line);
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let event_loop = EventLoop::new()?;
//!     let config = SocketConfig::builder()
//!         .address("127.0.0.1")
//!         .port(7000)
//!         .build()?;
//!
//!     let socket = Socket::new(event_loop.poller(), config)?;
//!     socket.set_handler(Printer);
//!     socket.connect()?;
//!
//!     // returns once the socket is closed and nothing is left to poll
//!     event_loop.run()?;
//!     Ok(())
//! }
//! ```
//!
//! - [`poll`]: interest maps and single-pass dispatch
//! - [`selector`]: the multiplexer seam and its mio backend
//! - [`net`]: client sockets, listeners and their configuration
//! - [`event`] and [`handler`]: what sockets report and how to receive it
//! - [`reactor`]: a run loop around one poller
//! - [`buffer`]: the byte queue behind every socket
//! - [`error`]: error types and result handling

#[cfg(not(unix))]
compile_error!("sockpoll works with raw file descriptors and supports unix targets only");

pub mod buffer;
pub mod error;
pub mod event;
pub mod handler;
pub mod net;
pub mod object_pool;
pub mod poll;
pub mod reactor;
pub mod selector;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::ByteQueue;
pub use error::{Result, SocketError};
pub use event::{DisconnectCause, EventKind, ListenerEvent, SocketEvent};
pub use handler::{ListenerHandler, SocketHandler};
pub use net::{
    config::{ListenerConfig, SecureConfig, SocketConfig, Transport},
    listener::{Listener, ListenerState},
    socket::{Origin, Socket, SocketState},
};
pub use poll::{Handle, InterestClass, Poller};
pub use reactor::{EventLoop, StopHandle};

/// Re-exports of the types most applications need:
///
/// ```rust
/// use sockpoll::prelude::*;
/// ```
pub mod prelude {
    pub use crate::event::{DisconnectCause, ListenerEvent, SocketEvent};
    pub use crate::handler::{ListenerHandler, SocketHandler};
    pub use crate::net::config::{ListenerConfig, SecureConfig, SocketConfig, Transport};
    pub use crate::net::listener::Listener;
    pub use crate::net::socket::{Socket, SocketState};
    pub use crate::poll::{InterestClass, Poller};
    pub use crate::reactor::{EventLoop, StopHandle};
}
