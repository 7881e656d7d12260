//! Client and listening sockets driven by a [`Poller`](crate::poll::Poller).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │  ┌──────────────┐          ┌──────────────────┐             │
//! │  │ Socket /     │────────▶│ SocketHandler /  │             │
//! │  │ Listener     │  events  │ ListenerHandler  │             │
//! │  └──────────────┘          └──────────────────┘             │
//! └────────┬────────────────────────────────────────────────────┘
//!          │ add_interest / remove_interest
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Poller: read / write / except maps ──▶ Selector (mio)      │
//! └────────┬────────────────────────────────────────────────────┘
//!          │ readiness
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Operating System (epoll/kqueue)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the thread that calls `Poller::poll`. A readiness
//! callback performs the syscall, updates the socket's queues and state, and
//! raises the resulting event to the installed handler before `poll`
//! moves on to the next ready handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use sockpoll::prelude::*;
//! use std::{cell::RefCell, rc::Rc};
//!
//! # fn main() -> sockpoll::error::Result<()> {
//! let event_loop = EventLoop::new()?;
//! let config = ListenerConfig::builder().port(7000).build()?;
//! let listener = Listener::new(event_loop.poller(), config)?;
//! let clients: Rc<RefCell<Vec<Socket>>> = Rc::default();
//!
//! let keep = clients.clone();
//! listener.set_handler(move |_: &Listener, event: ListenerEvent| {
//!     if let ListenerEvent::Accepted(socket) = event {
//!         socket.set_handler(|socket: &Socket, event: SocketEvent| {
//!             if let SocketEvent::ReadQueueFilled { .. } = event {
//!                 while let Some(line) = socket.read_line() {
//!                     let _ = socket.write(format!("{}\n", line).as_bytes());
//!                 }
//!             }
//!         });
//!         keep.borrow_mut().push(socket);
//!     }
//! });
//!
//! listener.listen()?;
//! event_loop.run()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod listener;
pub mod socket;
pub mod stream;
