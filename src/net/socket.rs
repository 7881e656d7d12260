//! Buffered, event-driven client socket.
//!
//! ```text
//!                connect()              write-ready, no error
//!  Disconnected ───────────▶ Connecting ─────────────────────▶ Connected
//!       ▲                        │                                │
//!       │                        │ except-ready / error           │ EOF, disconnect()
//!       │                        ▼                                ▼
//!       └──── connect() ──── Exception ◀── read/write error ── Disconnected
//! ```
//!
//! The socket keeps its poller registrations in step with its state:
//!
//! | state      | read | write                  | except |
//! |------------|------|------------------------|--------|
//! | Connecting |      | yes                    | yes    |
//! | Connected  | yes  | while data is queued   |        |
//! | otherwise  |      |                        |        |
//!
//! Registrations are always removed before the underlying stream is closed.

use std::{
    cell::RefCell,
    fmt,
    io::{self, Read, Write},
    net::SocketAddr,
    rc::Rc,
    time::SystemTime,
};

use tracing::{debug, trace, warn};

use crate::{
    buffer::ByteQueue,
    error::{Result, SocketError},
    event::{DisconnectCause, SocketEvent},
    handler::SocketHandler,
    net::{
        config::{SocketConfig, Transport},
        stream::{open_stream, Stream},
    },
    poll::{Handle, InterestClass, Poller},
    utils::resolve,
};

/// Lifecycle state of a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Exception,
}

impl SocketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketState::Disconnected => "disconnected",
            SocketState::Connecting => "connecting",
            SocketState::Connected => "connected",
            SocketState::Exception => "in exception state",
        }
    }

    /// Interest classes a socket in this state must be registered for.
    pub fn interests(&self, write_pending: bool) -> &'static [InterestClass] {
        match (self, write_pending) {
            (SocketState::Connecting, _) => &[InterestClass::Write, InterestClass::Except],
            (SocketState::Connected, true) => &[InterestClass::Read, InterestClass::Write],
            (SocketState::Connected, false) => &[InterestClass::Read],
            _ => &[],
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a socket came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Created by the application and opened with `connect()`.
    Outbound,
    /// Handed out by the listener bound to `listener`.
    Accepted { listener: SocketAddr },
}

struct SocketInner {
    poller: Poller,
    config: SocketConfig,
    state: SocketState,
    stream: Option<Box<dyn Stream>>,
    read_queue: ByteQueue,
    write_queue: ByteQueue,
    handler: Option<Rc<dyn SocketHandler>>,
    connected_at: Option<SystemTime>,
    remote: Option<SocketAddr>,
    origin: Origin,
}

impl SocketInner {
    fn handle(&self) -> Option<Handle> {
        self.stream.as_ref().map(|s| s.handle())
    }

    /// Adds and removes registrations until they match the state table.
    fn sync_interests(&self, weak: &std::rc::Weak<RefCell<SocketInner>>) {
        let Some(handle) = self.handle() else {
            return;
        };
        let wanted = self.state.interests(!self.write_queue.is_empty());

        for class in InterestClass::ALL {
            let registered = self.poller.is_registered(class, handle);
            let want = wanted.contains(&class);
            if want && !registered {
                self.poller
                    .add_interest(class, handle, ready_callback(weak.clone(), class));
            } else if !want && registered {
                // present, so this cannot fail
                let _ = self.poller.remove_interest(class, handle);
            }
        }
    }

    /// Deregisters, then drops the stream.
    fn close(&mut self, weak: &std::rc::Weak<RefCell<SocketInner>>, next: SocketState) {
        self.state = next;
        self.sync_interests(weak);
        if let Some(stream) = self.stream.take() {
            trace!(handle = %stream.handle(), "closing stream");
            drop(stream);
        }
        self.connected_at = None;
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle() {
            for class in InterestClass::ALL {
                if self.poller.is_registered(class, handle) {
                    let _ = self.poller.remove_interest(class, handle);
                }
            }
            debug!(%handle, state = %self.state, "socket dropped while open");
        }
    }
}

fn ready_callback(
    weak: std::rc::Weak<RefCell<SocketInner>>,
    class: InterestClass,
) -> impl Fn(&Poller, Handle) + 'static {
    move |_: &Poller, handle: Handle| {
        if let Some(inner) = weak.upgrade() {
            Socket { inner }.on_ready(class, handle);
        }
    }
}

/// A non-blocking client connection with buffered reads and writes.
///
/// `Socket` is a cheap handle; clones refer to the same connection. The
/// connection is closed when the last handle is dropped. Poller callbacks
/// only hold weak references, so registrations never keep a socket alive.
///
/// ## Example
///
/// ```rust,no_run
/// use sockpoll::prelude::*;
///
/// let poller = Poller::new()?;
/// let config = SocketConfig::builder().address("127.0.0.1").port(7000).build()?;
/// let socket = Socket::new(&poller, config)?;
///
/// socket.set_handler(|socket: &Socket, event: SocketEvent| match event {
///     SocketEvent::Connected { .. } => {
///         let _ = socket.write(b"PING\n");
///     }
///     SocketEvent::ReadQueueFilled { .. } => {
///         while let Some(line) = socket.read_line() {
///             println!("got {}", line);
///         }
///     }
///     _ => {}
/// });
/// socket.connect()?;
///
/// while socket.is_open() {
///     poller.poll(sockpoll::utils::block_time(0.1))?;
/// }
/// # Ok::<(), sockpoll::error::SocketError>(())
/// ```
#[derive(Clone)]
pub struct Socket {
    inner: Rc<RefCell<SocketInner>>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Socket")
            .field("address", &inner.config.address)
            .field("port", &inner.config.port)
            .field("state", &inner.state)
            .field("handle", &inner.handle())
            .finish()
    }
}

impl Socket {
    /// Creates a disconnected socket. Fails fast on an invalid
    /// configuration or missing secure-transport prerequisites.
    pub fn new(poller: &Poller, config: SocketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(poller, config, Origin::Outbound))
    }

    fn from_parts(poller: &Poller, config: SocketConfig, origin: Origin) -> Self {
        let delimiter = config.line_delimiter.clone();
        Self {
            inner: Rc::new(RefCell::new(SocketInner {
                poller: poller.clone(),
                config,
                state: SocketState::Disconnected,
                stream: None,
                read_queue: ByteQueue::with_delimiter(&delimiter),
                write_queue: ByteQueue::new(),
                handler: None,
                connected_at: None,
                remote: None,
                origin,
            })),
        }
    }

    /// Wraps a stream the OS has already connected, e.g. one returned by
    /// accept. The socket starts out `Connected` and registered for reads.
    pub(crate) fn accepted(
        poller: &Poller,
        config: SocketConfig,
        stream: Box<dyn Stream>,
        peer: SocketAddr,
        listener: SocketAddr,
    ) -> Self {
        let socket = Self::from_parts(poller, config, Origin::Accepted { listener });
        {
            let mut inner = socket.inner.borrow_mut();
            if let Err(e) = stream.set_nodelay(inner.config.no_delay) {
                warn!(%peer, error = %e, "could not set TCP_NODELAY");
            }
            inner.stream = Some(stream);
            inner.remote = Some(peer);
            inner.state = SocketState::Connected;
            inner.connected_at = Some(SystemTime::now());
            inner.sync_interests(&Rc::downgrade(&socket.inner));
        }
        socket
    }

    /// Installs the receiver of this socket's events, replacing any
    /// previous one.
    pub fn set_handler<H>(&self, handler: H)
    where
        H: SocketHandler + 'static,
    {
        self.inner.borrow_mut().handler = Some(Rc::new(handler));
    }

    pub fn clear_handler(&self) {
        self.inner.borrow_mut().handler = None;
    }

    /// Starts connecting. Does nothing if the socket is already connecting
    /// or connected.
    ///
    /// Completion is reported asynchronously through `Connected` or
    /// `ConnectionFailed`. If the connection cannot even be started the
    /// socket moves to `Exception` and the error is returned here instead.
    pub fn connect(&self) -> Result<()> {
        let (remote, bind_to) = {
            let inner = self.inner.borrow();
            match inner.state {
                SocketState::Connecting | SocketState::Connected => return Ok(()),
                SocketState::Disconnected | SocketState::Exception => {}
            }
            (
                resolve(&inner.config.address, inner.config.port),
                inner.config.bind_to,
            )
        };

        let opened = remote.and_then(|remote| {
            open_stream(remote, bind_to)
                .map(|stream| (stream, remote))
                .map_err(SocketError::ConnectionInit)
        });
        match opened {
            Ok((stream, remote)) => {
                self.begin_connect(Box::new(stream), remote);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "could not start connection");
                self.inner.borrow_mut().state = SocketState::Exception;
                Err(e)
            }
        }
    }

    /// Takes ownership of a stream whose connect is in flight.
    pub(crate) fn begin_connect(&self, stream: Box<dyn Stream>, remote: SocketAddr) {
        let mut inner = self.inner.borrow_mut();
        let handle = stream.handle();
        inner.stream = Some(stream);
        inner.remote = Some(remote);
        inner.origin = Origin::Outbound;
        inner.connected_at = None;
        inner.state = SocketState::Connecting;
        inner.sync_interests(&Rc::downgrade(&self.inner));
        debug!(%handle, %remote, "connecting");
        if inner.config.transport.is_secure() {
            warn!(%remote, "secure transport configured but no TLS layer is attached; data is sent unencrypted");
        }
    }

    /// Closes the connection without flushing queued writes and emits
    /// `Disconnected { cause: Local }`.
    pub fn disconnect(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                SocketState::Connecting | SocketState::Connected => {}
                state => return Err(SocketError::invalid_state("disconnect", state.as_str())),
            }
            let dropped = inner.write_queue.len();
            inner.write_queue.clear();
            inner.close(&Rc::downgrade(&self.inner), SocketState::Disconnected);
            debug!(unsent = dropped, "disconnected locally");
        }
        self.emit(SocketEvent::Disconnected {
            cause: DisconnectCause::Local,
        });
        Ok(())
    }

    /// Queues `data` for sending. Only valid while connected; empty input
    /// is rejected.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != SocketState::Connected {
            return Err(SocketError::invalid_state("write", inner.state.as_str()));
        }
        if data.is_empty() {
            return Err(SocketError::EmptyWrite);
        }

        let was_empty = inner.write_queue.is_empty();
        inner.write_queue.append(data);
        if was_empty {
            inner.sync_interests(&Rc::downgrade(&self.inner));
        }
        trace!(bytes = data.len(), pending = inner.write_queue.len(), "queued write");
        Ok(())
    }

    /// Takes up to `max` bytes (everything when `None`) from the read
    /// queue. `None` when nothing has been received or `max` is zero.
    pub fn read(&self, max: Option<usize>) -> Option<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        if inner.read_queue.is_empty() || max == Some(0) {
            return None;
        }
        let n = max.unwrap_or(inner.read_queue.len());
        Some(inner.read_queue.consume(n))
    }

    /// Takes the next complete line, without its delimiter.
    pub fn read_line(&self) -> Option<String> {
        self.inner
            .borrow_mut()
            .read_queue
            .next_line()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
    }

    /// Takes every complete line; a trailing partial line stays queued.
    pub fn read_lines(&self) -> Option<Vec<String>> {
        self.inner
            .borrow_mut()
            .read_queue
            .all_complete_lines()
            .map(|lines| {
                lines
                    .iter()
                    .map(|line| String::from_utf8_lossy(line).into_owned())
                    .collect()
            })
    }

    pub fn set_line_delimiter(&self, delimiter: &[u8]) -> Result<()> {
        if delimiter.is_empty() {
            return Err(SocketError::Configuration(
                "line_delimiter must not be empty".into(),
            ));
        }
        let mut inner = self.inner.borrow_mut();
        inner.read_queue.set_delimiter(delimiter);
        inner.config.line_delimiter = delimiter.to_vec();
        Ok(())
    }

    pub fn clear_read_queue(&self) {
        self.inner.borrow_mut().read_queue.clear();
    }

    pub fn state(&self) -> SocketState {
        self.inner.borrow().state
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            SocketState::Connecting | SocketState::Connected
        )
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    pub fn handle(&self) -> Option<Handle> {
        self.inner.borrow().handle()
    }

    pub fn origin(&self) -> Origin {
        self.inner.borrow().origin
    }

    pub fn transport(&self) -> Transport {
        self.inner.borrow().config.transport.clone()
    }

    /// Whether the socket was configured for [`Transport::Secure`]. The
    /// bytes themselves are not encrypted by this crate.
    pub fn is_secure(&self) -> bool {
        self.inner.borrow().config.transport.is_secure()
    }

    /// When the current connection was established.
    pub fn time_connected(&self) -> Option<SystemTime> {
        self.inner.borrow().connected_at
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        match (inner.state, inner.remote) {
            (SocketState::Connecting | SocketState::Connected, Some(addr)) => Ok(addr),
            (state, _) => Err(SocketError::invalid_state("query the remote address", state.as_str())),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        match &inner.stream {
            Some(stream) => Ok(stream.local_addr()?),
            None => Err(SocketError::invalid_state(
                "query the local address",
                inner.state.as_str(),
            )),
        }
    }

    /// True when the peer is on this host.
    pub fn is_local(&self) -> bool {
        self.remote_addr()
            .map(|addr| addr.ip().is_loopback())
            .unwrap_or(false)
    }

    pub fn has_read_buffer(&self) -> bool {
        !self.inner.borrow().read_queue.is_empty()
    }

    pub fn has_write_buffer(&self) -> bool {
        !self.inner.borrow().write_queue.is_empty()
    }

    pub fn pending_read(&self) -> usize {
        self.inner.borrow().read_queue.len()
    }

    pub fn pending_write(&self) -> usize {
        self.inner.borrow().write_queue.len()
    }

    fn emit(&self, event: SocketEvent) {
        let handler = self.inner.borrow().handler.clone();
        trace!(event = %event.kind(), "emitting");
        if let Some(handler) = handler {
            handler.handle_event(self, event);
        }
    }

    fn on_ready(&self, class: InterestClass, handle: Handle) {
        let state = {
            let inner = self.inner.borrow();
            if inner.handle() != Some(handle) {
                return;
            }
            inner.state
        };

        match (class, state) {
            (InterestClass::Read, SocketState::Connected) => self.on_readable(),
            (InterestClass::Write, SocketState::Connecting) => self.complete_connect(),
            (InterestClass::Write, SocketState::Connected) => self.on_writable(),
            (InterestClass::Except, SocketState::Connecting) => self.on_connect_error(),
            (class, state) => trace!(%handle, ?class, %state, "ignoring readiness"),
        }
    }

    fn complete_connect(&self) {
        let outcome = {
            let inner = self.inner.borrow();
            let Some(stream) = inner.stream.as_ref() else {
                return;
            };
            match stream.take_error() {
                Ok(Some(e)) | Err(e) => Err(e),
                Ok(None) => match stream.peer_addr() {
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                        trace!(handle = %stream.handle(), "connect still in progress");
                        return;
                    }
                    other => other,
                },
            }
        };

        match outcome {
            Ok(peer) => self.finish_connect(peer),
            Err(e) => self.fail_connect(e),
        }
    }

    fn finish_connect(&self, peer: SocketAddr) {
        let at = SystemTime::now();
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(stream) = inner.stream.as_ref() {
                if let Err(e) = stream.set_nodelay(inner.config.no_delay) {
                    warn!(%peer, error = %e, "could not set TCP_NODELAY");
                }
            }
            inner.state = SocketState::Connected;
            inner.remote = Some(peer);
            inner.connected_at = Some(at);
            inner.sync_interests(&Rc::downgrade(&self.inner));
            debug!(%peer, pending = inner.write_queue.len(), "connected");
        }
        self.emit(SocketEvent::Connected { at });
    }

    /// Except readiness only fails the attempt when the stream has an error
    /// to show for it. Without one the readiness may belong to an earlier
    /// owner of the same handle, so it goes through the same checks as
    /// write readiness.
    fn on_connect_error(&self) {
        let pending = {
            let inner = self.inner.borrow();
            let Some(stream) = inner.stream.as_ref() else {
                return;
            };
            stream.take_error().unwrap_or_else(Some)
        };

        match pending {
            Some(reason) => self.fail_connect(reason),
            None => self.complete_connect(),
        }
    }

    fn fail_connect(&self, reason: io::Error) {
        {
            let mut inner = self.inner.borrow_mut();
            warn!(remote = ?inner.remote, error = %reason, "connection failed");
            inner.close(&Rc::downgrade(&self.inner), SocketState::Exception);
        }
        self.emit(SocketEvent::ConnectionFailed {
            reason: SocketError::ConnectionFailed(reason),
        });
    }

    fn on_readable(&self) {
        let event = {
            let mut inner = self.inner.borrow_mut();
            let mut chunk = inner.poller.buffer_pool().acquire(inner.config.read_chunk_size);
            let Some(stream) = inner.stream.as_mut() else {
                return;
            };

            match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(remote = ?inner.remote, "peer closed the connection");
                    inner.close(&Rc::downgrade(&self.inner), SocketState::Disconnected);
                    SocketEvent::Disconnected {
                        cause: DisconnectCause::Remote,
                    }
                }
                Ok(n) => {
                    inner.read_queue.append(&chunk[..n]);
                    trace!(bytes = n, queued = inner.read_queue.len(), "read");
                    SocketEvent::ReadQueueFilled { bytes_read: n }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    SocketEvent::ReadQueueFilled { bytes_read: 0 }
                }
                Err(e) => {
                    warn!(remote = ?inner.remote, error = %e, "read failed");
                    inner.close(&Rc::downgrade(&self.inner), SocketState::Exception);
                    SocketEvent::ReadException {
                        reason: SocketError::Read(e),
                    }
                }
            }
        };
        self.emit(event);
    }

    fn on_writable(&self) {
        let event = {
            let mut inner = self.inner.borrow_mut();
            if inner.write_queue.is_empty() {
                inner.sync_interests(&Rc::downgrade(&self.inner));
                return;
            }

            let SocketInner {
                stream,
                write_queue,
                ..
            } = &mut *inner;
            let Some(stream) = stream.as_mut() else {
                return;
            };
            let result = stream.write(write_queue.as_slice());

            match result {
                Ok(n) => {
                    inner.write_queue.truncate(n);
                    trace!(bytes = n, pending = inner.write_queue.len(), "wrote");
                    if !inner.write_queue.is_empty() {
                        return;
                    }
                    inner.sync_interests(&Rc::downgrade(&self.inner));
                    SocketEvent::WriteQueueDrained
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return;
                }
                Err(e) => {
                    warn!(remote = ?inner.remote, error = %e, "write failed");
                    inner.close(&Rc::downgrade(&self.inner), SocketState::Exception);
                    SocketEvent::WriteException {
                        reason: SocketError::Write(e),
                    }
                }
            }
        };
        self.emit(event);
    }
}
