use std::{
    cell::RefCell,
    fmt, io,
    net::SocketAddr,
    rc::{Rc, Weak},
    time::SystemTime,
};

use tracing::{debug, info, trace, warn};

use crate::{
    error::{Result, SocketError},
    event::ListenerEvent,
    handler::ListenerHandler,
    net::{
        config::{ListenerConfig, SocketConfig},
        socket::Socket,
        stream::{open_listener, Acceptor},
    },
    poll::{Handle, InterestClass, Poller},
    utils::resolve,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Closed,
    Listening,
}

struct ListenerInner {
    poller: Poller,
    config: ListenerConfig,
    state: ListenerState,
    acceptor: Option<Box<dyn Acceptor>>,
    handler: Option<Rc<dyn ListenerHandler>>,
    accepted: u64,
    port: u16,
    local: Option<SocketAddr>,
    listening_since: Option<SystemTime>,
}

impl ListenerInner {
    fn handle(&self) -> Option<Handle> {
        self.acceptor.as_ref().map(|a| a.handle())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle() {
            if self.poller.is_registered(InterestClass::Read, handle) {
                let _ = self.poller.remove_interest(InterestClass::Read, handle);
            }
        }
        self.acceptor = None;
        self.state = ListenerState::Closed;
        self.listening_since = None;
    }

    /// Settings handed down to a socket accepted from `peer`. The endpoint
    /// is the peer's; everything else comes from the listener.
    fn accepted_config(&self, peer: SocketAddr) -> SocketConfig {
        SocketConfig {
            address: peer.ip().to_string(),
            port: peer.port(),
            transport: self.config.transport.clone(),
            bind_to: None,
            read_chunk_size: self.config.read_chunk_size,
            line_delimiter: self.config.line_delimiter.clone(),
            no_delay: self.config.no_delay,
        }
    }
}

impl Drop for ListenerInner {
    fn drop(&mut self) {
        if self.state == ListenerState::Listening {
            debug!(port = self.port, "listener dropped while listening");
            self.close();
        }
    }
}

/// A listening socket producing connected [`Socket`]s.
///
/// Each read readiness accepts exactly one pending connection, so several
/// listeners on one poller are served in turn. Accepted sockets inherit the
/// listener's transport, read chunk size and line delimiter, and are handed
/// to the handler through [`ListenerEvent::Accepted`]. Without a handler
/// they are closed straight away.
///
/// ## Example
///
/// ```rust,no_run
/// use sockpoll::prelude::*;
/// use std::{cell::RefCell, rc::Rc};
///
/// let poller = Poller::new()?;
/// let listener = Listener::new(&poller, ListenerConfig::builder().port(7000).build()?)?;
/// let clients = Rc::new(RefCell::new(Vec::new()));
///
/// let keep = clients.clone();
/// listener.set_handler(move |_: &Listener, event: ListenerEvent| {
///     if let ListenerEvent::Accepted(socket) = event {
///         keep.borrow_mut().push(socket);
///     }
/// });
/// listener.listen()?;
/// # Ok::<(), sockpoll::error::SocketError>(())
/// ```
#[derive(Clone)]
pub struct Listener {
    inner: Rc<RefCell<ListenerInner>>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Listener")
            .field("address", &inner.config.address)
            .field("port", &inner.port)
            .field("state", &inner.state)
            .field("accepted", &inner.accepted)
            .finish()
    }
}

impl Listener {
    pub fn new(poller: &Poller, config: ListenerConfig) -> Result<Self> {
        config.validate()?;
        let port = config.port;
        Ok(Self {
            inner: Rc::new(RefCell::new(ListenerInner {
                poller: poller.clone(),
                config,
                state: ListenerState::Closed,
                acceptor: None,
                handler: None,
                accepted: 0,
                port,
                local: None,
                listening_since: None,
            })),
        })
    }

    pub fn set_handler<H>(&self, handler: H)
    where
        H: ListenerHandler + 'static,
    {
        self.inner.borrow_mut().handler = Some(Rc::new(handler));
    }

    pub fn clear_handler(&self) {
        self.inner.borrow_mut().handler = None;
    }

    /// Binds and starts listening. Does nothing if already listening.
    pub fn listen(&self) -> Result<()> {
        let addr = {
            let inner = self.inner.borrow();
            if inner.state == ListenerState::Listening {
                return Ok(());
            }
            resolve(&inner.config.address, inner.config.port)?
        };
        let acceptor = open_listener(addr).map_err(SocketError::ListenInit)?;
        self.begin_listen(Box::new(acceptor))
    }

    pub(crate) fn begin_listen(&self, acceptor: Box<dyn Acceptor>) -> Result<()> {
        let local = acceptor.local_addr().map_err(SocketError::ListenInit)?;
        let handle = acceptor.handle();

        let mut inner = self.inner.borrow_mut();
        inner.acceptor = Some(acceptor);
        inner.local = Some(local);
        inner.port = local.port();
        inner.state = ListenerState::Listening;
        inner.listening_since = Some(SystemTime::now());

        let weak = Rc::downgrade(&self.inner);
        inner
            .poller
            .add_interest(InterestClass::Read, handle, accept_callback(weak));
        info!(%local, %handle, secure = inner.config.transport.is_secure(), "listening");
        if inner.config.transport.is_secure() {
            warn!(%local, "secure transport configured but no TLS layer is attached; accepted connections are unencrypted");
        }
        Ok(())
    }

    /// Stops listening and emits `Terminated`. Does nothing if not
    /// listening.
    pub fn terminate(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ListenerState::Listening {
                return Ok(());
            }
            inner.close();
            info!(port = inner.port, accepted = inner.accepted, "listener terminated");
        }
        self.emit(ListenerEvent::Terminated);
        Ok(())
    }

    pub fn state(&self) -> ListenerState {
        self.inner.borrow().state
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    /// Configured port, or the OS-assigned one once listening.
    pub fn port(&self) -> u16 {
        self.inner.borrow().port
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        match (inner.state, inner.local) {
            (ListenerState::Listening, Some(addr)) => Ok(addr),
            _ => Err(SocketError::invalid_state("query the local address", "closed")),
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.inner.borrow().handle()
    }

    /// Connections accepted over the listener's lifetime.
    pub fn accepted_count(&self) -> u64 {
        self.inner.borrow().accepted
    }

    pub fn listening_since(&self) -> Option<SystemTime> {
        self.inner.borrow().listening_since
    }

    /// Whether the listener was configured for
    /// [`Transport::Secure`](crate::net::config::Transport::Secure). Accepted
    /// connections are still plain TCP.
    pub fn is_secure(&self) -> bool {
        self.inner.borrow().config.transport.is_secure()
    }

    fn emit(&self, event: ListenerEvent) {
        let handler = self.inner.borrow().handler.clone();
        match handler {
            Some(handler) => handler.handle_event(self, event),
            None => {
                if let ListenerEvent::Accepted(socket) = event {
                    debug!(peer = ?socket.remote_addr().ok(), "no handler, closing accepted socket");
                    let _ = socket.disconnect();
                }
            }
        }
    }

    fn on_acceptable(&self, handle: Handle) {
        let event = {
            let mut inner = self.inner.borrow_mut();
            if inner.handle() != Some(handle) || inner.state != ListenerState::Listening {
                return;
            }
            let Some(acceptor) = inner.acceptor.as_ref() else {
                return;
            };

            match acceptor.accept() {
                Ok((stream, peer)) => {
                    inner.accepted += 1;
                    let listener = inner
                        .local
                        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], inner.port)));
                    let socket = Socket::accepted(
                        &inner.poller,
                        inner.accepted_config(peer),
                        stream,
                        peer,
                        listener,
                    );
                    debug!(%peer, total = inner.accepted, "accepted connection");
                    ListenerEvent::Accepted(socket)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(%handle, "nothing to accept");
                    return;
                }
                Err(e) => {
                    warn!(port = inner.port, error = %e, "accept failed");
                    ListenerEvent::AcceptFailed(SocketError::Accept(e))
                }
            }
        };
        self.emit(event);
    }
}

fn accept_callback(weak: Weak<RefCell<ListenerInner>>) -> impl Fn(&Poller, Handle) + 'static {
    move |_: &Poller, handle: Handle| {
        if let Some(inner) = weak.upgrade() {
            Listener { inner }.on_acceptable(handle);
        }
    }
}
