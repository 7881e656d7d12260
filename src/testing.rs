//! Scripted stand-ins for the OS, used by the unit tests.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{self, Read, Write},
    net::SocketAddr,
    os::fd::RawFd,
    path::PathBuf,
    rc::Rc,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    event::{EventKind, ListenerEvent, SocketEvent},
    net::{
        config::{SecureConfig, Transport},
        listener::Listener,
        socket::Socket,
        stream::{Acceptor, Stream},
    },
    poll::Handle,
    selector::{HandleSets, Selector},
};

thread_local! {
    static NEXT_FD: Cell<RawFd> = const { Cell::new(10_000) };
}

fn next_fd() -> RawFd {
    NEXT_FD.with(|fd| {
        let value = fd.get();
        fd.set(value + 1);
        value
    })
}

/// A secure transport whose certificate file exists. The file lives in the
/// temp dir and is unique per call.
pub(crate) fn secure_transport() -> (Transport, PathBuf) {
    let cert = std::env::temp_dir().join(format!(
        "sockpoll-test-{}-{}.pem",
        std::process::id(),
        next_fd()
    ));
    std::fs::write(&cert, b"-----BEGIN CERTIFICATE-----\n").expect("write test certificate");
    (Transport::Secure(SecureConfig::with_cert_file(&cert)), cert)
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a fmt subscriber installed for the current thread and
/// returns everything it logged.
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().expect("log buffer poisoned").clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[derive(Default)]
struct SelectorState {
    calls: usize,
    script: VecDeque<io::Result<HandleSets>>,
    last_interest: Option<HandleSets>,
    last_timeout: Option<Option<Duration>>,
    released: Vec<Handle>,
}

/// Replays queued readiness results. With nothing queued a call behaves
/// like a timeout. Clones share state, so a test keeps one clone for
/// scripting while the poller owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeSelector {
    state: Rc<RefCell<SelectorState>>,
}

impl FakeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ready(&self, ready: HandleSets) {
        self.state.borrow_mut().script.push_back(Ok(ready));
    }

    pub fn push_failure(&self, err: io::Error) {
        self.state.borrow_mut().script.push_back(Err(err));
    }

    /// Number of multiplexer calls made so far.
    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    pub fn last_interest(&self) -> Option<HandleSets> {
        self.state.borrow().last_interest.clone()
    }

    pub fn last_timeout(&self) -> Option<Option<Duration>> {
        self.state.borrow().last_timeout
    }

    pub fn released(&self) -> Vec<Handle> {
        self.state.borrow().released.clone()
    }
}

impl Selector for FakeSelector {
    fn select(&mut self, interest: &HandleSets, timeout: Option<Duration>) -> io::Result<HandleSets> {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        state.last_interest = Some(interest.clone());
        state.last_timeout = Some(timeout);

        let mut ready = match state.script.pop_front() {
            Some(result) => result?,
            None => return Ok(HandleSets::default()),
        };
        // like select(2), only report what was asked for
        for class in crate::poll::InterestClass::ALL {
            let wanted = interest.get(class);
            ready.get_mut(class).retain(|h| wanted.contains(h));
        }
        Ok(ready)
    }

    fn release(&mut self, handle: Handle) {
        self.state.borrow_mut().released.push(handle);
    }
}

#[derive(Default)]
pub(crate) struct StreamState {
    /// `Ok(vec![])` is end-of-stream; an exhausted script reads as WouldBlock.
    pub reads: VecDeque<io::Result<Vec<u8>>>,
    /// Bytes accepted per write call; an exhausted script accepts everything.
    pub write_limits: VecDeque<io::Result<usize>>,
    pub written: Vec<u8>,
    pub pending_error: Option<io::Error>,
    pub connected: bool,
    pub closed: bool,
    pub nodelay: Option<bool>,
}

/// In-memory [`Stream`]. The copy handed to a socket via
/// [`boxed`](Self::boxed) marks the stream closed when it is dropped.
pub(crate) struct FakeStream {
    fd: RawFd,
    peer: SocketAddr,
    local: SocketAddr,
    owner: bool,
    state: Rc<RefCell<StreamState>>,
}

impl FakeStream {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            fd: next_fd(),
            peer,
            local: "127.0.0.1:40000".parse().expect("literal address"),
            owner: false,
            state: Rc::default(),
        }
    }

    /// A stream the OS gave a descriptor number that is already in use
    /// elsewhere in the test, as happens right after a close.
    pub fn with_handle(peer: SocketAddr, handle: Handle) -> Self {
        let mut stream = Self::new(peer);
        stream.fd = handle.as_raw_fd();
        stream
    }

    pub fn connected(peer: SocketAddr) -> Self {
        let stream = Self::new(peer);
        stream.state.borrow_mut().connected = true;
        stream
    }

    pub fn boxed(&self) -> Box<dyn Stream> {
        Box::new(FakeStream {
            fd: self.fd,
            peer: self.peer,
            local: self.local,
            owner: true,
            state: Rc::clone(&self.state),
        })
    }

    pub fn handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    pub fn state(&self) -> std::cell::RefMut<'_, StreamState> {
        self.state.borrow_mut()
    }

    pub fn push_read(&self, data: &[u8]) {
        self.state().reads.push_back(Ok(data.to_vec()));
    }

    pub fn push_eof(&self) {
        self.state().reads.push_back(Ok(Vec::new()));
    }

    pub fn push_read_error(&self, kind: io::ErrorKind) {
        self.state().reads.push_back(Err(io::Error::new(kind, "scripted read failure")));
    }

    pub fn limit_next_write(&self, accepted: usize) {
        self.state().write_limits.push_back(Ok(accepted));
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.state()
            .write_limits
            .push_back(Err(io::Error::new(kind, "scripted write failure")));
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        if self.owner {
            self.state.borrow_mut().closed = true;
        }
    }
}

impl Read for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        match state.reads.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Err(e)) => Err(e),
            Some(Ok(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(Ok(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        let n = match state.write_limits.pop_front() {
            None => buf.len(),
            Some(limit) => limit?.min(buf.len()),
        };
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for FakeStream {
    fn handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(self.state.borrow_mut().pending_error.take())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        if self.state.borrow().connected {
            Ok(self.peer)
        } else {
            Err(io::ErrorKind::NotConnected.into())
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn set_nodelay(&self, enabled: bool) -> io::Result<()> {
        self.state.borrow_mut().nodelay = Some(enabled);
        Ok(())
    }
}

#[derive(Default)]
struct AcceptorState {
    pending: VecDeque<io::Result<(FakeStream, SocketAddr)>>,
    accept_calls: usize,
    closed: bool,
}

/// In-memory [`Acceptor`] with a queue of pending connections.
pub(crate) struct FakeAcceptor {
    fd: RawFd,
    local: SocketAddr,
    owner: bool,
    state: Rc<RefCell<AcceptorState>>,
}

impl FakeAcceptor {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            fd: next_fd(),
            local,
            owner: false,
            state: Rc::default(),
        }
    }

    pub fn boxed(&self) -> Box<dyn Acceptor> {
        Box::new(FakeAcceptor {
            fd: self.fd,
            local: self.local,
            owner: true,
            state: Rc::clone(&self.state),
        })
    }

    pub fn handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    /// Queues a connection from `peer`. The returned view shares state with
    /// the stream the listener will accept, for scripting reads.
    pub fn push_peer(&self, peer: SocketAddr) -> FakeStream {
        let stream = FakeStream::connected(peer);
        let server_side = FakeStream {
            fd: stream.fd,
            peer,
            local: self.local,
            owner: false,
            state: Rc::clone(&stream.state),
        };
        self.state
            .borrow_mut()
            .pending
            .push_back(Ok((server_side, peer)));
        stream
    }

    pub fn push_failure(&self, kind: io::ErrorKind) {
        self.state
            .borrow_mut()
            .pending
            .push_back(Err(io::Error::new(kind, "scripted accept failure")));
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn accept_calls(&self) -> usize {
        self.state.borrow().accept_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Drop for FakeAcceptor {
    fn drop(&mut self) {
        if self.owner {
            self.state.borrow_mut().closed = true;
        }
    }
}

impl Acceptor for FakeAcceptor {
    fn handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    fn accept(&self) -> io::Result<(Box<dyn Stream>, SocketAddr)> {
        let next = {
            let mut state = self.state.borrow_mut();
            state.accept_calls += 1;
            state.pending.pop_front()
        };
        match next {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Err(e)) => Err(e),
            Some(Ok((stream, peer))) => Ok((stream.boxed(), peer)),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Records socket events in arrival order.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Rc<RefCell<Vec<SocketEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, socket: &Socket) {
        let events = Rc::clone(&self.events);
        socket.set_handler(move |_: &Socket, event: SocketEvent| events.borrow_mut().push(event));
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.borrow().iter().map(SocketEvent::kind).collect()
    }

    pub fn take(&self) -> Vec<SocketEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// Records listener events; accepted sockets are kept alive here.
#[derive(Clone, Default)]
pub(crate) struct ListenerLog {
    kinds: Rc<RefCell<Vec<EventKind>>>,
    accepted: Rc<RefCell<Vec<Socket>>>,
}

impl ListenerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: &Listener) {
        let log = self.clone();
        listener.set_handler(move |_: &Listener, event: ListenerEvent| {
            log.kinds.borrow_mut().push(event.kind());
            if let ListenerEvent::Accepted(socket) = event {
                log.accepted.borrow_mut().push(socket);
            }
        });
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.kinds.borrow().clone()
    }

    pub fn accepted(&self) -> Vec<Socket> {
        self.accepted.borrow().clone()
    }
}
