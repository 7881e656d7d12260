//! The multiplexer seam under [`Poller`](crate::poll::Poller).
//!
//! A [`Selector`] performs one blocking readiness wait over three handle
//! sets, the way `select(2)` does. [`MioSelector`] is the production
//! backend; tests substitute a scripted one.

use std::{
    collections::{HashMap, HashSet},
    io,
    time::Duration,
};

use mio::{unix::SourceFd, Events, Interest, Token};
use tracing::trace;

use crate::poll::{Handle, InterestClass};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Handles grouped by readiness class. Used both for the interest passed to
/// [`Selector::select`] and for the readiness it reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSets {
    pub read: Vec<Handle>,
    pub write: Vec<Handle>,
    pub except: Vec<Handle>,
}

impl HandleSets {
    pub fn get(&self, class: InterestClass) -> &[Handle] {
        match class {
            InterestClass::Read => &self.read,
            InterestClass::Write => &self.write,
            InterestClass::Except => &self.except,
        }
    }

    pub fn get_mut(&mut self, class: InterestClass) -> &mut Vec<Handle> {
        match class {
            InterestClass::Read => &mut self.read,
            InterestClass::Write => &mut self.write,
            InterestClass::Except => &mut self.except,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.except.is_empty()
    }

    /// Total number of (class, handle) entries.
    pub fn len(&self) -> usize {
        self.read.len() + self.write.len() + self.except.len()
    }
}

/// One readiness wait over a set of handles.
pub trait Selector {
    /// Blocks until at least one handle in `interest` is ready in one of the
    /// classes it was listed under, or until `timeout` elapses (`None` waits
    /// forever). Returns the ready handles per class; an empty result means
    /// the wait timed out.
    fn select(&mut self, interest: &HandleSets, timeout: Option<Duration>) -> io::Result<HandleSets>;

    /// Called once a handle has left every interest set, before its owner
    /// closes it.
    fn release(&mut self, handle: Handle) {
        let _ = handle;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Wanted {
    read: bool,
    write: bool,
    except: bool,
}

impl Wanted {
    fn interest(&self) -> Interest {
        match (self.read, self.write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            // except-only handles still need some interest; readable
            // readiness is filtered out below
            _ => Interest::READABLE,
        }
    }
}

/// [`Selector`] over [`mio::Poll`].
///
/// mio is edge-triggered, so every handle is re-armed with `reregister` on
/// each call. A handle that is still ready is then reported again, which
/// gives the level-triggered behavior of `select(2)`.
pub struct MioSelector {
    poll: mio::Poll,
    events: Events,
    registered: HashMap<Handle, Interest>,
}

impl MioSelector {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    pub fn with_capacity(events_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: Events::with_capacity(events_capacity),
            registered: HashMap::new(),
        })
    }

    fn arm(&mut self, handle: Handle, interest: Interest) -> io::Result<()> {
        let fd = handle.as_raw_fd();
        let mut source = SourceFd(&fd);
        let registry = self.poll.registry();
        let token = Token(handle.token());

        if self.registered.contains_key(&handle) {
            match registry.reregister(&mut source, token, interest) {
                // the descriptor was closed and reused behind our back
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    registry.register(&mut source, token, interest)?
                }
                other => other?,
            }
        } else {
            match registry.register(&mut source, token, interest) {
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    registry.reregister(&mut source, token, interest)?
                }
                other => other?,
            }
        }
        self.registered.insert(handle, interest);
        Ok(())
    }

    fn forget(&mut self, handle: Handle) {
        if self.registered.remove(&handle).is_some() {
            let fd = handle.as_raw_fd();
            // fails harmlessly if the descriptor is already gone
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }
}

impl Selector for MioSelector {
    fn select(&mut self, interest: &HandleSets, timeout: Option<Duration>) -> io::Result<HandleSets> {
        let mut wanted: HashMap<Handle, Wanted> = HashMap::new();
        for &h in &interest.read {
            wanted.entry(h).or_default().read = true;
        }
        for &h in &interest.write {
            wanted.entry(h).or_default().write = true;
        }
        for &h in &interest.except {
            wanted.entry(h).or_default().except = true;
        }

        let stale: Vec<Handle> = self
            .registered
            .keys()
            .filter(|h| !wanted.contains_key(h))
            .copied()
            .collect();
        for handle in stale {
            self.forget(handle);
        }

        for (&handle, w) in &wanted {
            self.arm(handle, w.interest())?;
        }

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(HandleSets::default());
            }
            return Err(e);
        }

        let mut ready = HandleSets::default();
        let mut seen = HashSet::new();
        for event in self.events.iter() {
            let handle = Handle::from_token(event.token().0);
            let Some(w) = wanted.get(&handle) else {
                continue;
            };
            if !seen.insert(handle) {
                continue;
            }
            let error = event.is_error();
            if w.read && (event.is_readable() || event.is_read_closed() || error) {
                ready.read.push(handle);
            }
            if w.write && (event.is_writable() || event.is_write_closed() || error) {
                ready.write.push(handle);
            }
            if w.except && (error || event.is_priority()) {
                ready.except.push(handle);
            }
        }
        trace!(
            read = ready.read.len(),
            write = ready.write.len(),
            except = ready.except.len(),
            "select returned"
        );
        Ok(ready)
    }

    fn release(&mut self, handle: Handle) {
        self.forget(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_times_out_with_nothing_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let handle = Handle::new(listener.as_raw_fd());

        let mut selector = MioSelector::new().unwrap();
        let interest = HandleSets {
            read: vec![handle],
            ..Default::default()
        };
        let ready = selector
            .select(&interest, Some(Duration::from_millis(20)))
            .unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_readiness_is_reported_again_until_consumed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.write_all(b"ping").unwrap();

        let handle = Handle::new(server.as_raw_fd());
        let mut selector = MioSelector::new().unwrap();
        let interest = HandleSets {
            read: vec![handle],
            ..Default::default()
        };

        for _ in 0..2 {
            let ready = selector
                .select(&interest, Some(Duration::from_secs(5)))
                .unwrap();
            assert_eq!(ready.read, vec![handle]);
            assert!(ready.write.is_empty());
        }

        selector.release(handle);
        assert!(selector.registered.is_empty());
    }
}
