//! Readiness registry and single-pass dispatch.
//!
//! The [`Poller`] keeps three interest maps (read, write, except), each
//! mapping a [`Handle`] to exactly one callback. [`Poller::poll`] hands the
//! union of those maps to its [`Selector`], waits once, and then calls the
//! registered callback for every ready (class, handle) pair.
//!
//! ```text
//!   add_interest / remove_interest
//!              │
//!              ▼
//!   ┌────────────────────┐  snapshot   ┌──────────────┐
//!   │ read   {h → cb}    │────────────▶│   Selector   │ one blocking wait
//!   │ write  {h → cb}    │             └──────┬───────┘
//!   │ except {h → cb}    │◀── lookup ─────────┘ ready sets
//!   └────────────────────┘
//!              │  Read, then Write, then Except
//!              ▼
//!        cb(&poller, handle)
//! ```
//!
//! Callbacks run synchronously on the thread calling `poll()`. They may add
//! or remove interests (their own or anyone's), but must not call `poll()`
//! themselves; a nested call fails with [`SocketError::ReentrantPoll`].
//! Interests added from a callback are dispatched from the next `poll()`
//! on, since a closed descriptor may be reused by the handle they name.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    os::fd::RawFd,
    rc::Rc,
    time::Duration,
};

use tracing::trace;

use crate::{
    error::{Result, SocketError},
    object_pool::BufferPool,
    selector::{HandleSets, MioSelector, Selector},
};

/// Opaque identifier of a pollable OS resource.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(RawFd);

impl Handle {
    pub fn new(fd: RawFd) -> Self {
        Handle(fd)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0
    }

    pub(crate) fn token(&self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_token(token: usize) -> Self {
        Handle(token as RawFd)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Readiness class of an interest registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterestClass {
    Read,
    Write,
    Except,
}

impl InterestClass {
    /// Dispatch order within one poll cycle.
    pub const ALL: [InterestClass; 3] = [
        InterestClass::Read,
        InterestClass::Write,
        InterestClass::Except,
    ];
}

pub type Callback = Rc<dyn Fn(&Poller, Handle)>;

/// A callback tagged with the poll cycle it was registered in.
#[derive(Clone)]
struct Registration {
    cycle: u64,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    read: BTreeMap<Handle, Registration>,
    write: BTreeMap<Handle, Registration>,
    except: BTreeMap<Handle, Registration>,
    /// Incremented at the start of every `poll()`.
    cycle: u64,
}

impl Registry {
    fn map(&self, class: InterestClass) -> &BTreeMap<Handle, Registration> {
        match class {
            InterestClass::Read => &self.read,
            InterestClass::Write => &self.write,
            InterestClass::Except => &self.except,
        }
    }

    fn map_mut(&mut self, class: InterestClass) -> &mut BTreeMap<Handle, Registration> {
        match class {
            InterestClass::Read => &mut self.read,
            InterestClass::Write => &mut self.write,
            InterestClass::Except => &mut self.except,
        }
    }

    fn holds(&self, handle: Handle) -> bool {
        InterestClass::ALL
            .iter()
            .any(|class| self.map(*class).contains_key(&handle))
    }

    fn snapshot(&self) -> HandleSets {
        let mut sets = HandleSets::default();
        for class in InterestClass::ALL {
            sets.get_mut(class).extend(self.map(class).keys().copied());
        }
        sets
    }
}

struct Inner {
    registry: RefCell<Registry>,
    selector: RefCell<Box<dyn Selector>>,
    polling: Cell<bool>,
    buffers: BufferPool,
}

/// Central readiness poller. Cloning yields another handle to the same
/// poller; sockets and listeners keep one each.
#[derive(Clone)]
pub struct Poller {
    inner: Rc<Inner>,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.borrow();
        f.debug_struct("Poller")
            .field("read", &registry.read.len())
            .field("write", &registry.write.len())
            .field("except", &registry.except.len())
            .finish()
    }
}

impl Poller {
    /// A poller backed by the OS multiplexer.
    pub fn new() -> Result<Self> {
        Ok(Self::with_selector(MioSelector::new()?))
    }

    pub fn with_selector<S>(selector: S) -> Self
    where
        S: Selector + 'static,
    {
        Self {
            inner: Rc::new(Inner {
                registry: RefCell::new(Registry::default()),
                selector: RefCell::new(Box::new(selector)),
                polling: Cell::new(false),
                buffers: BufferPool::default(),
            }),
        }
    }

    /// Registers `callback` for `class` readiness of `handle`. An existing
    /// registration for the same pair is replaced.
    ///
    /// A registration made from inside a callback only receives readiness
    /// from the next `poll()`; the current cycle's ready sets were computed
    /// for whatever held the handle before.
    pub fn add_interest<F>(&self, class: InterestClass, handle: Handle, callback: F)
    where
        F: Fn(&Poller, Handle) + 'static,
    {
        let replaced = {
            let mut registry = self.inner.registry.borrow_mut();
            let registration = Registration {
                cycle: registry.cycle,
                callback: Rc::new(callback),
            };
            registry.map_mut(class).insert(handle, registration).is_some()
        };
        trace!(%handle, ?class, replaced, "interest added");
    }

    /// Removes the `class` registration of `handle`.
    ///
    /// Fails with [`SocketError::NotRegistered`] when there is none. Once
    /// the handle has no registration left in any class, the selector is
    /// told to forget it.
    pub fn remove_interest(&self, class: InterestClass, handle: Handle) -> Result<()> {
        let still_held = {
            let mut registry = self.inner.registry.borrow_mut();
            if registry.map_mut(class).remove(&handle).is_none() {
                return Err(SocketError::NotRegistered { class, handle });
            }
            registry.holds(handle)
        };
        trace!(%handle, ?class, "interest removed");

        if !still_held {
            self.inner.selector.borrow_mut().release(handle);
        }
        Ok(())
    }

    pub fn is_registered(&self, class: InterestClass, handle: Handle) -> bool {
        self.inner.registry.borrow().map(class).contains_key(&handle)
    }

    /// Handles currently registered for `class`.
    pub fn registered(&self, class: InterestClass) -> Vec<Handle> {
        self.inner
            .registry
            .borrow()
            .map(class)
            .keys()
            .copied()
            .collect()
    }

    /// Number of distinct handles across all three classes.
    pub fn handle_count(&self) -> usize {
        let registry = self.inner.registry.borrow();
        let mut handles: Vec<Handle> = InterestClass::ALL
            .iter()
            .flat_map(|class| registry.map(*class).keys().copied())
            .collect();
        handles.sort();
        handles.dedup();
        handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.borrow().snapshot().is_empty()
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.buffers
    }

    /// Waits at most `max_block` (`None` = indefinitely) for readiness and
    /// dispatches every ready (class, handle) pair once, Read first, then
    /// Write, then Except. Returns the number of callbacks invoked.
    ///
    /// With nothing registered this returns `Ok(0)` at once without touching
    /// the OS. A failing multiplexer call yields [`SocketError::PollFatal`].
    pub fn poll(&self, max_block: Option<Duration>) -> Result<usize> {
        if self.inner.polling.get() {
            return Err(SocketError::ReentrantPoll);
        }

        let (interest, cycle) = {
            let mut registry = self.inner.registry.borrow_mut();
            let interest = registry.snapshot();
            if interest.is_empty() {
                return Ok(0);
            }
            registry.cycle += 1;
            (interest, registry.cycle)
        };

        let _guard = PollingGuard::enter(&self.inner.polling);
        let mut ready = self
            .inner
            .selector
            .borrow_mut()
            .select(&interest, max_block)
            .map_err(SocketError::PollFatal)?;

        let mut dispatched = 0;
        for class in InterestClass::ALL {
            let handles = ready.get_mut(class);
            handles.sort();
            handles.dedup();
            for &handle in handles.iter() {
                // an earlier callback this cycle may have dropped the entry,
                // or handed the handle to a newer owner
                let callback = self
                    .inner
                    .registry
                    .borrow()
                    .map(class)
                    .get(&handle)
                    .filter(|registration| registration.cycle < cycle)
                    .map(|registration| registration.callback.clone());
                if let Some(callback) = callback {
                    trace!(%handle, ?class, "dispatching");
                    callback(self, handle);
                    dispatched += 1;
                }
            }
        }
        Ok(dispatched)
    }
}

struct PollingGuard<'a>(&'a Cell<bool>);

impl<'a> PollingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        PollingGuard(flag)
    }
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSelector;
    use std::io;

    fn recorder() -> (Rc<RefCell<Vec<(InterestClass, Handle)>>>, impl Fn(InterestClass) -> Callback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |class: InterestClass| -> Callback {
            let log = log_clone.clone();
            Rc::new(move |_: &Poller, h: Handle| log.borrow_mut().push((class, h)))
        };
        (log, make)
    }

    fn add(poller: &Poller, class: InterestClass, handle: Handle, cb: Callback) {
        poller.add_interest(class, handle, move |p, h| cb(p, h));
    }

    #[test]
    fn test_empty_poller_never_reaches_the_selector() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());

        assert_eq!(poller.poll(None).unwrap(), 0);
        assert_eq!(poller.poll(Some(Duration::from_secs(30))).unwrap(), 0);
        assert_eq!(selector.calls(), 0);
    }

    #[test]
    fn test_dispatch_order_is_read_write_except() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(7);

        for class in InterestClass::ALL {
            add(&poller, class, h, make(class));
        }
        selector.push_ready(HandleSets {
            read: vec![h],
            write: vec![h],
            except: vec![h],
        });

        assert_eq!(poller.poll(Some(Duration::ZERO)).unwrap(), 3);
        assert_eq!(
            *log.borrow(),
            vec![
                (InterestClass::Read, h),
                (InterestClass::Write, h),
                (InterestClass::Except, h)
            ]
        );
        assert_eq!(selector.calls(), 1);
        assert_eq!(selector.last_interest().unwrap().len(), 3);
    }

    #[test]
    fn test_each_ready_pair_fires_once() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(3);

        add(&poller, InterestClass::Read, h, make(InterestClass::Read));
        selector.push_ready(HandleSets {
            read: vec![h, h],
            ..Default::default()
        });

        assert_eq!(poller.poll(None).unwrap(), 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_re_adding_replaces_the_callback() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(4);

        add(&poller, InterestClass::Write, h, make(InterestClass::Read));
        add(&poller, InterestClass::Write, h, make(InterestClass::Write));
        assert_eq!(poller.registered(InterestClass::Write), vec![h]);

        selector.push_ready(HandleSets {
            write: vec![h],
            ..Default::default()
        });
        poller.poll(None).unwrap();
        assert_eq!(*log.borrow(), vec![(InterestClass::Write, h)]);
    }

    #[test]
    fn test_removing_an_absent_registration_is_an_error() {
        let poller = Poller::with_selector(FakeSelector::new());
        let h = Handle::new(9);

        let err = poller.remove_interest(InterestClass::Read, h).unwrap_err();
        assert!(matches!(
            err,
            SocketError::NotRegistered {
                class: InterestClass::Read,
                ..
            }
        ));

        poller.add_interest(InterestClass::Read, h, |_, _| {});
        poller.remove_interest(InterestClass::Read, h).unwrap();
        assert!(poller.remove_interest(InterestClass::Read, h).is_err());
    }

    #[test]
    fn test_selector_release_happens_when_last_class_goes() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let h = Handle::new(11);

        poller.add_interest(InterestClass::Write, h, |_, _| {});
        poller.add_interest(InterestClass::Except, h, |_, _| {});
        poller.remove_interest(InterestClass::Write, h).unwrap();
        assert!(selector.released().is_empty());
        poller.remove_interest(InterestClass::Except, h).unwrap();
        assert_eq!(selector.released(), vec![h]);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_callback_removed_earlier_in_the_cycle_is_skipped() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(5);

        poller.add_interest(InterestClass::Write, h, |p, h| {
            p.remove_interest(InterestClass::Write, h).unwrap();
            p.remove_interest(InterestClass::Except, h).unwrap();
        });
        add(&poller, InterestClass::Except, h, make(InterestClass::Except));
        selector.push_ready(HandleSets {
            write: vec![h],
            except: vec![h],
            ..Default::default()
        });

        assert_eq!(poller.poll(None).unwrap(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_handle_reused_mid_cycle_waits_for_the_next_poll() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(5);

        // the old owner gives the handle up during Write, a new owner takes
        // it over for Write and Except before the Except pass runs
        let successor = make(InterestClass::Except);
        poller.add_interest(InterestClass::Write, h, move |p, h| {
            p.remove_interest(InterestClass::Write, h).unwrap();
            p.remove_interest(InterestClass::Except, h).unwrap();
            p.add_interest(InterestClass::Write, h, |_, _| {});
            let successor = successor.clone();
            p.add_interest(InterestClass::Except, h, move |p, h| successor(p, h));
        });
        poller.add_interest(InterestClass::Except, h, |_, _| {});
        selector.push_ready(HandleSets {
            write: vec![h],
            except: vec![h],
            ..Default::default()
        });

        assert_eq!(poller.poll(None).unwrap(), 1);
        assert!(log.borrow().is_empty());
        assert!(poller.is_registered(InterestClass::Except, h));

        selector.push_ready(HandleSets {
            except: vec![h],
            ..Default::default()
        });
        assert_eq!(poller.poll(None).unwrap(), 1);
        assert_eq!(*log.borrow(), vec![(InterestClass::Except, h)]);
    }

    #[test]
    fn test_timeout_has_no_side_effects() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let (log, make) = recorder();
        let h = Handle::new(2);
        add(&poller, InterestClass::Read, h, make(InterestClass::Read));

        assert_eq!(poller.poll(Some(Duration::from_millis(1))).unwrap(), 0);
        assert!(log.borrow().is_empty());
        assert_eq!(selector.last_timeout(), Some(Some(Duration::from_millis(1))));
        assert!(poller.is_registered(InterestClass::Read, h));
    }

    #[test]
    fn test_selector_failure_is_fatal() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        poller.add_interest(InterestClass::Read, Handle::new(1), |_, _| {});
        selector.push_failure(io::Error::new(io::ErrorKind::Other, "bad descriptor"));

        assert!(matches!(poller.poll(None), Err(SocketError::PollFatal(_))));
        // the poller stays usable for inspection afterwards
        assert_eq!(poller.handle_count(), 1);
    }

    #[test]
    fn test_nested_poll_is_rejected() {
        let selector = FakeSelector::new();
        let poller = Poller::with_selector(selector.clone());
        let nested = Rc::new(RefCell::new(None));
        let nested_clone = nested.clone();
        let h = Handle::new(8);

        poller.add_interest(InterestClass::Read, h, move |p, _| {
            *nested_clone.borrow_mut() = Some(p.poll(None).is_err());
        });
        selector.push_ready(HandleSets {
            read: vec![h],
            ..Default::default()
        });

        poller.poll(None).unwrap();
        assert_eq!(*nested.borrow(), Some(true));
    }
}
