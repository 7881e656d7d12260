use std::{cell::Cell, rc::Rc, time::Duration};

use tracing::{debug, error};

use crate::{error::Result, poll::Poller};

pub const DEFAULT_BLOCK_TIME_MS: u64 = 100;

/// Repeatedly polls one [`Poller`] on the current thread.
///
/// [`run`](Self::run) returns when a [`StopHandle`] is triggered, when the
/// poller has nothing left to wait on, or with the error of a failed poll.
pub struct EventLoop {
    poller: Poller,
    block_time: Option<Duration>,
    running: Rc<Cell<bool>>,
}

/// Stops an [`EventLoop`] after its current iteration. Handy inside socket
/// handlers, which run on the loop's thread.
#[derive(Clone)]
pub struct StopHandle {
    running: Rc<Cell<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.set(false);
    }
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Ok(Self::with_poller(Poller::new()?))
    }

    pub fn with_poller(poller: Poller) -> Self {
        Self {
            poller,
            block_time: Some(Duration::from_millis(DEFAULT_BLOCK_TIME_MS)),
            running: Rc::new(Cell::new(false)),
        }
    }

    /// Upper bound for a single wait. `None` blocks until something is ready.
    pub fn with_block_time(mut self, block_time: Option<Duration>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Rc::clone(&self.running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// One poll pass; returns the number of callbacks dispatched.
    pub fn run_once(&self) -> Result<usize> {
        self.poller.poll(self.block_time)
    }

    pub fn run(&self) -> Result<()> {
        self.running.set(true);
        debug!(block_time = ?self.block_time, "event loop started");

        while self.running.get() {
            if self.poller.is_empty() {
                debug!("nothing left to poll");
                break;
            }
            if let Err(e) = self.poller.poll(self.block_time) {
                error!(error = %e, "poll failed, stopping event loop");
                self.running.set(false);
                return Err(e);
            }
        }

        self.running.set(false);
        debug!("event loop stopped");
        Ok(())
    }
}
