use std::{cell::RefCell, collections::VecDeque, rc::Rc};

pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// A pool of reusable read buffers shared by every socket on one poller.
///
/// Buffers are created lazily at the requested size and handed back on drop
/// of the [`PooledBuffer`] guard. At most `capacity` idle buffers are kept.
#[derive(Clone)]
pub struct BufferPool {
    idle: Rc<RefCell<VecDeque<Vec<u8>>>>,
    capacity: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Rc::new(RefCell::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Hands out a zeroed buffer of exactly `size` bytes.
    pub fn acquire(&self, size: usize) -> PooledBuffer {
        let mut buffer = self.idle.borrow_mut().pop_front().unwrap_or_default();
        buffer.clear();
        buffer.resize(size, 0);

        PooledBuffer {
            buffer,
            idle: Rc::clone(&self.idle),
            capacity: self.capacity,
        }
    }

    /// Number of idle buffers waiting to be reused.
    pub fn available(&self) -> usize {
        self.idle.borrow().len()
    }
}

/// Guard returning its buffer to the pool when dropped.
pub struct PooledBuffer {
    buffer: Vec<u8>,
    idle: Rc<RefCell<VecDeque<Vec<u8>>>>,
    capacity: usize,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let mut idle = self.idle.borrow_mut();
        // Only return to pool if under capacity
        if idle.len() < self.capacity {
            idle.push_back(buffer);
        }
    }
}
