//! Mutex-guarded FIFO queue and the send-buffer freelist built on it.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A minimal multi-producer FIFO.
///
/// `put` and `get` hold the lock only for the queue operation itself.
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an element at the tail.
    pub fn put(&self, element: T) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(element);
    }

    /// Take the head element, if any.
    pub fn get(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Rotating pool of send buffers for one connection.
///
/// Frames are assembled into pooled buffers and returned after the write
/// completes, so steady-state traffic does not allocate.
pub struct BufferPool {
    free: Queue<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            free: Queue::new(),
            buffer_size,
        }
    }

    /// Take a cleared buffer from the freelist, or allocate one.
    pub fn take(&self) -> Vec<u8> {
        self.free
            .get()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Return a buffer to the freelist.
    pub fn put_back(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.free.put(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = Queue::new();
        queue.put(1);
        queue.put(2);
        queue.put(3);

        assert_eq!(queue.get(), Some(1));
        assert_eq!(queue.get(), Some(2));
        assert_eq!(queue.get(), Some(3));
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn test_get_on_empty() {
        let queue: Queue<u8> = Queue::new();
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn test_pool_recycles_allocations() {
        let pool = BufferPool::new(64);

        let mut buf = pool.take();
        buf.extend_from_slice(&[1, 2, 3]);
        let capacity = buf.capacity();
        pool.put_back(buf);

        let buf = pool.take();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_queue_is_shareable_across_threads() {
        use std::sync::Arc;

        let queue = Arc::new(Queue::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.put(i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = Vec::new();
        while let Some(v) = queue.get() {
            drained.push(v);
        }
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }
}
