//! Bounded pool of reusable byte buffers.
//!
//! Producers take a buffer, fill it, and submit it to the writer; the writer
//! gives it back once the bytes are encoded. Buffers beyond the capacity are
//! dropped instead of pooled.

use parking_lot::Mutex;

#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// An empty buffer, reused when one is available.
    pub fn take(&self) -> Vec<u8> {
        self.free.lock().pop().unwrap_or_default()
    }

    /// A buffer holding a copy of `bytes`.
    pub fn take_copy(&self, bytes: &[u8]) -> Vec<u8> {
        let mut buffer = self.take();
        buffer.extend_from_slice(bytes);
        buffer
    }

    pub fn give(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused_cleared() {
        let pool = BufferPool::new(2);
        let mut buffer = pool.take();
        buffer.extend_from_slice(b"telemetry");
        let ptr = buffer.as_ptr();
        pool.give(buffer);

        let reused = pool.take();
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
    }

    #[test]
    fn test_capacity_bounds_pool() {
        let pool = BufferPool::new(1);
        pool.give(vec![1]);
        pool.give(vec![2]);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.take_copy(b"ab"), b"ab".to_vec());
        assert_eq!(pool.available(), 0);
    }
}
