//! Pool of fixed-size scratch buffers
//!
//! Sector I/O borrows buffers from a [`BufferPool`] instead of allocating on
//! every call. A borrowed buffer is a [`PooledBuffer`]; dropping it hands the
//! allocation back to the pool on every exit path, including `?` returns.
//!
//! Buffers requested larger than the pool's slot size are allocated on the
//! spot and freed normally when dropped.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffer Pool Statistics
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolStats {
    /// Requests served from a pooled slot
    pub hits: u64,
    /// Requests that had to allocate
    pub misses: u64,
    /// Slots currently idle in the pool
    pub pooled: usize,
    /// Maximum idle slots retained
    pub capacity: usize,
    /// Size of each slot in bytes
    pub buffer_size: usize,
}

impl BufferPoolStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Thread-safe pool of equally sized byte buffers
pub struct BufferPool {
    buffer_size: usize,
    slots: ArrayQueue<Vec<u8>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    /// Create a pool retaining at most `capacity` idle buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize, capacity: usize) -> Arc<Self> {
        Arc::new(BufferPool {
            buffer_size,
            slots: ArrayQueue::new(capacity.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Borrow a zeroed buffer of `size` bytes
    pub fn take(self: &Arc<Self>, size: usize) -> PooledBuffer {
        let data = if size <= self.buffer_size {
            match self.slots.pop() {
                Some(mut slot) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    slot.fill(0);
                    slot
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    vec![0u8; self.buffer_size]
                }
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            vec![0u8; size]
        };

        PooledBuffer {
            pool: Arc::clone(self),
            data: Some(data),
            len: size,
        }
    }

    fn give_back(&self, data: Vec<u8>) {
        if data.len() == self.buffer_size {
            // A full pool just drops the extra buffer
            let _ = self.slots.push(data);
        }
    }

    /// Get buffer pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pooled: self.slots.len(),
            capacity: self.slots.capacity(),
            buffer_size: self.buffer_size,
        }
    }
}

/// Buffer on loan from a [`BufferPool`]
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    data: Option<Vec<u8>>,
    len: usize,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..self.len],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            Some(data) => &mut data[..self.len],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.give_back(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_return() {
        let pool = BufferPool::new(64, 4);

        {
            let mut buf = pool.take(64);
            assert_eq!(buf.len(), 64);
            buf[0] = 0xAA;
        }
        assert_eq!(pool.stats().pooled, 1);

        // Reused slot comes back zeroed
        let buf = pool.take(64);
        assert_eq!(buf[0], 0);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.pooled, 0);
    }

    #[test]
    fn test_short_request_uses_slot() {
        let pool = BufferPool::new(64, 4);
        drop(pool.take(64));

        let buf = pool.take(10);
        assert_eq!(buf.len(), 10);
        assert_eq!(pool.stats().hits, 1);
        drop(buf);
        assert_eq!(pool.stats().pooled, 1);
    }

    #[test]
    fn test_oversized_request_not_pooled() {
        let pool = BufferPool::new(64, 4);

        let buf = pool.take(1000);
        assert_eq!(buf.len(), 1000);
        drop(buf);

        assert_eq!(pool.stats().pooled, 0);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_pool_capacity_bound() {
        let pool = BufferPool::new(16, 2);
        let buffers: Vec<_> = (0..5).map(|_| pool.take(16)).collect();
        drop(buffers);
        assert_eq!(pool.stats().pooled, 2);
    }

    #[test]
    fn test_returned_on_error_path() {
        fn fails(pool: &Arc<BufferPool>) -> Result<(), ()> {
            let _buf = pool.take(8);
            Err(())
        }

        let pool = BufferPool::new(8, 2);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.stats().pooled, 1);
    }

    #[test]
    fn test_concurrent_borrowers() {
        let pool = BufferPool::new(128, 8);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.take(128);
                        buf[0] = i as u8;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 800);
        assert!(stats.pooled <= 8);
        assert!(stats.hit_rate() > 0.0);
    }
}
