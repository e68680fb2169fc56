//! Counting semaphore and bounded single-producer/single-consumer ring used to
//! hand frames from a capture thread to a consumer thread without blocking the
//! producer's hot path on anything but a short mutex.
//!
//! ## Architecture
//!
//! ```text
//! producer thread                          consumer thread
//!      |                                          |
//!      v                                          v
//!  ring.enqueue(item) -----> [slot 0][slot 1] <---- ring.dequeue()
//!      |                                          ^
//!      +---------------> semaphore.post()  semaphore.wait()
//! ```
//!
//! `FrameRing` tracks exactly as many occupied cells as the semaphore has been
//! posted for: an enqueue that fails (ring full) must not post, or the
//! consumer's wait/dequeue pairing desynchronizes. See [`FrameRing::enqueue`].

use parking_lot::{Condvar, Mutex};

/// A classic counting semaphore built on a mutex-guarded counter and a condvar.
///
/// Used as the "frames available" signal between a producer and a consumer
/// thread. `post` never blocks; `wait` blocks until the count is positive,
/// then decrements it.
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Increment the count and wake one waiter, if any.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    /// Block until the count is positive, then consume one unit.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Current count, for tests and diagnostics. Racy by nature; callers must
    /// not rely on it for synchronization.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

/// Bounded single-producer/single-consumer ring of capacity 2.
///
/// `T` is typically a small handle (a slot index, a decoded frame) rather than
/// the frame bytes themselves — the ring moves ownership of handles, not
/// pixels. Capacity is fixed at construction and the ring never grows.
pub struct FrameRing<T> {
    capacity: usize,
    cells: Box<[Mutex<Option<T>>]>,
    write_pos: Mutex<usize>,
    read_pos: Mutex<usize>,
    size: Mutex<usize>,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FrameRing capacity must be nonzero");
        Self {
            capacity,
            cells: (0..capacity).map(|_| Mutex::new(None)).collect(),
            write_pos: Mutex::new(0),
            read_pos: Mutex::new(0),
            size: Mutex::new(0),
        }
    }

    /// Attempt to enqueue `item`. Returns `Err(item)` if the ring is full —
    /// callers MUST NOT post a paired semaphore when this fails, since the
    /// semaphore's count is defined as tracking successful enqueues exactly.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut size = self.size.lock();
        if *size == self.capacity {
            return Err(item);
        }
        let mut write_pos = self.write_pos.lock();
        *self.cells[*write_pos].lock() = Some(item);
        *write_pos = (*write_pos + 1) % self.capacity;
        *size += 1;
        Ok(())
    }

    /// Attempt to dequeue one item. Returns `None` on a spurious wake (the
    /// ring was already empty) — callers must treat this as "log and
    /// continue", not a fatal condition.
    pub fn dequeue(&self) -> Option<T> {
        let mut size = self.size.lock();
        if *size == 0 {
            return None;
        }
        let mut read_pos = self.read_pos.lock();
        let item = self.cells[*read_pos].lock().take();
        *read_pos = (*read_pos + 1) % self.capacity;
        *size -= 1;
        item
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        *self.size.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_capacity_two_overrun_is_reported() {
        let ring: FrameRing<u32> = FrameRing::new(2);
        assert!(ring.enqueue(1).is_ok());
        assert!(ring.enqueue(2).is_ok());
        assert!(ring.enqueue(3).is_err());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn ring_fifo_order() {
        let ring: FrameRing<u32> = FrameRing::new(2);
        ring.enqueue(1).unwrap();
        ring.enqueue(2).unwrap();
        assert_eq!(ring.dequeue(), Some(1));
        assert_eq!(ring.dequeue(), Some(2));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn ring_reuse_after_drain() {
        let ring: FrameRing<u32> = FrameRing::new(2);
        ring.enqueue(1).unwrap();
        assert_eq!(ring.dequeue(), Some(1));
        ring.enqueue(2).unwrap();
        ring.enqueue(3).unwrap();
        assert!(ring.enqueue(4).is_err());
    }

    #[test]
    fn semaphore_post_then_wait_does_not_block() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.wait();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn semaphore_cross_thread_handoff() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let sem = Arc::new(Semaphore::new(0));
        let producer = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.post();
        });
        sem.wait();
        handle.join().unwrap();
        assert_eq!(sem.count(), 0);
    }
}
