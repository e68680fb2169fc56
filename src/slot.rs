//! Exactly two mutex-guarded frame buffers that alternate ownership between
//! the capture thread and the stream thread.
//!
//! A slot's mutex being unlocked means "not currently being written, and its
//! contents are a complete frame." The capture thread writes a slot, unlocks
//! it, then publishes its index through the ring; the stream thread re-locks
//! the slot only for the duration of reading it back out.

use parking_lot::Mutex;

pub struct CaptureSlot {
    buffer: Mutex<Vec<u8>>,
}

impl CaptureSlot {
    fn new(frame_bytes: usize) -> Self {
        Self { buffer: Mutex::new(vec![0u8; frame_bytes]) }
    }
}

/// The two statically-sized slots allocated once at streaming init and held
/// for the whole session.
pub struct CaptureSlots {
    slots: [CaptureSlot; 2],
}

impl CaptureSlots {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            slots: [CaptureSlot::new(frame_bytes), CaptureSlot::new(frame_bytes)],
        }
    }

    /// Try to acquire a free slot, biased to slot 0 first, spinning until
    /// one succeeds. Both branches use the identical "try_lock, take it on
    /// success" shape — the reference's second branch inverts the
    /// `pthread_mutex_trylock` return convention; there is no second branch
    /// here to get backwards.
    pub fn acquire_free(&self) -> (usize, parking_lot::MutexGuard<'_, Vec<u8>>) {
        loop {
            for (index, slot) in self.slots.iter().enumerate() {
                if let Some(guard) = slot.buffer.try_lock() {
                    return (index, guard);
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Re-lock a slot by index for the stream thread's color-conversion read.
    pub fn lock(&self, index: usize) -> parking_lot::MutexGuard<'_, Vec<u8>> {
        self.slots[index].buffer.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_free_picks_distinct_slots_when_both_free() {
        let slots = CaptureSlots::new(16);
        let (idx_a, guard_a) = slots.acquire_free();
        assert_eq!(idx_a, 0);
        drop(guard_a);
        let (idx_b, _guard_b) = slots.acquire_free();
        assert_eq!(idx_b, 0, "slot 0 is free again and tried first");
    }

    #[test]
    fn held_slot_is_skipped() {
        let slots = CaptureSlots::new(16);
        let (idx_a, _guard_a) = slots.acquire_free();
        assert_eq!(idx_a, 0);
        let (idx_b, _guard_b) = slots.acquire_free();
        assert_eq!(idx_b, 1, "slot 0 is held, so slot 1 is selected");
    }

    #[test]
    fn lock_reads_back_written_contents() {
        let slots = CaptureSlots::new(4);
        {
            let (_idx, mut guard) = slots.acquire_free();
            guard.copy_from_slice(&[1, 2, 3, 4]);
        }
        let guard = slots.lock(0);
        assert_eq!(&*guard, &[1, 2, 3, 4]);
    }
}
