//! Capture thread: periodically pulls a frame from the CAL plugin into a
//! free slot and publishes it through the ring.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use edss_cal::CalPlugin;
use edss_ring::{FrameRing, Semaphore};
use parking_lot::Mutex;

use crate::slot::CaptureSlots;
use crate::status::EdssStatus;

/// Shared, thread-safe handle to the CAL plugin. Wrapped in a mutex so the
/// facade's caller thread can call `write_mouse_event` concurrently with the
/// capture thread's `read_frame`/`frame` calls without the two racing on the
/// plugin's internal state, even though the reference plugin itself only
/// ever touches one file descriptor per call.
pub type PluginHandle = Arc<Mutex<Box<dyn CalPlugin>>>;

/// Pacing for the capture loop: approximately 60 Hz, the sole mechanism
/// bounding how fast frames are produced.
const CAPTURE_PERIOD: Duration = Duration::from_micros(16_600);

pub fn spawn_capture_thread(
    plugin: PluginHandle,
    slots: Arc<CaptureSlots>,
    ring: Arc<FrameRing<usize>>,
    semaphore: Arc<Semaphore>,
    encoding_finished: Arc<AtomicBool>,
) -> io::Result<JoinHandle<EdssStatus>> {
    thread::Builder::new()
        .name("edss-capture".to_string())
        .spawn(move || capture_loop(plugin, slots, ring, semaphore, encoding_finished))
}

fn capture_loop(
    plugin: PluginHandle,
    slots: Arc<CaptureSlots>,
    ring: Arc<FrameRing<usize>>,
    semaphore: Arc<Semaphore>,
    encoding_finished: Arc<AtomicBool>,
) -> EdssStatus {
    loop {
        // 1. Acquire a free slot, spinning over the two mutexes, biased to
        // slot 0.
        let (index, mut guard) = slots.acquire_free();

        // 2. Exit check happens with the slot held so the consumer still
        // gets exactly one wakeup on the way out.
        if encoding_finished.load(Ordering::Relaxed) {
            drop(guard);
            semaphore.post();
            tracing::debug!("capture thread exiting");
            return EdssStatus::Ok;
        }

        // 3-4. Read and copy the frame while the plugin is locked, so the
        // bytes copied are the ones `read_frame` just validated as current.
        let mut plugin_guard = plugin.lock();
        match plugin_guard.read_frame() {
            Ok(()) => {
                let frame = plugin_guard.frame();
                let n = frame.len().min(guard.len());
                guard[..n].copy_from_slice(&frame[..n]);
                drop(plugin_guard);
                // 5. Unlock the slot by dropping the guard before enqueueing.
                drop(guard);

                // 6-7. Enqueue, and only post the semaphore on success; an
                // enqueue failure must never post.
                match ring.enqueue(index) {
                    Ok(()) => semaphore.post(),
                    Err(_) => tracing::warn!("frame ring full; dropping captured frame"),
                }
            }
            Err(e) => {
                drop(plugin_guard);
                drop(guard);
                tracing::debug!("CAL read_frame failed, skipping this frame: {e}");
            }
        }

        // 8. Pace the loop.
        thread::sleep(CAPTURE_PERIOD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edss_cal::test_plugin::TestPlugin;
    use std::collections::HashMap;
    use std::time::Instant;

    #[test]
    fn exit_flag_posts_semaphore_without_enqueue() {
        let mut plugin: Box<dyn CalPlugin> = Box::new(TestPlugin::new());
        let cfg = plugin.init(&HashMap::new()).unwrap();
        let plugin = Arc::new(Mutex::new(plugin));
        let slots = Arc::new(CaptureSlots::new(cfg.frame_bytes()));
        let ring = Arc::new(FrameRing::new(2));
        let semaphore = Arc::new(Semaphore::new(0));
        let encoding_finished = Arc::new(AtomicBool::new(true));

        let status = capture_loop(plugin, slots, Arc::clone(&ring), Arc::clone(&semaphore), encoding_finished);

        assert_eq!(status, EdssStatus::Ok);
        assert_eq!(ring.len(), 0);
        // The one post from the exit path should already be consumable.
        let start = Instant::now();
        semaphore.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
