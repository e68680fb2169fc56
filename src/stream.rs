//! Stream thread: waits for a published slot, converts and encodes it, and
//! writes the resulting SRTP packets to the network.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use edss_ring::{FrameRing, Semaphore};
use edss_rtp::MuxerContext;

use crate::slot::CaptureSlots;
use crate::status::EdssStatus;

pub fn spawn_stream_thread(
    slots: Arc<CaptureSlots>,
    ring: Arc<FrameRing<usize>>,
    semaphore: Arc<Semaphore>,
    encoding_finished: Arc<AtomicBool>,
    muxer: Arc<MuxerContext>,
) -> io::Result<JoinHandle<EdssStatus>> {
    thread::Builder::new()
        .name("edss-stream".to_string())
        .spawn(move || stream_loop(slots, ring, semaphore, encoding_finished, muxer))
}

fn stream_loop(
    slots: Arc<CaptureSlots>,
    ring: Arc<FrameRing<usize>>,
    semaphore: Arc<Semaphore>,
    encoding_finished: Arc<AtomicBool>,
    muxer: Arc<MuxerContext>,
) -> EdssStatus {
    let result = loop {
        // 1. The only deep wait on this thread.
        semaphore.wait();

        // 2. Cancellation is checked right after waking.
        if encoding_finished.load(Ordering::Relaxed) {
            break EdssStatus::Ok;
        }

        // 3. A spurious post (ring already empty) is logged and the loop
        // continues rather than treating it as fatal.
        let index = match ring.dequeue() {
            Some(index) => index,
            None => {
                tracing::debug!("spurious semaphore post; ring empty, continuing");
                continue;
            }
        };

        // 4. Lock the slot only for the duration of the read; the pipeline
        // handles the color-space conversion and encoding internally once
        // the bytes are pushed (see edss-rtp's module docs).
        let push_result = {
            let guard = slots.lock(index);
            muxer.push_frame(&guard)
        };

        // 5-7. Submit failure is fatal for the session; the pipeline drains
        // and timestamps packets internally as each buffer is pushed.
        if let Err(e) = push_result {
            tracing::error!("encode failed, tearing down stream: {e}");
            let _ = muxer.close();
            break EdssStatus::EncodeFailure;
        }
    };

    let _ = muxer.close();
    result
}
