//! A deterministic, hardware-free CAL backend used by integration tests.
//!
//! Synthesizes a small solid-color BGRA surface instead of mapping a real
//! device, and records mouse events into an in-memory log instead of
//! creating a real `/dev/uinput` device, so the facade's lifecycle and
//! mouse event fan-out can be exercised without root privileges or real
//! hardware.

use crate::{CalError, CalPlugin, CaptureConfig, MouseButton, MouseEvent, PixelFormat};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const WIDTH: u16 = 64;
const HEIGHT: u16 = 64;
const FRAMERATE: u16 = 60;

/// One entry in the deterministic plugin's input event log, mirroring the
/// uinput event/sync framing `VgpuPlugin` emits for a mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedEvent {
    AbsX(u16),
    AbsY(u16),
    Key { button: MouseButton, pressed: bool },
    SynReport,
}

pub struct TestPlugin {
    frame: Vec<u8>,
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl TestPlugin {
    pub fn new() -> Self {
        Self {
            frame: vec![0x40u8; WIDTH as usize * HEIGHT as usize * 4],
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of recorded input events, in submission order.
    pub fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for TestPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CalPlugin for TestPlugin {
    fn options(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn init(&mut self, _options: &HashMap<String, String>) -> Result<CaptureConfig, CalError> {
        Ok(CaptureConfig {
            pix_fmt: PixelFormat::Bgra,
            width: WIDTH,
            height: HEIGHT,
            framerate: FRAMERATE,
        })
    }

    fn read_frame(&mut self) -> Result<(), CalError> {
        // Surface is process-owned and already current; nothing to pull.
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        &self.frame
    }

    fn write_mouse_event(&self, event: MouseEvent) -> Result<(), CalError> {
        let mut log = self.events.lock().unwrap();
        match event {
            MouseEvent::Move { x, y } => {
                log.push(RecordedEvent::AbsX(x));
                log.push(RecordedEvent::AbsY(y));
                log.push(RecordedEvent::SynReport);
            }
            MouseEvent::Click { button, pressed } => {
                log.push(RecordedEvent::Key { button, pressed });
                log.push(RecordedEvent::SynReport);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), CalError> {
        Ok(())
    }
}
