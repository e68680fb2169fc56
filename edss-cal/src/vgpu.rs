//! Reference vGPU capture backend.
//!
//! Maps a fixed-size region of `/dev/nvidia-vgpu<N>` at the "console offset"
//! as a read-only view of the guest's BGRA framebuffer, and creates a
//! virtual input device for mouse event injection. The surface is
//! kernel-updated, so `read_frame` is a no-op — the mapped bytes are always
//! current.

use crate::{CalError, CalPlugin, CaptureConfig, MouseButton, MouseEvent, PixelFormat};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, AbsoluteAxisCode, AttributeSet, EventType, InputEvent, KeyCode, UinputAbsSetup};
use memmap2::{Mmap, MmapOptions};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::sync::Mutex;

/// `VirtualDevice::emit` takes `&mut self`, but `CalPlugin::write_mouse_event` takes `&self`
/// (the facade's caller thread may invoke it concurrently with the capture thread's
/// `read_frame`/`frame` calls on the same plugin). A `Mutex` gives each call exclusive, safe
/// access instead of relying on the single-fd-write argument the reference plugin makes for
/// its own re-entrancy claim.
type InputDevice = Mutex<VirtualDevice>;

const IMGBUF_WIDTH: u16 = 1920;
const IMGBUF_HEIGHT: u16 = 1080;
/// TODO(vgpu): framerate should come from vGPU metadata; hardcoded to match
/// the reference until that metadata is exposed.
const IMGBUF_FRAMERATE: u16 = 60;
const VGPU_MMAP_CONSOLE_OFFSET: u64 = 0x10000000000;

pub struct VgpuPlugin {
    mmap: Option<Mmap>,
    input_device: Option<InputDevice>,
}

impl VgpuPlugin {
    pub fn new() -> Self {
        Self { mmap: None, input_device: None }
    }

    fn frame_len() -> usize {
        IMGBUF_WIDTH as usize * IMGBUF_HEIGHT as usize * PixelFormat::Bgra.bytes_per_pixel()
    }

    fn build_input_device() -> Result<VirtualDevice, CalError> {
        let abs_x = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_X,
            AbsInfo::new(0, 0, IMGBUF_WIDTH as i32 - 1, 0, 0, 1),
        );
        let abs_y = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_Y,
            AbsInfo::new(0, 0, IMGBUF_HEIGHT as i32 - 1, 0, 0, 1),
        );
        let mut keys = AttributeSet::<KeyCode>::new();
        keys.insert(KeyCode::BTN_LEFT);
        keys.insert(KeyCode::BTN_RIGHT);
        keys.insert(KeyCode::BTN_MIDDLE);

        VirtualDeviceBuilder::new()
            .map_err(|e| CalError::LibraryFailure(e.to_string()))?
            .name("edss-vgpu-input")
            .with_absolute_axis(&abs_x)
            .map_err(|e| CalError::LibraryFailure(e.to_string()))?
            .with_absolute_axis(&abs_y)
            .map_err(|e| CalError::LibraryFailure(e.to_string()))?
            .with_keys(&keys)
            .map_err(|e| CalError::LibraryFailure(e.to_string()))?
            .build()
            .map_err(|e| CalError::LibraryFailure(e.to_string()))
    }
}

impl Default for VgpuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CalPlugin for VgpuPlugin {
    fn options(&self) -> HashMap<String, String> {
        let mut opts = HashMap::new();
        opts.insert("vgpuId".to_string(), String::new());
        opts
    }

    fn init(&mut self, options: &HashMap<String, String>) -> Result<CaptureConfig, CalError> {
        let vgpu_id_str = options
            .get("vgpuId")
            .ok_or_else(|| CalError::InvalidOptions("missing vgpuId".to_string()))?;
        let vgpu_id: u32 = vgpu_id_str
            .parse()
            .map_err(|_| CalError::InvalidOptions(format!("vgpuId not a decimal integer: {vgpu_id_str}")))?;

        let path = format!("/dev/nvidia-vgpu{vgpu_id}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|_| CalError::FileNotFound(path.clone()))?;

        let mmap = unsafe {
            MmapOptions::new()
                .offset(VGPU_MMAP_CONSOLE_OFFSET)
                .len(Self::frame_len())
                .map(&file)
        }
        .map_err(|e| CalError::LibraryFailure(e.to_string()))?;

        let input_device = Self::build_input_device()?;

        self.mmap = Some(mmap);
        self.input_device = Some(Mutex::new(input_device));

        Ok(CaptureConfig {
            pix_fmt: PixelFormat::Bgra,
            width: IMGBUF_WIDTH,
            height: IMGBUF_HEIGHT,
            framerate: IMGBUF_FRAMERATE,
        })
    }

    fn read_frame(&mut self) -> Result<(), CalError> {
        // The console surface is kernel-updated; the existing mapping
        // already reflects the latest frame.
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    fn write_mouse_event(&self, event: MouseEvent) -> Result<(), CalError> {
        let device = self
            .input_device
            .as_ref()
            .ok_or_else(|| CalError::LibraryFailure("input device not initialized".to_string()))?;
        let mut dev = device
            .lock()
            .map_err(|_| CalError::LibraryFailure("input device mutex poisoned".to_string()))?;
        let events: Vec<InputEvent> = match event {
            MouseEvent::Move { x, y } => vec![
                InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, x as i32),
                InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, y as i32),
                InputEvent::new(EventType::SYNCHRONIZATION.0, 0, 0),
            ],
            MouseEvent::Click { button, pressed } => {
                let code = match button {
                    MouseButton::Left => KeyCode::BTN_LEFT.0,
                    MouseButton::Right => KeyCode::BTN_RIGHT.0,
                    MouseButton::Middle => KeyCode::BTN_MIDDLE.0,
                };
                vec![
                    InputEvent::new(EventType::KEY.0, code, pressed as i32),
                    InputEvent::new(EventType::SYNCHRONIZATION.0, 0, 0),
                ]
            }
        };
        dev.emit(&events)
            .map_err(|e| CalError::LibraryFailure(e.to_string()))
    }

    fn shutdown(&mut self) -> Result<(), CalError> {
        self.mmap = None;
        self.input_device = None;
        Ok(())
    }
}
