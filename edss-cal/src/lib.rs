//! Capture Abstraction Layer (CAL): the plugin contract a capture backend
//! implements, plus a small in-process registry that resolves a plugin
//! identifier to a concrete implementation.
//!
//! The reference this crate is adapted from loads a plugin as a shared
//! object exporting a `calPlugin` record of five function pointers. A
//! dynamically loaded ABI like that is a deployment choice, not something
//! this contract requires — here it is a `CalPlugin` trait object, and
//! `load_cal_plugin` stands in for the `dlopen`/`dlsym` step by resolving a
//! plugin name against a small built-in registry.

use std::collections::HashMap;
use thiserror::Error;

pub mod test_plugin;
#[cfg(target_os = "linux")]
pub mod vgpu;

/// Pixel formats a capture backend may report. The reference vGPU backend
/// always reports `Bgra`; the enum exists so other backends (X11, Wayland,
/// PipeWire) can report their native format without forcing a conversion in
/// the plugin itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra => 4,
        }
    }
}

/// Static description of the capture surface, filled in by `CalPlugin::init`.
/// The frame bytes themselves are fetched separately via `CalPlugin::frame`,
/// since Rust has no safe equivalent of a raw pointer that outlives the
/// struct holding it — the plugin itself remains the owner of the frame
/// memory for as long as it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub pix_fmt: PixelFormat,
    pub width: u16,
    pub height: u16,
    pub framerate: u16,
}

impl CaptureConfig {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pix_fmt.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Absolute pixel coordinates, in `[0, width) x [0, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    Click { button: MouseButton, pressed: bool },
    Move { x: u16, y: u16 },
}

#[derive(Debug, Error)]
pub enum CalError {
    #[error("CAL plugin identifier not recognized: {0}")]
    UnknownPlugin(String),
    #[error("CAL device file not found: {0}")]
    FileNotFound(String),
    #[error("CAL library failure: {0}")]
    LibraryFailure(String),
    #[error("invalid CAL options: {0}")]
    InvalidOptions(String),
}

/// The five-operation capture backend contract.
///
/// `init` must leave the plugin ready to serve `frame()` and `read_frame()`
/// until `shutdown()` is called; `read_frame()` is a no-op for
/// kernel-updated surfaces like a memory-mapped framebuffer, and exists only
/// for backends that need an explicit pull.
pub trait CalPlugin: Send {
    /// Recognized option keys seeded with empty defaults.
    fn options(&self) -> HashMap<String, String>;

    fn init(&mut self, options: &HashMap<String, String>) -> Result<CaptureConfig, CalError>;

    fn read_frame(&mut self) -> Result<(), CalError>;

    /// Current frame bytes. Stable length and stable identity across calls;
    /// the contents may change between `read_frame` calls.
    fn frame(&self) -> &[u8];

    fn write_mouse_event(&self, event: MouseEvent) -> Result<(), CalError>;

    fn shutdown(&mut self) -> Result<(), CalError>;
}

/// Resolve a plugin identifier to a concrete backend. Unrecognized
/// identifiers are the moral equivalent of a `dlopen` failure in the
/// reference, and are reported as `CalError::UnknownPlugin` so the facade
/// can surface `EdssStatus::InvalidCal`.
pub fn load_cal_plugin(identifier: &str) -> Result<Box<dyn CalPlugin>, CalError> {
    let stem = identifier
        .rsplit('/')
        .next()
        .unwrap_or(identifier)
        .trim_end_matches(".so");
    match stem {
        #[cfg(target_os = "linux")]
        "vgpu" | "libvgpu_cal" => Ok(Box::new(vgpu::VgpuPlugin::new())),
        "test" => Ok(Box::new(test_plugin::TestPlugin::new())),
        other => Err(CalError::UnknownPlugin(other.to_string())),
    }
}
