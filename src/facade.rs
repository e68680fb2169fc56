//! `ServerFacade`: the state machine and safe Rust API backing the C-callable
//! surface. The reference keeps session state in file-scope statics; this
//! crate keeps it in one struct the caller owns, with no process-wide
//! mutable state anywhere in the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use edss_cal::{CalPlugin, CaptureConfig, MouseEvent};
use edss_ring::{FrameRing, Semaphore};
use edss_rtp::{EncoderConfig, MuxerContext};
use parking_lot::Mutex;

use crate::capture::{spawn_capture_thread, PluginHandle};
use crate::config::ServerConfig;
use crate::slot::CaptureSlots;
use crate::status::{EdssError, EdssStatus};
use crate::stream::spawn_stream_thread;

/// Accepted but not forwarded anywhere — the keyboard event path is declared
/// in the ABI but unwired in the reference.
#[derive(Debug, Clone, Copy)]
pub struct KeyboardEvent {
    pub key_code: u32,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    Uninit,
    CalOpened,
    ServerReady,
    Streaming,
    Closed,
}

/// Everything allocated for one streaming session. `InitStreaming` moves the
/// muxer into the stream thread; `CloseStreaming` joins both threads back in
/// and releases the rest.
struct Session {
    plugin: PluginHandle,
    capture_config: CaptureConfig,
    slots: Arc<CaptureSlots>,
    ring: Arc<FrameRing<usize>>,
    semaphore: Arc<Semaphore>,
    encoding_finished: Arc<AtomicBool>,
    muxer: Option<Arc<MuxerContext>>,
    capture_handle: Option<JoinHandle<EdssStatus>>,
    stream_handle: Option<JoinHandle<EdssStatus>>,
}

pub struct ServerFacade {
    state: FacadeState,
    session: Option<Session>,
}

impl Default for ServerFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerFacade {
    pub fn new() -> Self {
        Self { state: FacadeState::Uninit, session: None }
    }

    pub fn state(&self) -> FacadeState {
        self.state
    }

    fn require(&self, expected: FacadeState, what: &'static str) -> Result<(), EdssError> {
        if self.state != expected {
            return Err(EdssError::Uninitialised(what));
        }
        Ok(())
    }

    /// Must be the first call. Loads the plugin and returns its recognized
    /// options dictionary.
    pub fn open_cal(&mut self, plugin_identifier: &str) -> Result<HashMap<String, String>, EdssError> {
        self.require(FacadeState::Uninit, "OpenCAL must be the first call")?;
        let plugin = edss_cal::load_cal_plugin(plugin_identifier)?;
        let options = plugin.options();
        self.session = Some(Session {
            plugin: Arc::new(Mutex::new(plugin)),
            // Placeholders until InitServer populates them; never observed
            // before then because the state machine blocks earlier calls.
            capture_config: CaptureConfig { pix_fmt: edss_cal::PixelFormat::Bgra, width: 0, height: 0, framerate: 0 },
            slots: Arc::new(CaptureSlots::new(0)),
            ring: Arc::new(FrameRing::new(2)),
            semaphore: Arc::new(Semaphore::new(0)),
            encoding_finished: Arc::new(AtomicBool::new(false)),
            muxer: None,
            capture_handle: None,
            stream_handle: None,
        });
        self.state = FacadeState::CalOpened;
        tracing::info!(plugin = plugin_identifier, "CAL opened");
        Ok(options)
    }

    /// Initializes the plugin with the caller's (possibly edited) options,
    /// then brings up the encoder/muxer in full. Returns the SDP.
    pub fn init_server(&mut self, config: &ServerConfig, cal_options: &HashMap<String, String>) -> Result<String, EdssError> {
        self.require(FacadeState::CalOpened, "InitServer requires OpenCAL to have succeeded")?;
        config.validate()?;

        let session = self.session.as_mut().expect("CalOpened implies a session exists");
        let capture_config = {
            let mut plugin = session.plugin.lock();
            plugin.init(cal_options)?
        };

        let encoder_cfg = EncoderConfig {
            width: capture_config.width,
            height: capture_config.height,
            framerate: capture_config.framerate,
            bit_rate: config.bitrate,
        };
        let (muxer, sdp) = MuxerContext::new(
            &config.ip.to_string(),
            config.port,
            encoder_cfg,
            &config.srtp_out_params,
        )?;

        session.capture_config = capture_config;
        session.slots = Arc::new(CaptureSlots::new(capture_config.frame_bytes()));
        session.muxer = Some(Arc::new(muxer));
        self.state = FacadeState::ServerReady;
        tracing::info!(
            width = capture_config.width,
            height = capture_config.height,
            framerate = capture_config.framerate,
            "server initialized"
        );
        Ok(sdp)
    }

    /// Spawns the capture and stream threads and returns immediately.
    pub fn init_streaming(&mut self) -> Result<(), EdssError> {
        self.require(FacadeState::ServerReady, "InitStreaming requires InitServer to have succeeded")?;
        let session = self.session.as_mut().expect("ServerReady implies a session exists");
        let muxer = Arc::clone(session.muxer.as_ref().expect("InitServer always populates the muxer"));

        let stream_handle = spawn_stream_thread(
            Arc::clone(&session.slots),
            Arc::clone(&session.ring),
            Arc::clone(&session.semaphore),
            Arc::clone(&session.encoding_finished),
            muxer,
        )
        .map_err(|e| EdssError::PthreadFailure(e.to_string()))?;

        let capture_handle = spawn_capture_thread(
            Arc::clone(&session.plugin),
            Arc::clone(&session.slots),
            Arc::clone(&session.ring),
            Arc::clone(&session.semaphore),
            Arc::clone(&session.encoding_finished),
        )
        .map_err(|e| EdssError::PthreadFailure(e.to_string()))?;

        session.stream_handle = Some(stream_handle);
        session.capture_handle = Some(capture_handle);
        self.state = FacadeState::Streaming;
        tracing::info!("streaming started");
        Ok(())
    }

    /// Forwards to `plugin.write_mouse_event`. Valid once the plugin is
    /// initialized (`ServerReady` or later).
    pub fn write_mouse_event(&self, event: MouseEvent) -> Result<(), EdssError> {
        if self.state != FacadeState::ServerReady && self.state != FacadeState::Streaming {
            return Err(EdssError::Uninitialised("WriteMouseEvent requires an initialized server"));
        }
        let session = self.session.as_ref().expect("ServerReady/Streaming implies a session exists");
        session.plugin.lock().write_mouse_event(event)?;
        Ok(())
    }

    /// Accepted and state-validated, but never forwarded anywhere — the
    /// keyboard path is declared in the ABI and unwired in the reference.
    pub fn write_keyboard_event(&self, _event: KeyboardEvent) -> Result<(), EdssError> {
        if self.state != FacadeState::ServerReady && self.state != FacadeState::Streaming {
            return Err(EdssError::Uninitialised("WriteKeyboardEvent requires an initialized server"));
        }
        Ok(())
    }

    /// RTP packets written so far by the muxer, sampled at the payloader.
    /// Available once `InitServer` has succeeded; primarily useful for
    /// tests driving the deterministic CAL backend.
    pub fn packets_written(&self) -> Result<u64, EdssError> {
        let session = self
            .session
            .as_ref()
            .ok_or(EdssError::Uninitialised("no active session"))?;
        let muxer = session
            .muxer
            .as_ref()
            .ok_or(EdssError::Uninitialised("muxer not initialized yet"))?;
        Ok(muxer.packets_written())
    }

    /// Reserved; always a no-op while in `Streaming`.
    pub fn update_streaming(&mut self, _config: &ServerConfig) -> Result<(), EdssError> {
        self.require(FacadeState::Streaming, "UpdateStreaming requires an active stream")
    }

    /// Sets `encodingFinished`, joins both threads, tears down the muxer,
    /// and shuts the plugin down. Idempotent: a second call while already
    /// `Closed` returns `Ok(())` rather than re-running teardown.
    pub fn close_streaming(&mut self) -> Result<(), EdssError> {
        if self.state == FacadeState::Closed {
            return Ok(());
        }
        self.require(FacadeState::Streaming, "CloseStreaming requires an active stream")?;

        let mut session = self.session.take().expect("Streaming implies a session exists");
        session.encoding_finished.store(true, Ordering::Relaxed);

        if let Some(handle) = session.capture_handle.take() {
            handle.join().map_err(|_| EdssError::PthreadFailure("capture thread panicked".to_string()))?;
        }
        if let Some(handle) = session.stream_handle.take() {
            handle.join().map_err(|_| EdssError::PthreadFailure("stream thread panicked".to_string()))?;
        }

        session.plugin.lock().shutdown()?;
        self.state = FacadeState::Closed;
        tracing::info!("streaming closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig::new(
            Ipv4Addr::new(127, 0, 0, 1),
            0, // filled in per test to avoid port collisions across parallel tests
            2_000_000,
            30,
            base64_key(),
        )
    }

    fn base64_key() -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(vec![0u8; 30])
    }

    #[test]
    fn calls_out_of_order_return_uninitialised() {
        let mut facade = ServerFacade::new();
        let err = facade.init_streaming().unwrap_err();
        assert!(matches!(err, EdssError::Uninitialised(_)));
    }

    #[test]
    fn bad_plugin_identifier_is_invalid_cal() {
        let mut facade = ServerFacade::new();
        let err = facade.open_cal("no-such-lib").unwrap_err();
        assert!(matches!(err, EdssError::InvalidCal(_)));
    }

    #[test]
    fn open_cal_twice_is_rejected() {
        let mut facade = ServerFacade::new();
        facade.open_cal("test").unwrap();
        let err = facade.open_cal("test").unwrap_err();
        assert!(matches!(err, EdssError::Uninitialised(_)));
    }

    #[test]
    fn close_streaming_twice_is_idempotent() {
        let mut facade = ServerFacade::new();
        facade.open_cal("test").unwrap();
        let mut cfg = config();
        cfg.port = 15004;
        facade.init_server(&cfg, &HashMap::new()).unwrap();
        facade.init_streaming().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(facade.close_streaming().is_ok());
        assert!(facade.close_streaming().is_ok());
        assert_eq!(facade.state(), FacadeState::Closed);
    }

    #[test]
    fn mouse_events_are_rejected_before_init_server() {
        let mut facade = ServerFacade::new();
        facade.open_cal("test").unwrap();
        let err = facade.write_mouse_event(MouseEvent::Move { x: 10, y: 20 }).unwrap_err();
        assert!(matches!(err, EdssError::Uninitialised(_)));
    }

    #[test]
    fn mouse_events_fan_out_once_the_server_is_ready() {
        let mut facade = ServerFacade::new();
        facade.open_cal("test").unwrap();
        let mut cfg = config();
        cfg.port = 15005;
        facade.init_server(&cfg, &HashMap::new()).unwrap();

        facade.write_mouse_event(MouseEvent::Move { x: 10, y: 20 }).unwrap();
        facade
            .write_mouse_event(MouseEvent::Click { button: edss_cal::MouseButton::Left, pressed: true })
            .unwrap();
        facade
            .write_mouse_event(MouseEvent::Click { button: edss_cal::MouseButton::Left, pressed: false })
            .unwrap();
    }
}
