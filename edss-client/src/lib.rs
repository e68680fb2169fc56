//! Client-side decode pipeline: SDP in, a bounded ring of RGB24 frames out.
//!
//! Mirrors the server's `edss-rtp` pipeline in reverse — `udpsrc` receiving
//! the SRTP stream the server's `udpsink` sent, `srtpdec`/`rtph264depay`/
//! `h264parse` undoing the server's encryption and RTP framing, a software
//! H.264 decoder, then `videoconvert` to RGB24 and an `appsink` the decode
//! thread pulls from. Reading a packet, submitting it to the decoder, and
//! pulling a frame out happen internally between `udpsrc` and `appsink`, so
//! the decode thread's job collapses to "pull one sample, publish it,
//! repeat," the same collapse `edss-rtp` makes on the encode side.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use edss_ring::FrameRing;
use gstreamer::glib::prelude::*;
use gstreamer::prelude::*;
use gstreamer::{self as gst, Buffer as GstBuffer};
use gstreamer_app::AppSink;
use gstreamer_video as gst_video;
use thiserror::Error;

const SRTP_KEY_SALT_LEN: usize = 16 + 14;
/// Capacity of the decoded-frame ring the UI polls via `fetch_ring_frame`.
const RING_CAPACITY: usize = 2;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("SDP rejected: {0}")]
    Sdp(#[from] edss_sdp::SdpError),
    #[error("invalid SRTP out-parameters: {0}")]
    InvalidSrtpParams(String),
    #[error("failed to initialize GStreamer: {0}")]
    Init(String),
    #[error("missing GStreamer element: {0}")]
    MissingElement(&'static str),
    #[error("failed to configure pipeline: {0}")]
    PipelineConfig(String),
    #[error("pipeline state change failed: {0}")]
    StateChange(String),
}

/// A decoded RGB24 frame. Owns its pixel backing; dropping it frees the
/// backing, so callers do not need a separate free operation the way the
/// spec's raw-pointer `Frame` handle does.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

fn decode_srtp_params(params: &str) -> Result<Vec<u8>, ClientError> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(params.trim())
        .map_err(|e| ClientError::InvalidSrtpParams(format!("not valid base64: {e}")))?;
    if raw.len() != SRTP_KEY_SALT_LEN {
        return Err(ClientError::InvalidSrtpParams(format!(
            "expected {SRTP_KEY_SALT_LEN} bytes of key+salt, got {}",
            raw.len()
        )));
    }
    Ok(raw)
}

fn make_element(factory: &'static str) -> Result<gst::Element, ClientError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|_| ClientError::MissingElement(factory))
}

/// Owns the receive pipeline and the decode thread pulling frames off it.
pub struct Decoder {
    pipeline: gst::Pipeline,
    ring: Arc<FrameRing<Frame>>,
    decoding_finished: Arc<AtomicBool>,
    decode_thread: Option<JoinHandle<()>>,
}

impl Decoder {
    /// Parse `sdp`, assert it describes exactly one video stream, and bring
    /// up the receive pipeline bound to its ip/port.
    /// `srtp_params` is the same out-of-band key material the server's
    /// `srtp_out_params` carries; key exchange is assumed already
    /// negotiated, so it arrives here the same way.
    pub fn new(sdp: &str, srtp_params: &str) -> Result<Self, ClientError> {
        let session = edss_sdp::parse_sdp(sdp)?;
        Ipv4Addr::from_str(&session.ip)
            .map_err(|e| ClientError::InvalidSrtpParams(format!("bad connection address: {e}")))?;
        let key_salt = decode_srtp_params(srtp_params)?;

        gst::init().map_err(|e| ClientError::Init(e.to_string()))?;

        let udpsrc = make_element("udpsrc")?;
        let srtpdec = make_element("srtpdec")?;
        let depay = make_element("rtph264depay")?;
        let parse = make_element("h264parse")?;
        let decoder = make_element("avdec_h264")?;
        let videoconvert = make_element("videoconvert")?;
        let capsfilter = make_element("capsfilter")?;
        let appsink = make_element("appsink")?;

        let rtp_caps = gst::Caps::builder("application/x-rtp")
            .field("media", "video")
            .field("clock-rate", session.clock_rate as i32)
            .field("encoding-name", session.codec.as_str())
            .field("payload", session.payload_type as i32)
            .build();
        udpsrc.set_property("port", session.port as i32);
        udpsrc.set_property("caps", &rtp_caps);

        // thread_count=1, low-delay: a single decode thread and a short,
        // drop-on-overflow leaky queue stand in for `fflags=nobuffer`,
        // `flags=low_delay`, `framedrop=1` on the demuxer/decoder side.
        if decoder.has_property("max-threads", None) {
            decoder.set_property("max-threads", 1u32);
        }

        let rgb_caps = gst::Caps::builder("video/x-raw")
            .field("format", gst_video::VideoFormat::Rgb.to_str())
            .build();
        capsfilter.set_property("caps", &rgb_caps);

        // srtpdec's "request-key" expects caps describing the key, not a bare
        // buffer — the same aes-128-icm/hmac-sha1-80 pair srtpenc is
        // configured with on the encode side (edss-rtp::MuxerContext::new).
        let key_buffer = GstBuffer::from_mut_slice(key_salt);
        srtpdec.connect("request-key", false, move |values| {
            let _ssrc = values[1].get::<u32>().ok();
            let caps = gst::Caps::builder("application/x-srtp")
                .field("srtp-key", &key_buffer)
                .field("srtp-cipher", "aes-128-icm")
                .field("srtp-auth", "hmac-sha1-80")
                .field("srtcp-cipher", "aes-128-icm")
                .field("srtcp-auth", "hmac-sha1-80")
                .build();
            Some(caps.to_value())
        });

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", RING_CAPACITY as u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                &udpsrc,
                &srtpdec,
                &depay,
                &parse,
                &decoder,
                &videoconvert,
                &capsfilter,
                &appsink,
            ])
            .map_err(|e| ClientError::PipelineConfig(e.to_string()))?;
        gst::Element::link_many([&udpsrc, &srtpdec])
            .map_err(|e| ClientError::PipelineConfig(e.to_string()))?;
        gst::Element::link_many([&depay, &parse, &decoder, &videoconvert, &capsfilter, &appsink])
            .map_err(|e| ClientError::PipelineConfig(e.to_string()))?;

        let depay_for_pad = depay.clone();
        srtpdec.connect_pad_added(move |_src, src_pad| {
            let sink_pad = depay_for_pad
                .static_pad("sink")
                .expect("rtph264depay always has a sink pad");
            if !sink_pad.is_linked() {
                let _ = src_pad.link(&sink_pad);
            }
        });

        let appsink = appsink
            .downcast::<AppSink>()
            .map_err(|_| ClientError::PipelineConfig("appsink element is not an AppSink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ClientError::StateChange(e.to_string()))?;

        let ring = Arc::new(FrameRing::new(RING_CAPACITY));
        let decoding_finished = Arc::new(AtomicBool::new(false));

        let thread_ring = Arc::clone(&ring);
        let thread_finished = Arc::clone(&decoding_finished);
        let thread_sink = appsink.clone();
        let decode_thread = std::thread::spawn(move || {
            decode_loop(thread_sink, thread_ring, thread_finished);
        });

        Ok(Self {
            pipeline,
            ring,
            decoding_finished,
            decode_thread: Some(decode_thread),
        })
    }

    /// Non-blockingly pop one decoded frame, if any is queued.
    pub fn fetch_ring_frame(&self) -> Option<Frame> {
        self.ring.dequeue()
    }

    /// Stop the decode thread and tear the pipeline down. Idempotent: a
    /// second call observes `decode_thread` already taken and is a no-op.
    pub fn stop(&mut self) {
        self.decoding_finished.store(true, Ordering::Relaxed);
        if let Some(handle) = self.decode_thread.take() {
            let _ = self.pipeline.set_state(gst::State::Null);
            let _ = handle.join();
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(appsink: AppSink, ring: Arc<FrameRing<Frame>>, decoding_finished: Arc<AtomicBool>) {
    loop {
        if decoding_finished.load(Ordering::Relaxed) {
            return;
        }
        let sample = match appsink.try_pull_sample(gst::ClockTime::from_mseconds(200)) {
            Some(sample) => sample,
            None => continue,
        };
        let buffer = match sample.buffer() {
            Some(buffer) => buffer,
            None => {
                tracing::debug!("decoded sample had no buffer; skipping");
                continue;
            }
        };
        let caps = match sample.caps() {
            Some(caps) => caps,
            None => continue,
        };
        let info = match gst_video::VideoInfo::from_caps(caps) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("could not read decoded frame geometry: {e}");
                continue;
            }
        };
        let map = match buffer.map_readable() {
            Ok(map) => map,
            Err(e) => {
                tracing::debug!("could not map decoded buffer: {e}");
                continue;
            }
        };
        let frame = Frame {
            width: info.width(),
            height: info.height(),
            data: map.as_slice().to_vec(),
        };
        // Bounded ring, capacity 2: a full ring means the consumer (the UI
        // polling fetch_ring_frame) is behind, so the newest frame is
        // dropped rather than blocking the decode thread.
        let _ = ring.enqueue(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_only_sdp_is_rejected_before_any_gstreamer_setup() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=edss\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 5006 RTP/AVP 97\r\n";
        match Decoder::new(sdp, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA") {
            Err(ClientError::Sdp(edss_sdp::SdpError::AudioOnly)) => {}
            other => panic!("expected ClientError::Sdp(AudioOnly), got {other:?}"),
        }
    }

    #[test]
    fn malformed_srtp_params_rejected_before_gstreamer_setup() {
        let sdp = edss_sdp::build_sdp("127.0.0.1", 5004);
        match Decoder::new(&sdp, "not-base64!!") {
            Err(ClientError::InvalidSrtpParams(_)) => {}
            other => panic!("expected InvalidSrtpParams, got {other:?}"),
        }
    }
}
