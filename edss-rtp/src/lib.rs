//! H.264 encoder and SRTP muxer for the streaming server's stream thread.
//!
//! Ground truth for this crate's pipeline shape is `cap-rtsp`: an `appsrc` fed
//! raw captured pixels, `videoconvert`/`videoscale` doing the color-space and
//! size conversion, a software H.264 encoder tuned for zero-latency, and a
//! payloader feeding the network sink. Where `cap-rtsp` hands packets to
//! `rtph264pay` and then an RTSP session, this crate continues one element
//! further into `srtpenc` and a `udpsink`, since the server talks raw SRTP to
//! a single pre-negotiated peer rather than serving RTSP sessions.
//!
//! The spec's `EncoderContext`/`MuxerContext` split (a color-space converter
//! owned separately from the muxer) collapses here into one GStreamer
//! pipeline: `videoconvert`+`videoscale` *are* the converter, `x264enc` is the
//! encoder, and `rtph264pay`+`srtpenc`+`udpsink` are the muxer. They are one
//! pipeline object because GStreamer already owns exactly this lifecycle
//! (build → play → push buffers → EOS → null) as a unit; splitting it back
//! into separate Rust types would just relay calls between them for no gain.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gstreamer::prelude::*;
use gstreamer::{self as gst, Buffer as GstBuffer};
use gstreamer_app::AppSrc;
use thiserror::Error;

/// Raw key material size for `AES_CM_128_HMAC_SHA1_80`: a 16-byte master key
/// plus a 14-byte master salt, per the suite's standard key sizing.
const SRTP_KEY_SALT_LEN: usize = 16 + 14;

#[derive(Debug, Error)]
pub enum RtpError {
    #[error("failed to initialize GStreamer: {0}")]
    Init(String),
    #[error("missing GStreamer element: {0}")]
    MissingElement(&'static str),
    #[error("failed to configure pipeline: {0}")]
    PipelineConfig(String),
    #[error("invalid SRTP out-parameters: {0}")]
    InvalidSrtpParams(String),
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("pipeline state change failed: {0}")]
    StateChange(String),
    #[error("failed to push frame into encoder: {0}")]
    PushBuffer(String),
}

/// Fields the encoder needs from `CaptureConfig` plus the session's target
/// bitrate; mirrors `EncoderContext` in the spec's data model.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub width: u16,
    pub height: u16,
    pub framerate: u16,
    pub bit_rate: u32,
}

/// Owns the running GStreamer pipeline: appsrc → videoconvert → videoscale →
/// x264enc (zerolatency) → h264parse → rtph264pay → srtpenc → udpsink.
///
/// One `MuxerContext` exists per streaming session, owned exclusively by the
/// stream thread between `InitStreaming` and `CloseStreaming`, matching the
/// spec's shared-resource policy for encoder/muxer state.
pub struct MuxerContext {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    framerate: u16,
    frame_duration: gst::ClockTime,
    next_pts: AtomicU64,
    packets_written: Arc<AtomicU64>,
}

/// Parse the caller-supplied SRTP out-parameters (base64 of a 30-byte
/// key+salt, per the AES_CM_128_HMAC_SHA1_80 convention this server always
/// uses) into raw bytes suitable for `srtpenc`'s `key` property.
fn decode_srtp_params(params: &str) -> Result<Vec<u8>, RtpError> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(params.trim())
        .map_err(|e| RtpError::InvalidSrtpParams(format!("not valid base64: {e}")))?;
    if raw.len() != SRTP_KEY_SALT_LEN {
        return Err(RtpError::InvalidSrtpParams(format!(
            "expected {SRTP_KEY_SALT_LEN} bytes of key+salt, got {}",
            raw.len()
        )));
    }
    Ok(raw)
}

fn make_element(factory: &'static str) -> Result<gst::Element, RtpError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|_| RtpError::MissingElement(factory))
}

impl MuxerContext {
    /// Builds the pipeline, wires the encoder and SRTP sink, brings it to
    /// `Playing`, and returns the context alongside the SDP text the caller
    /// emits to the peer.
    pub fn new(
        ip: &str,
        port: u16,
        encoder: EncoderConfig,
        srtp_out_params: &str,
    ) -> Result<(Self, String), RtpError> {
        if port == 0 {
            return Err(RtpError::InvalidEndpoint("port must be nonzero".to_string()));
        }
        Ipv4Addr::from_str(ip)
            .map_err(|e| RtpError::InvalidEndpoint(format!("{ip}: {e}")))?;
        let key_salt = decode_srtp_params(srtp_out_params)?;

        gst::init().map_err(|e| RtpError::Init(e.to_string()))?;

        let appsrc = make_element("appsrc")?;
        let videoconvert = make_element("videoconvert")?;
        let videoscale = make_element("videoscale")?;
        let capsfilter = make_element("capsfilter")?;
        let x264enc = make_element("x264enc")?;
        let h264parse = make_element("h264parse")?;
        let rtppay = make_element("rtph264pay")?;
        let srtpenc = make_element("srtpenc")?;
        let udpsink = make_element("udpsink")?;

        let src_caps = gst::Caps::builder("video/x-raw")
            .field("format", "BGRA")
            .field("width", encoder.width as i32)
            .field("height", encoder.height as i32)
            .field("framerate", gst::Fraction::new(encoder.framerate as i32, 1))
            .build();
        let appsrc = appsrc
            .downcast::<AppSrc>()
            .map_err(|_| RtpError::PipelineConfig("appsrc element is not an AppSrc".to_string()))?;
        appsrc.set_caps(Some(&src_caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_block(true);

        videoscale.set_property_from_str("method", "bicubic");

        let i420_caps = gst::Caps::builder("video/x-raw")
            .field("format", "I420")
            .field("width", encoder.width as i32)
            .field("height", encoder.height as i32)
            .build();
        capsfilter.set_property("caps", &i420_caps);

        // gop_size=60, max_b_frames=0, preset "ultrafast", tune "zerolatency".
        x264enc.set_property("key-int-max", 60u32);
        x264enc.set_property("bframes", 0u32);
        x264enc.set_property("bitrate", (encoder.bit_rate / 1000).max(1));
        x264enc.set_property_from_str("tune", "zerolatency");
        x264enc.set_property_from_str("speed-preset", "ultrafast");

        rtppay.set_property("pt", 96u32);
        rtppay.set_property("config-interval", 1i32);

        let key_buffer = GstBuffer::from_mut_slice(key_salt);
        srtpenc.set_property("key", &key_buffer);
        srtpenc.set_property_from_str("rtp-cipher", "aes-128-icm");
        srtpenc.set_property_from_str("rtp-auth", "hmac-sha1-80");
        srtpenc.set_property_from_str("rtcp-cipher", "aes-128-icm");
        srtpenc.set_property_from_str("rtcp-auth", "hmac-sha1-80");

        udpsink.set_property("host", ip);
        udpsink.set_property("port", port as i32);
        udpsink.set_property("sync", false);
        udpsink.set_property("async", false);

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                appsrc.upcast_ref::<gst::Element>(),
                &videoconvert,
                &videoscale,
                &capsfilter,
                &x264enc,
                &h264parse,
                &rtppay,
                &srtpenc,
                &udpsink,
            ])
            .map_err(|e| RtpError::PipelineConfig(e.to_string()))?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &videoconvert,
            &videoscale,
            &capsfilter,
            &x264enc,
            &h264parse,
            &rtppay,
            &srtpenc,
            &udpsink,
        ])
        .map_err(|e| RtpError::PipelineConfig(e.to_string()))?;

        let packets_written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&packets_written);
        rtppay
            .static_pad("src")
            .ok_or_else(|| RtpError::PipelineConfig("rtph264pay has no src pad".to_string()))?
            .add_probe(gst::PadProbeType::BUFFER, move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
                gst::PadProbeReturn::Ok
            });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RtpError::StateChange(e.to_string()))?;

        let sdp = edss_sdp::build_sdp(ip, port);
        let frame_duration = gst::ClockTime::from_nseconds(1_000_000_000u64 / encoder.framerate.max(1) as u64);

        Ok((
            Self {
                pipeline,
                appsrc,
                framerate: encoder.framerate,
                frame_duration,
                next_pts: AtomicU64::new(0),
                packets_written,
            },
            sdp,
        ))
    }

    /// Push one raw BGRA frame into the pipeline. The presentation timestamp
    /// is the frame index times the frame duration, which keeps it strictly
    /// monotonically increasing without the caller needing to track
    /// wall-clock time itself.
    pub fn push_frame(&self, bgra: &[u8]) -> Result<(), RtpError> {
        let mut buffer = GstBuffer::with_size(bgra.len())
            .map_err(|e| RtpError::PushBuffer(e.to_string()))?;
        {
            let index = self.next_pts.fetch_add(1, Ordering::SeqCst);
            let buf_mut = buffer.get_mut().expect("buffer uniquely owned before push");
            buf_mut.set_pts(self.frame_duration * index);
            buf_mut.set_duration(self.frame_duration);
            let mut map = buf_mut
                .map_writable()
                .map_err(|e| RtpError::PushBuffer(e.to_string()))?;
            map.as_mut_slice().copy_from_slice(bgra);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RtpError::PushBuffer(format!("{e:?}")))?;
        Ok(())
    }

    /// Number of RTP packets successfully handed to `udpsink` so far, sampled
    /// at the payloader (before SRTP encryption adds its own framing).
    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    pub fn framerate(&self) -> u16 {
        self.framerate
    }

    /// Push EOS, wait briefly for it to drain, then tear the pipeline down
    /// so the SRTP sink is closed cleanly on stream-thread exit.
    pub fn close(&self) -> Result<(), RtpError> {
        let _ = self.appsrc.end_of_stream();
        let bus = self.pipeline.bus();
        if let Some(bus) = bus {
            bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(2),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| RtpError::StateChange(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_port() {
        let cfg = EncoderConfig { width: 64, height: 64, framerate: 60, bit_rate: 1_000_000 };
        match MuxerContext::new("127.0.0.1", 0, cfg, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA") {
            Err(RtpError::InvalidEndpoint(_)) => {}
            other => panic!("expected InvalidEndpoint, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_ip() {
        let cfg = EncoderConfig { width: 64, height: 64, framerate: 60, bit_rate: 1_000_000 };
        match MuxerContext::new("not-an-ip", 5004, cfg, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA") {
            Err(RtpError::InvalidEndpoint(_)) => {}
            other => panic!("expected InvalidEndpoint, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_length_srtp_params() {
        assert!(decode_srtp_params("AAAA").is_err());
    }

    #[test]
    fn accepts_well_formed_srtp_params() {
        let bytes = vec![0u8; SRTP_KEY_SALT_LEN];
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        assert!(decode_srtp_params(&encoded).is_ok());
    }
}
