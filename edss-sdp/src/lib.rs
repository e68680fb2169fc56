//! Minimal SDP (Session Description Protocol) text generation and parsing for
//! a single-video-stream RTP/SAVP session.
//!
//! This crate does not attempt to be a general SDP library — it emits and
//! reads exactly the shape the streaming server produces: one session, one
//! `m=video` line, one `a=rtpmap`. Anything richer is out of scope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdpError {
    #[error("SDP has no m=video line")]
    NoVideoStream,
    #[error("SDP declares an audio stream but no video stream")]
    AudioOnly,
    #[error("malformed SDP media line: {0}")]
    MalformedMediaLine(String),
    #[error("malformed SDP connection line: {0}")]
    MalformedConnectionLine(String),
}

/// The pieces of a session description this crate's caller actually needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub ip: String,
    pub port: u16,
    pub payload_type: u8,
    pub codec: String,
    pub clock_rate: u32,
}

/// Build the SDP text the muxer emits for one H.264/RTP/SAVP video stream.
///
/// The payload type is fixed at 96 (first dynamic RTP payload type) and the
/// clock rate at 90000 Hz, matching the H.264-over-RTP convention used
/// throughout the rest of the ecosystem this server draws its media stack
/// from.
pub fn build_sdp(ip: &str, port: u16) -> String {
    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 {ip}\r\n\
         s=edss\r\n\
         c=IN IP4 {ip}\r\n\
         t=0 0\r\n\
         m=video {port} RTP/SAVP 96\r\n\
         a=rtpmap:96 H264/90000\r\n\
         a=fmtp:96 packetization-mode=1\r\n"
    )
}

/// Parse an SDP text, returning the single video stream's connection
/// parameters. Rejects SDPs with no video media line, or with only an audio
/// media line, as a fatal configuration error (scenario 3 in the testable
/// properties: audio-only SDP must not be accepted by the decoder).
pub fn parse_sdp(sdp: &str) -> Result<SessionDescription, SdpError> {
    let mut ip: Option<String> = None;
    let mut saw_audio = false;
    let mut video: Option<(u16, u8)> = None;
    let mut rtpmap: Option<(String, u32)> = None;

    for line in sdp.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            ip = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("m=audio ") {
            saw_audio = true;
            let _ = rest;
        } else if let Some(rest) = line.strip_prefix("m=video ") {
            let mut parts = rest.split_whitespace();
            let port: u16 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SdpError::MalformedMediaLine(line.to_string()))?;
            let payload_type: u8 = parts
                .last()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SdpError::MalformedMediaLine(line.to_string()))?;
            video = Some((port, payload_type));
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((_, codec_clock)) = rest.split_once(' ') {
                if let Some((codec, clock)) = codec_clock.split_once('/') {
                    if let Ok(clock_rate) = clock.parse::<u32>() {
                        rtpmap = Some((codec.to_string(), clock_rate));
                    }
                }
            }
        }
    }

    let (port, payload_type) = match video {
        Some(v) => v,
        None if saw_audio => return Err(SdpError::AudioOnly),
        None => return Err(SdpError::NoVideoStream),
    };
    let ip = ip.ok_or_else(|| SdpError::MalformedConnectionLine(sdp.to_string()))?;
    let (codec, clock_rate) = rtpmap.unwrap_or_else(|| ("H264".to_string(), 90000));

    Ok(SessionDescription {
        ip,
        port,
        payload_type,
        codec,
        clock_rate,
    })
}
