//! End-to-end round trip across the real wire format: `edss-rtp` encodes and
//! sends over loopback SRTP, `edss-client` receives and decodes, and the
//! decoded frame dimensions are checked against the source.

use std::time::{Duration, Instant};

use edss_client::Decoder;
use edss_rtp::{EncoderConfig, MuxerContext};

fn srtp_params() -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(vec![0x11u8; 30])
}

#[test]
fn encoded_and_decoded_frame_dimensions_match_source() {
    let width = 64u16;
    let height = 64u16;
    let srtp_params = srtp_params();

    let encoder_cfg = EncoderConfig { width, height, framerate: 30, bit_rate: 1_000_000 };
    let (muxer, sdp) = MuxerContext::new("127.0.0.1", 16100, encoder_cfg, &srtp_params).unwrap();

    let mut decoder = Decoder::new(&sdp, &srtp_params).unwrap();

    let frame = vec![0x40u8; width as usize * height as usize * 4];
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut decoded = None;
    while Instant::now() < deadline && decoded.is_none() {
        muxer.push_frame(&frame).unwrap();
        std::thread::sleep(Duration::from_millis(33));
        decoded = decoder.fetch_ring_frame();
    }

    let decoded = decoded.expect("expected at least one decoded frame within the deadline");
    assert_eq!(decoded.width, width as u32);
    assert_eq!(decoded.height, height as u32);

    decoder.stop();
    let _ = muxer.close();
}
