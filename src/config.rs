//! Session configuration record and its validation.

use crate::status::EdssError;
use std::net::Ipv4Addr;

/// Maximum length of the `srtp_out_params` string itself (the ABI's
/// fixed-size field holds up to this many bytes plus a separate NUL
/// terminator, per "≤40 bytes + NUL").
pub const SRTP_OUT_PARAMS_MAX_LEN: usize = 40;

/// Session configuration handed to `InitServer`. The ABI carries the IPv4
/// address as a 32-bit host-order integer; this type exposes it as both that
/// integer and a parsed `Ipv4Addr` for convenience.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub bitrate: u32,
    pub framerate: u32,
    pub srtp_out_params: String,
}

impl ServerConfig {
    pub fn new(ip: Ipv4Addr, port: u16, bitrate: u32, framerate: u32, srtp_out_params: impl Into<String>) -> Self {
        Self {
            ip,
            port,
            bitrate,
            framerate,
            srtp_out_params: srtp_out_params.into(),
        }
    }

    /// Build from the ABI's 32-bit host-order representation of the IPv4
    /// address.
    pub fn from_host_order_ip(ip_host_order: u32, port: u16, bitrate: u32, framerate: u32, srtp_out_params: impl Into<String>) -> Self {
        Self::new(Ipv4Addr::from(ip_host_order), port, bitrate, framerate, srtp_out_params)
    }

    /// Range/non-emptiness checks; every failure maps to
    /// `EdssStatus::InvalidConfig`.
    ///
    /// Deliberately does NOT check `port`: §8's boundary behavior for "SRTP
    /// URL with port 0 or malformed IP" is `LibavFailure`, which is the
    /// status `MuxerContext::new`'s own endpoint validation already produces
    /// (see `EdssError::From<edss_rtp::RtpError>`). Rejecting port 0 here
    /// instead would pre-empt that path and surface `InvalidConfig`,
    /// contradicting the spec.
    pub fn validate(&self) -> Result<(), EdssError> {
        if self.bitrate == 0 {
            return Err(EdssError::InvalidConfig("bitrate must be nonzero".to_string()));
        }
        if self.framerate == 0 || self.framerate > u16::MAX as u32 {
            return Err(EdssError::InvalidConfig(format!(
                "framerate {} out of range 1..={}",
                self.framerate,
                u16::MAX
            )));
        }
        if self.srtp_out_params.is_empty() {
            return Err(EdssError::InvalidConfig("srtp_out_params must not be empty".to_string()));
        }
        if self.srtp_out_params.len() > SRTP_OUT_PARAMS_MAX_LEN {
            return Err(EdssError::InvalidConfig(format!(
                "srtp_out_params longer than the {}-byte ABI budget",
                SRTP_OUT_PARAMS_MAX_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServerConfig {
        ServerConfig::new(Ipv4Addr::new(127, 0, 0, 1), 5004, 10_000_000, 60, "A".repeat(20))
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_port_passes_config_validation() {
        // Port 0 is rejected downstream by `MuxerContext::new` as
        // `LibavFailure`, not here — see the comment on `validate`.
        let mut cfg = valid();
        cfg.port = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_framerate_is_rejected() {
        let mut cfg = valid();
        cfg.framerate = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_srtp_params_is_rejected() {
        let mut cfg = valid();
        cfg.srtp_out_params = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn max_length_srtp_params_is_accepted() {
        let mut cfg = valid();
        cfg.srtp_out_params = "A".repeat(SRTP_OUT_PARAMS_MAX_LEN);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oversize_srtp_params_is_rejected() {
        let mut cfg = valid();
        cfg.srtp_out_params = "A".repeat(SRTP_OUT_PARAMS_MAX_LEN + 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn host_order_ip_round_trips() {
        let cfg = ServerConfig::from_host_order_ip(0x7f000001, 5004, 1, 1, "x");
        assert_eq!(cfg.ip, Ipv4Addr::new(127, 0, 0, 1));
    }
}
