//! The flat status enum that is this server's public ABI surface, plus the
//! richer internal error type everything else in the crate actually
//! propagates with `?`. `EdssError` narrows to `EdssStatus` at the facade
//! boundary only; internal code never matches on `EdssStatus` directly.

use thiserror::Error;

/// C-compatible flat status code. Every facade entry point returns one of
/// these; `OK` is zero so a C caller's `if (status)` idiom works.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdssStatus {
    Ok = 0,
    InvalidConfig,
    InvalidCalOptions,
    Uninitialised,
    CalFileNotFound,
    CalLibraryFailure,
    InvalidCal,
    LibavFailure,
    EncodeFailure,
    AllocationFailure,
    PthreadFailure,
    StrmapFailure,
}

#[derive(Debug, Error)]
pub enum EdssError {
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid CAL options: {0}")]
    InvalidCalOptions(String),
    #[error("facade called out of order: {0}")]
    Uninitialised(&'static str),
    #[error("CAL device not found: {0}")]
    CalFileNotFound(String),
    #[error("CAL library failure: {0}")]
    CalLibraryFailure(String),
    #[error("CAL plugin could not be resolved: {0}")]
    InvalidCal(String),
    #[error("media pipeline failure: {0}")]
    LibavFailure(String),
    #[error("frame encode failed: {0}")]
    EncodeFailure(String),
    #[error("allocation failed: {0}")]
    AllocationFailure(String),
    #[error("thread spawn/join failed: {0}")]
    PthreadFailure(String),
}

impl From<&EdssError> for EdssStatus {
    fn from(e: &EdssError) -> Self {
        match e {
            EdssError::InvalidConfig(_) => EdssStatus::InvalidConfig,
            EdssError::InvalidCalOptions(_) => EdssStatus::InvalidCalOptions,
            EdssError::Uninitialised(_) => EdssStatus::Uninitialised,
            EdssError::CalFileNotFound(_) => EdssStatus::CalFileNotFound,
            EdssError::CalLibraryFailure(_) => EdssStatus::CalLibraryFailure,
            EdssError::InvalidCal(_) => EdssStatus::InvalidCal,
            EdssError::LibavFailure(_) => EdssStatus::LibavFailure,
            EdssError::EncodeFailure(_) => EdssStatus::EncodeFailure,
            EdssError::AllocationFailure(_) => EdssStatus::AllocationFailure,
            EdssError::PthreadFailure(_) => EdssStatus::PthreadFailure,
        }
    }
}

impl From<EdssError> for EdssStatus {
    fn from(e: EdssError) -> Self {
        EdssStatus::from(&e)
    }
}

/// CAL errors propagate verbatim when they are one of the CAL-prefixed
/// kinds; everything else collapses to `CalLibraryFailure`.
impl From<edss_cal::CalError> for EdssError {
    fn from(e: edss_cal::CalError) -> Self {
        match e {
            edss_cal::CalError::FileNotFound(path) => EdssError::CalFileNotFound(path),
            edss_cal::CalError::InvalidOptions(msg) => EdssError::InvalidCalOptions(msg),
            edss_cal::CalError::UnknownPlugin(name) => {
                EdssError::InvalidCal(format!("unknown CAL plugin: {name}"))
            }
            edss_cal::CalError::LibraryFailure(msg) => EdssError::CalLibraryFailure(msg),
        }
    }
}

/// Codec open, muxer open, sink open, and header-write failures collapse to
/// `LibavFailure`; push-buffer failures surface as `EncodeFailure` since they
/// happen per submitted frame, matching "Encode frame send/receive failures
/// surface as EncodeFailure".
impl From<edss_rtp::RtpError> for EdssError {
    fn from(e: edss_rtp::RtpError) -> Self {
        match e {
            edss_rtp::RtpError::PushBuffer(msg) => EdssError::EncodeFailure(msg),
            other => EdssError::LibavFailure(other.to_string()),
        }
    }
}
