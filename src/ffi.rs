//! C-callable surface. The reference keeps one process-wide session in
//! file-scope statics; this port hands the caller an opaque session handle
//! instead, so nothing here is global mutable state.
//!
//! Every entry point returns [`EdssStatus`] and never panics across the FFI
//! boundary: a Rust panic unwinding into C code is undefined behavior, so
//! each function catches internal errors with `?`/`match` and reports them
//! as a status code instead.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::ptr;

use crate::config::ServerConfig;
use crate::facade::{KeyboardEvent, ServerFacade};
use crate::status::EdssStatus;
use edss_cal::{MouseButton, MouseEvent};

/// Opaque session handle. The caller owns the pointer returned by
/// [`edss_session_new`] and must release it with [`edss_session_free`].
pub struct EdssSession {
    facade: ServerFacade,
}

/// Minimum size of the caller-supplied SDP buffer.
pub const EDSS_SDP_BUFFER_MIN_LEN: usize = 3000;

/// # Safety
/// The returned pointer is heap-allocated and must be released with exactly
/// one call to [`edss_session_free`].
#[no_mangle]
pub unsafe extern "C" fn edss_session_new() -> *mut EdssSession {
    Box::into_raw(Box::new(EdssSession { facade: ServerFacade::new() }))
}

/// # Safety
/// `session` must be a pointer previously returned by [`edss_session_new`]
/// and not yet freed. Passing null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn edss_session_free(session: *mut EdssSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

unsafe fn session_mut<'a>(session: *mut EdssSession) -> Result<&'a mut EdssSession, EdssStatus> {
    session.as_mut().ok_or(EdssStatus::Uninitialised)
}

unsafe fn c_str_to_string(ptr: *const c_char) -> Result<String, EdssStatus> {
    if ptr.is_null() {
        return Err(EdssStatus::InvalidConfig);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|_| EdssStatus::InvalidConfig)
}

/// Builds the CAL options dictionary from parallel C-string arrays. `count`
/// zero makes both array pointers optional (`null` is then read as "no
/// options"), matching callers such as the `test` plugin that need none.
unsafe fn cal_options_from_arrays(
    keys: *const *const c_char,
    values: *const *const c_char,
    count: usize,
) -> Result<HashMap<String, String>, EdssStatus> {
    if count == 0 {
        return Ok(HashMap::new());
    }
    if keys.is_null() || values.is_null() {
        return Err(EdssStatus::InvalidConfig);
    }
    let mut options = HashMap::with_capacity(count);
    for i in 0..count {
        let key = c_str_to_string(*keys.add(i))?;
        let value = c_str_to_string(*values.add(i))?;
        options.insert(key, value);
    }
    Ok(options)
}

/// # Safety
/// `session` must be a live handle from [`edss_session_new`]. `plugin_id`
/// must be a valid NUL-terminated C string for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn edss_open_cal(session: *mut EdssSession, plugin_id: *const c_char) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        let session = session_mut(session)?;
        let plugin_id = c_str_to_string(plugin_id)?;
        session
            .facade
            .open_cal(&plugin_id)
            .map(|_options| ())
            .map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// # Safety
/// `session` must be a live handle. `ip`/`srtp_out_params` must be valid
/// NUL-terminated C strings. `cal_option_keys`/`cal_option_values` must each
/// point to `cal_option_count` valid NUL-terminated C strings (or be null
/// when `cal_option_count` is 0); they form the CAL options dictionary
/// forwarded to the plugin's `init`, e.g. the vGPU plugin's required
/// `vgpuId`. `sdp_out`/`sdp_out_len` describe a caller-owned buffer that this
/// call writes the SDP text into (with a NUL terminator); the buffer must be
/// at least `sdp_out_len` bytes and writable.
#[no_mangle]
pub unsafe extern "C" fn edss_init_server(
    session: *mut EdssSession,
    ip_host_order: u32,
    port: u16,
    bitrate: u32,
    framerate: u32,
    srtp_out_params: *const c_char,
    cal_option_keys: *const *const c_char,
    cal_option_values: *const *const c_char,
    cal_option_count: usize,
    sdp_out: *mut c_char,
    sdp_out_len: usize,
) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        if sdp_out.is_null() || sdp_out_len < EDSS_SDP_BUFFER_MIN_LEN {
            return Err(EdssStatus::LibavFailure);
        }
        let session = session_mut(session)?;
        let srtp_out_params = c_str_to_string(srtp_out_params)?;
        let cal_options = cal_options_from_arrays(cal_option_keys, cal_option_values, cal_option_count)?;
        let config = ServerConfig::from_host_order_ip(ip_host_order, port, bitrate, framerate, srtp_out_params);
        let sdp = session.facade.init_server(&config, &cal_options).map_err(EdssStatus::from)?;
        write_c_string(&sdp, sdp_out, sdp_out_len)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

fn write_c_string(text: &str, out: *mut c_char, out_len: usize) -> Result<(), EdssStatus> {
    let bytes = text.as_bytes();
    if bytes.len() + 1 > out_len {
        return Err(EdssStatus::LibavFailure);
    }
    // SAFETY: caller guarantees `out` is writable for `out_len` bytes.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), out, bytes.len());
        *out.add(bytes.len()) = 0;
    }
    Ok(())
}

/// # Safety
/// `session` must be a live handle returned by [`edss_session_new`].
#[no_mangle]
pub unsafe extern "C" fn edss_init_streaming(session: *mut EdssSession) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        session_mut(session)?.facade.init_streaming().map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// # Safety
/// `session` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn edss_write_mouse_move(session: *mut EdssSession, x: u16, y: u16) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        session_mut(session)?
            .facade
            .write_mouse_event(MouseEvent::Move { x, y })
            .map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// `button`: 0 = left, 1 = right, 2 = middle. `pressed`: nonzero = down.
///
/// # Safety
/// `session` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn edss_write_mouse_click(session: *mut EdssSession, button: u32, pressed: u8) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        let button = match button {
            0 => MouseButton::Left,
            1 => MouseButton::Right,
            2 => MouseButton::Middle,
            _ => return Err(EdssStatus::InvalidConfig),
        };
        session_mut(session)?
            .facade
            .write_mouse_event(MouseEvent::Click { button, pressed: pressed != 0 })
            .map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// Declared but unwired, matching the reference: validated for session
/// state and then discarded.
///
/// # Safety
/// `session` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn edss_write_keyboard_event(session: *mut EdssSession, key_code: u32, pressed: u8) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        session_mut(session)?
            .facade
            .write_keyboard_event(KeyboardEvent { key_code, pressed: pressed != 0 })
            .map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// # Safety
/// `session` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn edss_update_streaming(session: *mut EdssSession, ip_host_order: u32, port: u16, bitrate: u32, framerate: u32) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        let config = ServerConfig::from_host_order_ip(ip_host_order, port, bitrate, framerate, String::new());
        session_mut(session)?.facade.update_streaming(&config).map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

/// # Safety
/// `session` must be a live handle. Idempotent: safe to call more than once.
#[no_mangle]
pub unsafe extern "C" fn edss_close_streaming(session: *mut EdssSession) -> EdssStatus {
    let run = || -> Result<(), EdssStatus> {
        session_mut(session)?.facade.close_streaming().map_err(EdssStatus::from)
    };
    run().err().unwrap_or(EdssStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn bad_plugin_identifier_returns_invalid_cal() {
        unsafe {
            let session = edss_session_new();
            let plugin_id = CString::new("no-such-lib").unwrap();
            let status = edss_open_cal(session, plugin_id.as_ptr());
            assert_eq!(status, EdssStatus::InvalidCal);
            edss_session_free(session);
        }
    }

    #[test]
    fn init_server_before_open_cal_is_uninitialised() {
        unsafe {
            let session = edss_session_new();
            let srtp = CString::new("A".repeat(40)).unwrap();
            let mut buf = vec![0 as c_char; EDSS_SDP_BUFFER_MIN_LEN];
            let status = edss_init_server(
                session,
                0x7f000001,
                5004,
                1,
                1,
                srtp.as_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                buf.as_mut_ptr(),
                buf.len(),
            );
            assert_eq!(status, EdssStatus::Uninitialised);
            edss_session_free(session);
        }
    }

    #[test]
    fn undersized_sdp_buffer_is_libav_failure() {
        unsafe {
            let session = edss_session_new();
            let plugin_id = CString::new("test").unwrap();
            assert_eq!(edss_open_cal(session, plugin_id.as_ptr()), EdssStatus::Ok);
            let srtp = CString::new("A".repeat(40)).unwrap();
            let mut buf = vec![0 as c_char; 16];
            let status = edss_init_server(
                session,
                0x7f000001,
                5004,
                1,
                1,
                srtp.as_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                buf.as_mut_ptr(),
                buf.len(),
            );
            assert_eq!(status, EdssStatus::LibavFailure);
            edss_session_free(session);
        }
    }

    /// CAL options supplied as parallel C-string arrays reach the plugin's
    /// `init` through the facade, not just the direct-Rust path.
    #[test]
    fn cal_options_arrays_are_forwarded_to_the_plugin() {
        unsafe {
            let session = edss_session_new();
            let plugin_id = CString::new("test").unwrap();
            assert_eq!(edss_open_cal(session, plugin_id.as_ptr()), EdssStatus::Ok);

            let key = CString::new("vgpuId").unwrap();
            let value = CString::new("0").unwrap();
            let keys = [key.as_ptr()];
            let values = [value.as_ptr()];

            let srtp = CString::new("A".repeat(40)).unwrap();
            let mut buf = vec![0 as c_char; EDSS_SDP_BUFFER_MIN_LEN];
            let status = edss_init_server(
                session,
                0x7f000001,
                5004,
                1,
                1,
                srtp.as_ptr(),
                keys.as_ptr(),
                values.as_ptr(),
                1,
                buf.as_mut_ptr(),
                buf.len(),
            );
            assert_eq!(status, EdssStatus::Ok);
            edss_session_free(session);
        }
    }

    #[test]
    fn null_session_is_uninitialised_not_a_crash() {
        unsafe {
            let plugin_id = CString::new("test").unwrap();
            let status = edss_open_cal(ptr::null_mut(), plugin_id.as_ptr());
            assert_eq!(status, EdssStatus::Uninitialised);
        }
    }
}
