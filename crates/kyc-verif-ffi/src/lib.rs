//! C-compatible FFI interface for the KYC verification engine
//!
//! # Memory Ownership Rules
//!
//! - `kyc_engine_new()` allocates on the Rust heap, caller owns the pointer
//! - `kyc_engine_free()` must be called to deallocate (it de-initializes first)
//! - Every `KycResultC` returned by value owns its strings; release them
//!   with `kyc_result_free()`
//! - The `KycResultC` passed to a delivery callback is borrowed for the
//!   duration of the call only; copy what you need
//!
//! # Thread Safety
//!
//! The engine is internally synchronized. Any thread may call
//! `kyc_engine_process_*` concurrently on the same engine. Delivery
//! callbacks run on a single engine-owned thread.
//!
//! # Safety
//!
//! All exported functions check pointers for NULL and report failures as
//! negative result codes.

pub mod common;

use std::os::raw::{c_char, c_void};

use kyc_verif::{
    ConfigError, DeliveryMode, Engine, ImageInput, ImageType, KycError, KycResult, PackedImage,
    PlanarImage,
};
use tracing::debug;

use crate::common::{byte_slice, cstr_to_str, cstring_new_or_fallback, free_cstring};

// Largest caller buffer accepted in one call
const MAX_BUFFER_LEN: usize = 512 * 1024 * 1024;
const MAX_CONFIG_LEN: usize = 1024 * 1024;

/// C-compatible result. Strings are NUL-terminated UTF-8, never NULL.
#[repr(C)]
#[derive(Debug)]
pub struct KycResultC {
    /// `>= 0` on success
    pub code: i32,
    pub phrase: *mut c_char,
    /// JSON body, empty when there is none
    pub json: *mut c_char,
    /// Top-level entries in `json`
    pub num_vizs: usize,
}

impl From<&KycResult> for KycResultC {
    fn from(result: &KycResult) -> Self {
        Self {
            code: result.code(),
            phrase: cstring_new_or_fallback(result.phrase(), "invalid phrase"),
            json: cstring_new_or_fallback(result.json(), ""),
            num_vizs: result.num_vizs(),
        }
    }
}

impl From<KycResult> for KycResultC {
    fn from(result: KycResult) -> Self {
        Self::from(&result)
    }
}

impl KycResultC {
    fn error(err: KycError, detail: &str) -> Self {
        KycResult::bodyless(err.code(), format!("{}: {}", err, detail)).into()
    }
}

fn config_error(reason: &str) -> KycResultC {
    KycResult::from(KycError::from(ConfigError::Malformed(reason.to_string()))).into()
}

/// Parallel-mode delivery callback.
///
/// `result` is only valid during the call.
pub type KycDeliveryCallback = extern "C" fn(result: *const KycResultC, user_data: *mut c_void);

/// Opaque caller context handed back to the callback.
struct UserData(*mut c_void);

// The caller guarantees `user_data` may be used from the delivery thread
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

struct CallbackSink {
    callback: KycDeliveryCallback,
    user_data: UserData,
}

impl CallbackSink {
    fn deliver(&self, result: &KycResult) {
        let c_result = KycResultC::from(result);
        (self.callback)(&c_result, self.user_data.0);
        kyc_result_free(c_result);
    }
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Create an uninitialized engine.
///
/// Caller owns the pointer and must call `kyc_engine_free`.
#[no_mangle]
pub extern "C" fn kyc_engine_new() -> *mut Engine {
    Box::into_raw(Box::new(Engine::new()))
}

define_engine_free!(kyc_engine_free, Engine);

/// Start a session.
///
/// # Arguments
/// - `engine`: Valid engine pointer
/// - `json_config`: NUL-terminated configuration document. NULL is rejected
///   with an invalid-configuration result since `assets_folder` is required.
/// - `callback`: NULL for sequential mode, otherwise parallel mode delivering here
/// - `user_data`: Passed back verbatim to `callback`
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_engine_init(
    engine: *const Engine,
    json_config: *const c_char,
    callback: Option<KycDeliveryCallback>,
    user_data: *mut c_void,
) -> KycResultC {
    let Some(engine) = (unsafe { engine.as_ref() }) else {
        return KycResultC::error(KycError::NotInitialized, "null engine pointer");
    };
    let json = match unsafe { cstr_to_str(json_config) } {
        Ok(s) if s.len() <= MAX_CONFIG_LEN => s,
        Ok(_) => return config_error("configuration too large"),
        Err(e) => return config_error(e),
    };

    let mode = match callback {
        None => DeliveryMode::Sequential,
        Some(callback) => {
            let sink = CallbackSink {
                callback,
                user_data: UserData(user_data),
            };
            DeliveryMode::callback(move |result: &KycResult| sink.deliver(result))
        }
    };
    engine.init(json, mode).into()
}

/// End the session, waiting for outstanding deliveries.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_engine_deinit(engine: *const Engine) -> KycResultC {
    match unsafe { engine.as_ref() } {
        Some(engine) => engine.de_init().into(),
        None => KycResultC::error(KycError::NotInitialized, "null engine pointer"),
    }
}

// ============================================================================
// Processing
// ============================================================================

fn process_with(engine: *const Engine, input: Result<ImageInput<'_>, KycResultC>) -> KycResultC {
    let Some(engine) = (unsafe { engine.as_ref() }) else {
        return KycResultC::error(KycError::NotInitialized, "null engine pointer");
    };
    match input {
        Ok(input) => engine.process(input).into(),
        Err(e) => e,
    }
}

fn descriptor_error(reason: String) -> KycResultC {
    KycResult::from(KycError::InvalidImageDescriptor(reason)).into()
}

fn image_type(raw: i32) -> Result<ImageType, KycResultC> {
    ImageType::from_raw(raw).ok_or_else(|| descriptor_error(format!("unknown image type {}", raw)))
}

fn buffer<'a>(ptr: *const u8, len: usize, name: &str) -> Result<&'a [u8], KycResultC> {
    unsafe { byte_slice(ptr, len, MAX_BUFFER_LEN) }
        .map_err(|e| descriptor_error(format!("{}: {}", name, e)))
}

/// Verify a packed RGB/gray/YUV image. `stride` is in pixels, 0 for tight.
///
/// # Safety
/// `data` must point to at least `data_len` bytes.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref, clippy::too_many_arguments)]
pub extern "C" fn kyc_engine_process_packed(
    engine: *const Engine,
    image_type_raw: i32,
    data: *const u8,
    data_len: usize,
    width: usize,
    height: usize,
    stride: usize,
    exif_orientation: i32,
) -> KycResultC {
    let input = image_type(image_type_raw).and_then(|image_type| {
        let data = buffer(data, data_len, "image")?;
        Ok(PackedImage::new(image_type, data, width, height)
            .with_stride(stride)
            .with_orientation(exif_orientation)
            .into())
    });
    process_with(engine, input)
}

/// Verify a three-plane YUV image. Strides are in bytes, 0 for tight.
///
/// # Safety
/// Each plane pointer must point to at least its length in bytes.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref, clippy::too_many_arguments)]
pub extern "C" fn kyc_engine_process_planar(
    engine: *const Engine,
    image_type_raw: i32,
    y: *const u8,
    y_len: usize,
    u: *const u8,
    u_len: usize,
    v: *const u8,
    v_len: usize,
    width: usize,
    height: usize,
    y_stride: usize,
    u_stride: usize,
    v_stride: usize,
    uv_pixel_stride: usize,
    exif_orientation: i32,
) -> KycResultC {
    let input = image_type(image_type_raw).and_then(|image_type| {
        let planes = [
            buffer(y, y_len, "Y plane")?,
            buffer(u, u_len, "U plane")?,
            buffer(v, v_len, "V plane")?,
        ];
        Ok(PlanarImage::new(image_type, planes, width, height)
            .with_strides(y_stride, u_stride, v_stride)
            .with_uv_pixel_stride(uv_pixel_stride)
            .with_orientation(exif_orientation)
            .into())
    });
    process_with(engine, input)
}

/// Verify an encoded JPEG/PNG/BMP buffer.
///
/// # Safety
/// `data` must point to at least `data_len` bytes.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_engine_process_encoded(
    engine: *const Engine,
    data: *const u8,
    data_len: usize,
) -> KycResultC {
    let input = buffer(data, data_len, "encoded").map(ImageInput::encoded);
    process_with(engine, input)
}

// ============================================================================
// Utilities
// ============================================================================

/// EXIF orientation (1-8) of a JPEG buffer, 1 when it carries none.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_exif_orientation(data: *const u8, data_len: usize) -> i32 {
    match unsafe { byte_slice(data, data_len, MAX_BUFFER_LEN) } {
        Ok(bytes) => match Engine::exif_orientation(bytes) {
            Ok(orientation) => i32::from(orientation),
            Err(e) => {
                debug!("No EXIF orientation: {}", e);
                i32::from(kyc_verif::exif::DEFAULT_ORIENTATION)
            }
        },
        Err(_) => i32::from(kyc_verif::exif::DEFAULT_ORIENTATION),
    }
}

/// Derive this host's runtime license key. Requires an initialized engine.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_engine_request_runtime_license_key(
    engine: *const Engine,
    raw: bool,
) -> KycResultC {
    match unsafe { engine.as_ref() } {
        Some(engine) => engine.request_runtime_license_key(raw).into(),
        None => KycResultC::error(KycError::NotInitialized, "null engine pointer"),
    }
}

/// Free the strings of a result returned by value.
#[no_mangle]
pub extern "C" fn kyc_result_free(result: KycResultC) {
    unsafe {
        free_cstring(result.phrase);
        free_cstring(result.json);
    }
}

define_version_fn!(kyc_version);

/// Whether `engine` has an active session.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn kyc_engine_is_ready(engine: *const Engine) -> bool {
    unsafe { engine.as_ref() }.is_some_and(Engine::is_ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> CString {
        CString::new(r#"{"assets_folder": "."}"#).unwrap()
    }

    fn text(ptr: *mut c_char) -> String {
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
    }

    #[test]
    fn test_sequential_roundtrip() {
        let engine = kyc_engine_new();
        let init = kyc_engine_init(engine, config().as_ptr(), None, ptr::null_mut());
        assert_eq!(init.code, 0);
        assert_eq!(text(init.phrase), "OK");
        kyc_result_free(init);
        assert!(kyc_engine_is_ready(engine));

        let pixels = [0u8; 12];
        let result = kyc_engine_process_packed(
            engine,
            ImageType::Rgb24 as i32,
            pixels.as_ptr(),
            pixels.len(),
            2,
            2,
            0,
            1,
        );
        assert_eq!(result.code, 0);
        assert_eq!(result.num_vizs, 0);
        assert_eq!(text(result.json), "");
        kyc_result_free(result);

        kyc_result_free(kyc_engine_deinit(engine));
        kyc_engine_free(engine);
    }

    #[test]
    fn test_null_pointers_fail_cleanly() {
        let result = kyc_engine_init(ptr::null(), config().as_ptr(), None, ptr::null_mut());
        assert!(result.code < 0);
        kyc_result_free(result);

        let engine = kyc_engine_new();
        let result = kyc_engine_init(engine, ptr::null(), None, ptr::null_mut());
        assert_eq!(result.code, -3);
        kyc_result_free(result);
        assert!(!kyc_engine_is_ready(engine));

        let result = kyc_engine_process_encoded(engine, ptr::null(), 10);
        assert!(result.code < 0);
        kyc_result_free(result);

        let result = kyc_engine_process_packed(engine, 99, ptr::null(), 0, 1, 1, 0, 1);
        assert_eq!(result.code, -4);
        kyc_result_free(result);

        assert!(!kyc_engine_is_ready(ptr::null()));
        kyc_engine_free(engine);
        kyc_engine_free(ptr::null_mut());
    }

    extern "C" fn on_result(result: *const KycResultC, user_data: *mut c_void) {
        let result = unsafe { &*result };
        assert_eq!(result.code, 0);
        let counter = unsafe { &*(user_data as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_parallel_callback() {
        let counter = AtomicUsize::new(0);
        let engine = kyc_engine_new();
        let init = kyc_engine_init(
            engine,
            config().as_ptr(),
            Some(on_result),
            &counter as *const AtomicUsize as *mut c_void,
        );
        assert_eq!(init.code, 0);
        kyc_result_free(init);

        let y = [0u8; 16];
        let uv = [0u8; 4];
        for _ in 0..5 {
            let ack = kyc_engine_process_planar(
                engine,
                ImageType::Yuv420p as i32,
                y.as_ptr(),
                y.len(),
                uv.as_ptr(),
                uv.len(),
                uv.as_ptr(),
                uv.len(),
                4,
                4,
                0,
                0,
                0,
                0,
                1,
            );
            assert_eq!(ack.code, 1);
            kyc_result_free(ack);
        }

        kyc_result_free(kyc_engine_deinit(engine));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        kyc_engine_free(engine);
    }

    #[test]
    fn test_exif_and_license_helpers() {
        assert_eq!(kyc_exif_orientation(ptr::null(), 0), 1);
        let garbage = b"not a jpeg";
        assert_eq!(kyc_exif_orientation(garbage.as_ptr(), garbage.len()), 1);

        let engine = kyc_engine_new();
        let before = kyc_engine_request_runtime_license_key(engine, true);
        assert_eq!(before.code, -1);
        kyc_result_free(before);

        kyc_result_free(kyc_engine_init(engine, config().as_ptr(), None, ptr::null_mut()));
        let key = kyc_engine_request_runtime_license_key(engine, false);
        assert_eq!(key.code, 0);
        assert!(text(key.json).contains("\"key\""));
        kyc_result_free(key);
        kyc_engine_free(engine);

        let version = unsafe { CStr::from_ptr(kyc_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }
}
