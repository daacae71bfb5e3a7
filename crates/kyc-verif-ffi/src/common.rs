//! Pointer and string helpers shared by the exported functions.
//!
//! Strings returned to C are allocated with `CString::into_raw` and must
//! come back through `kyc_result_free`. NULL is always accepted by the
//! free helpers.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::slice;

/// Convert to an owned C string, replacing interior NULs with `fallback`.
#[inline]
pub fn cstring_new_or_fallback(s: &str, fallback: &'static str) -> *mut c_char {
    CString::new(s)
        .or_else(|_| CString::new(fallback))
        .unwrap_or_default()
        .into_raw()
}

/// # Safety
/// The pointer must have been allocated by `CString::into_raw()` or be null.
#[inline]
pub unsafe fn free_cstring(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// # Safety
/// The pointer must have been allocated by `Box::into_raw()` or be null.
#[inline]
pub unsafe fn free_boxed<T>(ptr: *mut T) {
    if !ptr.is_null() {
        unsafe {
            let _ = Box::from_raw(ptr);
        }
    }
}

/// Borrow a NUL-terminated UTF-8 string.
///
/// # Safety
/// The pointer must be valid and null-terminated, or null.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, &'static str> {
    if ptr.is_null() {
        return Err("null pointer");
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| "invalid UTF-8")
}

/// Borrow a caller buffer, rejecting null and oversized inputs.
///
/// A zero length yields an empty slice even for a null pointer.
///
/// # Safety
/// `ptr` must point to at least `len` readable bytes when non-null.
pub unsafe fn byte_slice<'a>(
    ptr: *const u8,
    len: usize,
    max_len: usize,
) -> Result<&'a [u8], &'static str> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err("null buffer pointer");
    }
    if len > max_len {
        return Err("buffer length exceeds maximum");
    }
    Ok(unsafe { slice::from_raw_parts(ptr, len) })
}

/// Generate an engine free function for a given type.
#[macro_export]
macro_rules! define_engine_free {
    ($fn_name:ident, $engine_type:ty) => {
        #[no_mangle]
        #[allow(clippy::not_unsafe_ptr_arg_deref)]
        pub extern "C" fn $fn_name(ptr: *mut $engine_type) {
            unsafe { $crate::common::free_boxed(ptr) };
        }
    };
}

/// Generate a version function that returns a static C string.
#[macro_export]
macro_rules! define_version_fn {
    ($fn_name:ident) => {
        #[no_mangle]
        pub extern "C" fn $fn_name() -> *const std::os::raw::c_char {
            concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const std::os::raw::c_char
        }
    };
}
