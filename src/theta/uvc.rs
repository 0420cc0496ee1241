//! Safe wrapper over the Theta fork of libuvc.
//!
//! Ownership mirrors the C API: a `Context` owns the libusb session, each
//! `Device` holds a reference on the context, a `DeviceHandle` keeps its
//! device alive and a `Stream` owns the handle it streams from. Dropping a
//! `Stream` stops streaming before the callback state is freed.

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::Duration;

use super::settings::{frame_interval_from_uvc, DeviceSelector};

/// Error code returned by libuvc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UvcError(pub i32);

impl UvcError {
    fn check(code: sys::uvc_error_t) -> Result<(), UvcError> {
        if code == sys::UVC_SUCCESS {
            Ok(())
        } else {
            Err(UvcError(code))
        }
    }
}

impl fmt::Display for UvcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: uvc_strerror returns a static string for any code.
        let message = unsafe { sys::uvc_strerror(self.0) };
        if message.is_null() {
            return write!(f, "libuvc error {}", self.0);
        }
        let message = unsafe { CStr::from_ptr(message) };
        write!(f, "{} ({})", message.to_string_lossy(), self.0)
    }
}

impl std::error::Error for UvcError {}

struct ContextInner {
    raw: NonNull<sys::uvc_context_t>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        unsafe { sys::uvc_exit(self.raw.as_ptr()) }
    }
}

// libuvc serialises access to the context internally.
unsafe impl Send for ContextInner {}
unsafe impl Sync for ContextInner {}

pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Result<Self, UvcError> {
        let mut raw = ptr::null_mut();
        UvcError::check(unsafe { sys::uvc_init(&mut raw, ptr::null_mut()) })?;
        let raw = NonNull::new(raw).ok_or(UvcError(sys::UVC_ERROR_OTHER))?;
        Ok(Self {
            inner: Arc::new(ContextInner { raw }),
        })
    }

    /// Lists devices matching vendor, product and serial filters in bus order.
    pub fn find_devices(&self, selector: &DeviceSelector) -> Result<Vec<Device>, UvcError> {
        let serial = selector
            .serial_number
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| UvcError(sys::UVC_ERROR_INVALID_PARAM))?;
        let mut list: *mut *mut sys::uvc_device_t = ptr::null_mut();
        let code = unsafe {
            sys::uvc_find_devices(
                self.inner.raw.as_ptr(),
                &mut list,
                i32::from(selector.vendor_id),
                selector.product_id.map(i32::from).unwrap_or(0),
                serial.as_ref().map(|sn| sn.as_ptr()).unwrap_or(ptr::null()),
            )
        };
        if code == sys::UVC_ERROR_NO_DEVICE {
            return Ok(Vec::new());
        }
        UvcError::check(code)?;
        if list.is_null() {
            return Ok(Vec::new());
        }

        let mut devices = Vec::new();
        let mut cursor = list;
        // The list is NULL terminated; each entry already carries a reference.
        unsafe {
            while let Some(raw) = NonNull::new(*cursor) {
                devices.push(Device {
                    raw,
                    _context: Arc::clone(&self.inner),
                });
                cursor = cursor.add(1);
            }
            libc::free(list as *mut c_void);
        }
        Ok(devices)
    }

    /// Picks the `selector.index`th matching device.
    pub fn select(&self, selector: &DeviceSelector) -> Result<Option<Device>, UvcError> {
        Ok(self
            .find_devices(selector)?
            .into_iter()
            .nth(selector.index as usize))
    }
}

pub struct Device {
    raw: NonNull<sys::uvc_device_t>,
    _context: Arc<ContextInner>,
}

impl Device {
    pub fn open(self: &Arc<Self>) -> Result<DeviceHandle, UvcError> {
        let mut raw = ptr::null_mut();
        UvcError::check(unsafe { sys::uvc_open(self.raw.as_ptr(), &mut raw) })?;
        let raw = NonNull::new(raw).ok_or(UvcError(sys::UVC_ERROR_OTHER))?;
        Ok(DeviceHandle {
            raw,
            _device: Arc::clone(self),
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { sys::uvc_unref_device(self.raw.as_ptr()) }
    }
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

pub struct DeviceHandle {
    raw: NonNull<sys::uvc_device_handle_t>,
    _device: Arc<Device>,
}

impl DeviceHandle {
    /// Negotiates an H.264 stream control for the requested geometry.
    pub fn h264_stream_ctrl(&self, width: u32, height: u32, fps: u32) -> Result<StreamCtrl, UvcError> {
        let to_int = |value: u32| i32::try_from(value).map_err(|_| UvcError(sys::UVC_ERROR_NOT_SUPPORTED));
        let mut raw = sys::uvc_stream_ctrl_t::default();
        UvcError::check(unsafe {
            sys::uvc_get_stream_ctrl_format_size(
                self.raw.as_ptr(),
                &mut raw,
                sys::UVC_FRAME_FORMAT_H264,
                to_int(width)?,
                to_int(height)?,
                to_int(fps)?,
            )
        })?;
        Ok(StreamCtrl { raw })
    }

    /// Starts isochronous streaming; `callback` runs on libusb's event thread.
    pub fn start_streaming<F>(self, mut ctrl: StreamCtrl, callback: F) -> Result<Stream, UvcError>
    where
        F: FnMut(&Frame<'_>) + Send + 'static,
    {
        let callback: FrameCallback = Box::new(callback);
        let mut callback = Box::new(callback);
        let user_ptr = &mut *callback as *mut FrameCallback as *mut c_void;
        UvcError::check(unsafe {
            sys::uvc_start_streaming(
                self.raw.as_ptr(),
                &mut ctrl.raw,
                Some(on_frame),
                user_ptr,
                0,
            )
        })?;
        Ok(Stream {
            handle: self,
            _callback: callback,
        })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        unsafe { sys::uvc_close(self.raw.as_ptr()) }
    }
}

unsafe impl Send for DeviceHandle {}

/// Negotiated stream parameters.
#[derive(Clone, Copy)]
pub struct StreamCtrl {
    raw: sys::uvc_stream_ctrl_t,
}

impl StreamCtrl {
    pub fn frame_interval(&self) -> Duration {
        frame_interval_from_uvc(self.raw.dwFrameInterval)
    }
}

impl fmt::Debug for StreamCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCtrl")
            .field("format_index", &self.raw.bFormatIndex)
            .field("frame_index", &self.raw.bFrameIndex)
            .field("frame_interval", &self.frame_interval())
            .field("max_frame_size", &self.raw.dwMaxVideoFrameSize)
            .finish()
    }
}

type FrameCallback = Box<dyn FnMut(&Frame<'_>) + Send>;

/// A running stream. Dropping it stops streaming.
pub struct Stream {
    handle: DeviceHandle,
    _callback: Box<FrameCallback>,
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Blocks until the callback thread has returned; the box is freed afterwards.
        unsafe { sys::uvc_stop_streaming(self.handle.raw.as_ptr()) }
    }
}

/// A frame borrowed for the duration of the callback.
pub struct Frame<'a> {
    raw: &'a sys::uvc_frame_t,
}

impl Frame<'_> {
    pub fn data(&self) -> &[u8] {
        if self.raw.data.is_null() || self.raw.data_bytes == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.raw.data as *const u8, self.raw.data_bytes) }
    }

    pub fn sequence(&self) -> u32 {
        self.raw.sequence
    }
}

unsafe extern "C" fn on_frame(frame: *mut sys::uvc_frame_t, user_ptr: *mut c_void) {
    let (Some(frame), Some(callback)) = (frame.as_ref(), (user_ptr as *mut FrameCallback).as_mut()) else {
        return;
    };
    // Unwinding across the C boundary is undefined behaviour.
    let _ = catch_unwind(AssertUnwindSafe(|| callback(&Frame { raw: frame })));
}

#[allow(non_camel_case_types, non_snake_case, dead_code)]
mod sys {
    use std::ffi::{c_char, c_int, c_void};

    pub type uvc_error_t = c_int;
    pub const UVC_SUCCESS: uvc_error_t = 0;
    pub const UVC_ERROR_INVALID_PARAM: uvc_error_t = -2;
    pub const UVC_ERROR_NO_DEVICE: uvc_error_t = -4;
    pub const UVC_ERROR_NOT_SUPPORTED: uvc_error_t = -12;
    pub const UVC_ERROR_OTHER: uvc_error_t = -99;

    // `enum uvc_frame_format` in libuvc-theta's include/libuvc/libuvc.h:
    // UNKNOWN and ANY both alias 0, so counting restarts at UNCOMPRESSED = 1.
    pub type uvc_frame_format = c_int;
    pub const UVC_FRAME_FORMAT_ANY: uvc_frame_format = 0;
    pub const UVC_FRAME_FORMAT_UNCOMPRESSED: uvc_frame_format = 1;
    pub const UVC_FRAME_FORMAT_MJPEG: uvc_frame_format = 7;
    pub const UVC_FRAME_FORMAT_H264: uvc_frame_format = 8;

    #[repr(C)]
    pub struct uvc_context_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct uvc_device_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct uvc_device_handle_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    pub struct uvc_stream_ctrl_t {
        pub bmHint: u16,
        pub bFormatIndex: u8,
        pub bFrameIndex: u8,
        pub dwFrameInterval: u32,
        pub wKeyFrameRate: u16,
        pub wPFrameRate: u16,
        pub wCompQuality: u16,
        pub wCompWindowSize: u16,
        pub wDelay: u16,
        pub dwMaxVideoFrameSize: u32,
        pub dwMaxPayloadTransferSize: u32,
        pub dwClockFrequency: u32,
        pub bmFramingInfo: u8,
        pub bPreferredVersion: u8,
        pub bMinVersion: u8,
        pub bMaxVersion: u8,
        pub bInterfaceNumber: u8,
    }

    /// Leading fields of `uvc_frame`. Only ever read through a library-owned pointer.
    #[repr(C)]
    pub struct uvc_frame_t {
        pub data: *mut c_void,
        pub data_bytes: usize,
        pub width: u32,
        pub height: u32,
        pub frame_format: uvc_frame_format,
        pub step: usize,
        pub sequence: u32,
    }

    pub type uvc_frame_callback_t = unsafe extern "C" fn(frame: *mut uvc_frame_t, user_ptr: *mut c_void);

    #[link(name = "uvc")]
    #[link(name = "usb-1.0")]
    extern "C" {
        pub fn uvc_init(ctx: *mut *mut uvc_context_t, usb_ctx: *mut c_void) -> uvc_error_t;
        pub fn uvc_exit(ctx: *mut uvc_context_t);
        pub fn uvc_find_devices(
            ctx: *mut uvc_context_t,
            devs: *mut *mut *mut uvc_device_t,
            vid: c_int,
            pid: c_int,
            sn: *const c_char,
        ) -> uvc_error_t;
        pub fn uvc_unref_device(dev: *mut uvc_device_t);
        pub fn uvc_open(dev: *mut uvc_device_t, devh: *mut *mut uvc_device_handle_t) -> uvc_error_t;
        pub fn uvc_close(devh: *mut uvc_device_handle_t);
        pub fn uvc_get_stream_ctrl_format_size(
            devh: *mut uvc_device_handle_t,
            ctrl: *mut uvc_stream_ctrl_t,
            format: uvc_frame_format,
            width: c_int,
            height: c_int,
            fps: c_int,
        ) -> uvc_error_t;
        pub fn uvc_start_streaming(
            devh: *mut uvc_device_handle_t,
            ctrl: *mut uvc_stream_ctrl_t,
            cb: Option<uvc_frame_callback_t>,
            user_ptr: *mut c_void,
            flags: u8,
        ) -> uvc_error_t;
        pub fn uvc_stop_streaming(devh: *mut uvc_device_handle_t);
        pub fn uvc_strerror(err: uvc_error_t) -> *const c_char;
    }
}

#[cfg(test)]
mod tests {
    use super::sys;

    #[test]
    fn h264_follows_mjpeg_after_aliased_any() {
        assert_eq!(sys::UVC_FRAME_FORMAT_ANY, 0);
        assert_eq!(sys::UVC_FRAME_FORMAT_UNCOMPRESSED, sys::UVC_FRAME_FORMAT_ANY + 1);
        assert_eq!(sys::UVC_FRAME_FORMAT_H264, sys::UVC_FRAME_FORMAT_MJPEG + 1);
        assert_eq!(sys::UVC_FRAME_FORMAT_H264, 8);
    }
}
