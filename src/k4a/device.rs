//! Safe wrapper over the Azure Kinect sensor SDK (`libk4a`).
//!
//! Only the calls the source needs are declared: device enumeration and
//! lifetime, camera start/stop, blocking capture with a timeout and image
//! access. SDK handles are reference counted and thread safe, so `Device`
//! may be shared between the state-change and streaming threads.

use std::ffi::{c_char, CStr};
use std::fmt;
use std::ptr::{self, NonNull};
use std::time::Duration;

use super::settings::{ColorFormat, ColorResolution, DepthMode, DepthSensor, DeviceConfig, FpsMode};

/// A libk4a call that reported failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct K4aError {
    pub call: &'static str,
    pub code: i32,
}

impl K4aError {
    fn check(call: &'static str, code: sys::k4a_result_t) -> Result<(), K4aError> {
        if code == sys::K4A_RESULT_SUCCEEDED {
            Ok(())
        } else {
            Err(K4aError { call, code })
        }
    }
}

impl fmt::Display for K4aError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (k4a result {})", self.call, self.code)
    }
}

impl std::error::Error for K4aError {}

pub fn installed_count() -> u32 {
    unsafe { sys::k4a_device_get_installed_count() }
}

/// Host monotonic clock, the clock libk4a stamps system timestamps with.
pub fn monotonic_now() -> Duration {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out pointer; CLOCK_MONOTONIC is always available on Linux.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    Duration::new(now.tv_sec.max(0) as u64, now.tv_nsec.clamp(0, 999_999_999) as u32)
}

pub struct Device {
    raw: NonNull<sys::k4a_device_t_>,
    index: u32,
}

// The SDK locks internally; handles may move and be shared across threads.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl Device {
    pub fn open(index: u32) -> Result<Self, K4aError> {
        let mut raw = ptr::null_mut();
        K4aError::check("k4a_device_open", unsafe { sys::k4a_device_open(index, &mut raw) })?;
        let raw = NonNull::new(raw).ok_or(K4aError {
            call: "k4a_device_open",
            code: sys::K4A_RESULT_FAILED,
        })?;
        Ok(Self { raw, index })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn serial_number(&self) -> Result<String, K4aError> {
        let mut size = 0usize;
        let probe = unsafe {
            sys::k4a_device_get_serialnum(self.raw.as_ptr(), ptr::null_mut(), &mut size)
        };
        if probe != sys::K4A_BUFFER_RESULT_TOO_SMALL || size == 0 {
            return Err(K4aError {
                call: "k4a_device_get_serialnum",
                code: probe,
            });
        }
        let mut serial = vec![0 as c_char; size];
        let result = unsafe {
            sys::k4a_device_get_serialnum(self.raw.as_ptr(), serial.as_mut_ptr(), &mut size)
        };
        if result != sys::K4A_BUFFER_RESULT_SUCCEEDED {
            return Err(K4aError {
                call: "k4a_device_get_serialnum",
                code: result,
            });
        }
        // The SDK NUL-terminates within `size`; guard against it not doing so.
        if let Some(last) = serial.last_mut() {
            *last = 0;
        }
        let serial = unsafe { CStr::from_ptr(serial.as_ptr()) };
        Ok(serial.to_string_lossy().into_owned())
    }

    pub fn start_cameras(&self, config: &DeviceConfig) -> Result<(), K4aError> {
        let raw_config = sys::k4a_device_configuration_t::from(config);
        K4aError::check("k4a_device_start_cameras", unsafe {
            sys::k4a_device_start_cameras(self.raw.as_ptr(), &raw_config)
        })
    }

    pub fn stop_cameras(&self) {
        unsafe { sys::k4a_device_stop_cameras(self.raw.as_ptr()) }
    }

    /// Waits up to `timeout` for the next capture; `Ok(None)` on timeout.
    pub fn capture(&self, timeout: Duration) -> Result<Option<Capture>, K4aError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut raw = ptr::null_mut();
        let result = unsafe { sys::k4a_device_get_capture(self.raw.as_ptr(), &mut raw, timeout_ms) };
        match result {
            sys::K4A_WAIT_RESULT_SUCCEEDED => Ok(NonNull::new(raw).map(|raw| Capture { raw })),
            sys::K4A_WAIT_RESULT_TIMEOUT => Ok(None),
            code => Err(K4aError {
                call: "k4a_device_get_capture",
                code,
            }),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { sys::k4a_device_close(self.raw.as_ptr()) }
    }
}

/// One synchronised set of images.
pub struct Capture {
    raw: NonNull<sys::k4a_capture_t_>,
}

unsafe impl Send for Capture {}

impl Capture {
    pub fn color(&self) -> Option<Image> {
        Image::wrap(unsafe { sys::k4a_capture_get_color_image(self.raw.as_ptr()) })
    }

    pub fn ir(&self) -> Option<Image> {
        Image::wrap(unsafe { sys::k4a_capture_get_ir_image(self.raw.as_ptr()) })
    }

    pub fn depth(&self) -> Option<Image> {
        Image::wrap(unsafe { sys::k4a_capture_get_depth_image(self.raw.as_ptr()) })
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        unsafe { sys::k4a_capture_release(self.raw.as_ptr()) }
    }
}

pub struct Image {
    raw: NonNull<sys::k4a_image_t_>,
}

unsafe impl Send for Image {}

impl Image {
    fn wrap(raw: sys::k4a_image_t) -> Option<Self> {
        NonNull::new(raw).map(|raw| Self { raw })
    }

    pub fn data(&self) -> &[u8] {
        let buffer = unsafe { sys::k4a_image_get_buffer(self.raw.as_ptr()) };
        let size = unsafe { sys::k4a_image_get_size(self.raw.as_ptr()) };
        if buffer.is_null() || size == 0 {
            return &[];
        }
        // SAFETY: the SDK keeps the buffer alive until the image is released.
        unsafe { std::slice::from_raw_parts(buffer, size) }
    }

    pub fn width(&self) -> usize {
        unsafe { sys::k4a_image_get_width_pixels(self.raw.as_ptr()) }.max(0) as usize
    }

    pub fn height(&self) -> usize {
        unsafe { sys::k4a_image_get_height_pixels(self.raw.as_ptr()) }.max(0) as usize
    }

    pub fn stride(&self) -> usize {
        unsafe { sys::k4a_image_get_stride_bytes(self.raw.as_ptr()) }.max(0) as usize
    }

    /// Host monotonic time at which the image was read from USB.
    pub fn system_timestamp(&self) -> Duration {
        Duration::from_nanos(unsafe { sys::k4a_image_get_system_timestamp_nsec(self.raw.as_ptr()) })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { sys::k4a_image_release(self.raw.as_ptr()) }
    }
}

impl From<&DeviceConfig> for sys::k4a_device_configuration_t {
    fn from(config: &DeviceConfig) -> Self {
        let (color_format, color_resolution) = match config.color {
            Some((format, resolution)) => (
                match format {
                    ColorFormat::Bgra32 => sys::K4A_IMAGE_FORMAT_COLOR_BGRA32,
                    ColorFormat::Yuy2 => sys::K4A_IMAGE_FORMAT_COLOR_YUY2,
                    ColorFormat::Nv12 => sys::K4A_IMAGE_FORMAT_COLOR_NV12,
                },
                match resolution {
                    ColorResolution::Res720P => sys::K4A_COLOR_RESOLUTION_720P,
                    ColorResolution::Res1080P => sys::K4A_COLOR_RESOLUTION_1080P,
                    ColorResolution::Res1440P => sys::K4A_COLOR_RESOLUTION_1440P,
                    ColorResolution::Res1536P => sys::K4A_COLOR_RESOLUTION_1536P,
                    ColorResolution::Res2160P => sys::K4A_COLOR_RESOLUTION_2160P,
                    ColorResolution::Res3072P => sys::K4A_COLOR_RESOLUTION_3072P,
                },
            ),
            None => (sys::K4A_IMAGE_FORMAT_COLOR_MJPG, sys::K4A_COLOR_RESOLUTION_OFF),
        };
        let depth_mode = match config.depth {
            DepthSensor::Off => sys::K4A_DEPTH_MODE_OFF,
            DepthSensor::PassiveIr => sys::K4A_DEPTH_MODE_PASSIVE_IR,
            DepthSensor::Depth(DepthMode::NfovBinned) => sys::K4A_DEPTH_MODE_NFOV_2X2BINNED,
            DepthSensor::Depth(DepthMode::NfovUnbinned) => sys::K4A_DEPTH_MODE_NFOV_UNBINNED,
            DepthSensor::Depth(DepthMode::WfovBinned) => sys::K4A_DEPTH_MODE_WFOV_2X2BINNED,
            DepthSensor::Depth(DepthMode::WfovUnbinned) => sys::K4A_DEPTH_MODE_WFOV_UNBINNED,
        };
        let camera_fps = match config.fps {
            FpsMode::Fps5 => sys::K4A_FRAMES_PER_SECOND_5,
            FpsMode::Fps15 => sys::K4A_FRAMES_PER_SECOND_15,
            FpsMode::Fps30 => sys::K4A_FRAMES_PER_SECOND_30,
        };
        Self {
            color_format,
            color_resolution,
            depth_mode,
            camera_fps,
            synchronized_images_only: false,
            depth_delay_off_color_usec: 0,
            wired_sync_mode: sys::K4A_WIRED_SYNC_MODE_STANDALONE,
            subordinate_delay_off_master_usec: 0,
            disable_streaming_indicator: false,
        }
    }
}

#[allow(non_camel_case_types)]
mod sys {
    use std::ffi::{c_char, c_int};

    pub type k4a_result_t = c_int;
    pub const K4A_RESULT_SUCCEEDED: k4a_result_t = 0;
    pub const K4A_RESULT_FAILED: k4a_result_t = 1;

    pub type k4a_buffer_result_t = c_int;
    pub const K4A_BUFFER_RESULT_SUCCEEDED: k4a_buffer_result_t = 0;
    pub const K4A_BUFFER_RESULT_TOO_SMALL: k4a_buffer_result_t = 2;

    pub type k4a_wait_result_t = c_int;
    pub const K4A_WAIT_RESULT_SUCCEEDED: k4a_wait_result_t = 0;
    pub const K4A_WAIT_RESULT_TIMEOUT: k4a_wait_result_t = 2;

    pub type k4a_image_format_t = c_int;
    pub const K4A_IMAGE_FORMAT_COLOR_MJPG: k4a_image_format_t = 0;
    pub const K4A_IMAGE_FORMAT_COLOR_NV12: k4a_image_format_t = 1;
    pub const K4A_IMAGE_FORMAT_COLOR_YUY2: k4a_image_format_t = 2;
    pub const K4A_IMAGE_FORMAT_COLOR_BGRA32: k4a_image_format_t = 3;

    pub type k4a_color_resolution_t = c_int;
    pub const K4A_COLOR_RESOLUTION_OFF: k4a_color_resolution_t = 0;
    pub const K4A_COLOR_RESOLUTION_720P: k4a_color_resolution_t = 1;
    pub const K4A_COLOR_RESOLUTION_1080P: k4a_color_resolution_t = 2;
    pub const K4A_COLOR_RESOLUTION_1440P: k4a_color_resolution_t = 3;
    pub const K4A_COLOR_RESOLUTION_1536P: k4a_color_resolution_t = 4;
    pub const K4A_COLOR_RESOLUTION_2160P: k4a_color_resolution_t = 5;
    pub const K4A_COLOR_RESOLUTION_3072P: k4a_color_resolution_t = 6;

    pub type k4a_depth_mode_t = c_int;
    pub const K4A_DEPTH_MODE_OFF: k4a_depth_mode_t = 0;
    pub const K4A_DEPTH_MODE_NFOV_2X2BINNED: k4a_depth_mode_t = 1;
    pub const K4A_DEPTH_MODE_NFOV_UNBINNED: k4a_depth_mode_t = 2;
    pub const K4A_DEPTH_MODE_WFOV_2X2BINNED: k4a_depth_mode_t = 3;
    pub const K4A_DEPTH_MODE_WFOV_UNBINNED: k4a_depth_mode_t = 4;
    pub const K4A_DEPTH_MODE_PASSIVE_IR: k4a_depth_mode_t = 5;

    pub type k4a_fps_t = c_int;
    pub const K4A_FRAMES_PER_SECOND_5: k4a_fps_t = 0;
    pub const K4A_FRAMES_PER_SECOND_15: k4a_fps_t = 1;
    pub const K4A_FRAMES_PER_SECOND_30: k4a_fps_t = 2;

    pub type k4a_wired_sync_mode_t = c_int;
    pub const K4A_WIRED_SYNC_MODE_STANDALONE: k4a_wired_sync_mode_t = 0;

    #[repr(C)]
    pub struct k4a_device_t_ {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct k4a_capture_t_ {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct k4a_image_t_ {
        _private: [u8; 0],
    }

    pub type k4a_device_t = *mut k4a_device_t_;
    pub type k4a_capture_t = *mut k4a_capture_t_;
    pub type k4a_image_t = *mut k4a_image_t_;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct k4a_device_configuration_t {
        pub color_format: k4a_image_format_t,
        pub color_resolution: k4a_color_resolution_t,
        pub depth_mode: k4a_depth_mode_t,
        pub camera_fps: k4a_fps_t,
        pub synchronized_images_only: bool,
        pub depth_delay_off_color_usec: i32,
        pub wired_sync_mode: k4a_wired_sync_mode_t,
        pub subordinate_delay_off_master_usec: u32,
        pub disable_streaming_indicator: bool,
    }

    #[link(name = "k4a")]
    extern "C" {
        pub fn k4a_device_get_installed_count() -> u32;
        pub fn k4a_device_open(index: u32, device_handle: *mut k4a_device_t) -> k4a_result_t;
        pub fn k4a_device_close(device_handle: k4a_device_t);
        pub fn k4a_device_get_serialnum(
            device_handle: k4a_device_t,
            serial_number: *mut c_char,
            serial_number_size: *mut usize,
        ) -> k4a_buffer_result_t;
        pub fn k4a_device_start_cameras(
            device_handle: k4a_device_t,
            config: *const k4a_device_configuration_t,
        ) -> k4a_result_t;
        pub fn k4a_device_stop_cameras(device_handle: k4a_device_t);
        pub fn k4a_device_get_capture(
            device_handle: k4a_device_t,
            capture_handle: *mut k4a_capture_t,
            timeout_in_ms: i32,
        ) -> k4a_wait_result_t;

        pub fn k4a_capture_get_color_image(capture_handle: k4a_capture_t) -> k4a_image_t;
        pub fn k4a_capture_get_ir_image(capture_handle: k4a_capture_t) -> k4a_image_t;
        pub fn k4a_capture_get_depth_image(capture_handle: k4a_capture_t) -> k4a_image_t;
        pub fn k4a_capture_release(capture_handle: k4a_capture_t);

        pub fn k4a_image_get_buffer(image_handle: k4a_image_t) -> *mut u8;
        pub fn k4a_image_get_size(image_handle: k4a_image_t) -> usize;
        pub fn k4a_image_get_width_pixels(image_handle: k4a_image_t) -> c_int;
        pub fn k4a_image_get_height_pixels(image_handle: k4a_image_t) -> c_int;
        pub fn k4a_image_get_stride_bytes(image_handle: k4a_image_t) -> c_int;
        pub fn k4a_image_get_system_timestamp_nsec(image_handle: k4a_image_t) -> u64;
        pub fn k4a_image_release(image_handle: k4a_image_t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_unbinned_maps_to_wide_sdk_mode() {
        let config = DeviceConfig {
            color: None,
            depth: DepthSensor::Depth(DepthMode::WfovUnbinned),
            fps: FpsMode::Fps15,
        };
        let raw = sys::k4a_device_configuration_t::from(&config);
        assert_eq!(raw.depth_mode, sys::K4A_DEPTH_MODE_WFOV_UNBINNED);
        assert_eq!(raw.camera_fps, sys::K4A_FRAMES_PER_SECOND_15);
        assert_eq!(raw.color_resolution, sys::K4A_COLOR_RESOLUTION_OFF);
    }

    #[test]
    fn colour_config_turns_depth_off() {
        let config = DeviceConfig {
            color: Some((ColorFormat::Bgra32, ColorResolution::Res2160P)),
            depth: DepthSensor::Off,
            fps: FpsMode::Fps30,
        };
        let raw = sys::k4a_device_configuration_t::from(&config);
        assert_eq!(raw.color_format, sys::K4A_IMAGE_FORMAT_COLOR_BGRA32);
        assert_eq!(raw.color_resolution, sys::K4A_COLOR_RESOLUTION_2160P);
        assert_eq!(raw.depth_mode, sys::K4A_DEPTH_MODE_OFF);
        assert_eq!(raw.wired_sync_mode, sys::K4A_WIRED_SYNC_MODE_STANDALONE);
    }

    #[test]
    fn monotonic_clock_advances() {
        let first = monotonic_now();
        let second = monotonic_now();
        assert!(second >= first);
    }
}
