//! Ricoh Theta stream settings.
//!
//! The Theta V and Z1 expose their live equirectangular stream as H.264 over
//! UVC. Two presets match the camera's firmware modes; anything else is a
//! custom geometry that the camera may or may not accept at stream start.

use std::fmt;
use std::time::Duration;

use strum::{EnumString, IntoStaticStr};

pub const USB_VENDOR_RICOH: u16 = 0x05ca;
pub const USB_PRODUCT_THETA_V: u16 = 0x2712;
pub const USB_PRODUCT_THETA_Z1: u16 = 0x2715;

/// Stream preset.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstThetaUvcMode"))]
#[repr(u32)]
pub enum Mode {
    #[strum(serialize = "uhd")]
    #[cfg_attr(feature = "gst", enum_value(name = "3840x1920 at 29.97 fps", nick = "uhd"))]
    Uhd,
    #[strum(serialize = "fhd")]
    #[cfg_attr(feature = "gst", enum_value(name = "1920x960 at 29.97 fps", nick = "fhd"))]
    Fhd,
    #[strum(serialize = "no-mode")]
    #[cfg_attr(feature = "gst", enum_value(name = "Custom geometry", nick = "no-mode"))]
    NoMode,
}

/// Geometry and rate of a preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preset {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Mode {
    pub fn preset(self) -> Option<Preset> {
        match self {
            Mode::Uhd => Some(Preset {
                width: 3840,
                height: 1920,
                fps: 29,
            }),
            Mode::Fhd => Some(Preset {
                width: 1920,
                height: 960,
                fps: 29,
            }),
            Mode::NoMode => None,
        }
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

/// Camera model filter.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstThetaUvcProduct"))]
#[repr(u32)]
pub enum Product {
    #[strum(serialize = "z1")]
    #[cfg_attr(feature = "gst", enum_value(name = "Ricoh Theta Z1", nick = "z1"))]
    Z1,
    #[strum(serialize = "v")]
    #[cfg_attr(feature = "gst", enum_value(name = "Ricoh Theta V", nick = "v"))]
    V,
    #[strum(serialize = "any-product")]
    #[cfg_attr(feature = "gst", enum_value(name = "Any Ricoh Theta", nick = "any-product"))]
    AnyProduct,
}

impl Product {
    pub fn usb_product_id(self) -> Option<u16> {
        match self {
            Product::Z1 => Some(USB_PRODUCT_THETA_Z1),
            Product::V => Some(USB_PRODUCT_THETA_V),
            Product::AnyProduct => None,
        }
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

/// Element properties of `thetauvcsrc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThetaSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub mode: Mode,
    pub product: Product,
    pub serial_number: String,
    pub device_index: u32,
}

impl Default for ThetaSettings {
    fn default() -> Self {
        let mut settings = Self {
            width: 0,
            height: 0,
            fps: 0,
            mode: Mode::NoMode,
            product: Product::AnyProduct,
            serial_number: String::new(),
            device_index: 0,
        };
        settings.set_mode(Mode::Uhd);
        settings
    }
}

impl ThetaSettings {
    /// A custom width leaves preset mode.
    pub fn set_width(&mut self, width: u32) {
        self.width = width;
        self.mode = Mode::NoMode;
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height;
        self.mode = Mode::NoMode;
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps;
        self.mode = Mode::NoMode;
    }

    /// Selecting a preset overwrites geometry and rate; `NoMode` keeps them.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if let Some(preset) = mode.preset() {
            self.width = preset.width;
            self.height = preset.height;
            self.fps = preset.fps;
        }
    }

    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            vendor_id: USB_VENDOR_RICOH,
            product_id: self.product.usb_product_id(),
            serial_number: match self.serial_number.trim() {
                "" => None,
                serial => Some(serial.to_string()),
            },
            index: self.device_index,
        }
    }
}

/// Which USB device to open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
    pub index: u32,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vid={:04x},pid=", self.vendor_id)?;
        match self.product_id {
            Some(pid) => write!(f, "{:04x}", pid)?,
            None => f.write_str("<any>")?,
        }
        write!(
            f,
            ",serial={},index={}",
            self.serial_number.as_deref().unwrap_or("<any>"),
            self.index
        )
    }
}

/// UVC frame intervals are expressed in 100 ns units.
pub fn frame_interval_from_uvc(interval_100ns: u32) -> Duration {
    Duration::from_nanos(u64::from(interval_100ns) * 100)
}

/// Presentation time of a frame relative to the first frame seen.
pub fn presentation_time(sequence: u32, first_sequence: u32, interval: Duration) -> Duration {
    interval.saturating_mul(sequence.wrapping_sub(first_sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_uhd_preset() {
        let settings = ThetaSettings::default();
        assert_eq!(settings.mode, Mode::Uhd);
        assert_eq!((settings.width, settings.height, settings.fps), (3840, 1920, 29));
        assert_eq!(settings.product, Product::AnyProduct);
    }

    #[test]
    fn custom_geometry_leaves_preset_mode() {
        let mut settings = ThetaSettings::default();
        settings.set_height(1440);
        assert_eq!(settings.mode, Mode::NoMode);
        assert_eq!((settings.width, settings.height), (3840, 1440));
    }

    #[test]
    fn preset_overwrites_geometry_but_no_mode_keeps_it() {
        let mut settings = ThetaSettings::default();
        settings.set_mode(Mode::Fhd);
        assert_eq!((settings.width, settings.height, settings.fps), (1920, 960, 29));
        settings.set_fps(15);
        settings.set_mode(Mode::NoMode);
        assert_eq!((settings.width, settings.height, settings.fps), (1920, 960, 15));
    }

    #[test]
    fn selector_describes_wildcards() {
        let settings = ThetaSettings::default();
        assert_eq!(
            settings.selector().to_string(),
            "vid=05ca,pid=<any>,serial=<any>,index=0"
        );

        let settings = ThetaSettings {
            product: Product::Z1,
            serial_number: " 10010104 ".to_string(),
            device_index: 1,
            ..ThetaSettings::default()
        };
        assert_eq!(
            settings.selector().to_string(),
            "vid=05ca,pid=2715,serial=10010104,index=1"
        );
    }

    #[test]
    fn nicks_parse_back() {
        assert_eq!("no-mode".parse::<Mode>().ok(), Some(Mode::NoMode));
        assert_eq!("any-product".parse::<Product>().ok(), Some(Product::AnyProduct));
        assert_eq!(Product::V.nick(), "v");
        assert!("4k".parse::<Mode>().is_err());
    }

    #[test]
    fn timestamps_follow_uvc_sequence() {
        let interval = frame_interval_from_uvc(333_667);
        assert_eq!(interval, Duration::from_nanos(33_366_700));
        assert_eq!(presentation_time(42, 40, interval), interval * 2);
        assert_eq!(presentation_time(40, 40, interval), Duration::ZERO);
    }
}
