//! Azure Kinect stream settings.
//!
//! The Kinect streams one of three image kinds per `k4asrc` instance: colour,
//! passive infrared or depth. These tables hold the sensor geometry for each
//! SDK mode and turn element properties into a device configuration.

use std::time::Duration;

use anyhow::{anyhow, Result};
use strum::{EnumString, IntoStaticStr};

/// Passive IR always streams the full wide field of view.
pub const IR_PASSIVE_RESOLUTION: (i32, i32) = (1024, 1024);

pub const DEFAULT_CAPTURE_TIMEOUT_MS: u32 = 1000;

static COLOR_FORMATS: [&str; 3] = [
    ColorFormat::Bgra32.name(),
    ColorFormat::Yuy2.name(),
    ColorFormat::Nv12.name(),
];
static GRAY_FORMATS: [&str; 1] = ["GRAY16_LE"];

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstK4aFpsMode"))]
#[repr(u32)]
pub enum FpsMode {
    #[strum(serialize = "fps5")]
    #[cfg_attr(feature = "gst", enum_value(name = "5 frames per second", nick = "fps5"))]
    Fps5,
    #[strum(serialize = "fps15")]
    #[cfg_attr(feature = "gst", enum_value(name = "15 frames per second", nick = "fps15"))]
    Fps15,
    #[strum(serialize = "fps30")]
    #[cfg_attr(feature = "gst", enum_value(name = "30 frames per second", nick = "fps30"))]
    Fps30,
}

impl FpsMode {
    pub fn fps(self) -> i32 {
        match self {
            FpsMode::Fps5 => 5,
            FpsMode::Fps15 => 15,
            FpsMode::Fps30 => 30,
        }
    }

    /// Caps framerate as numerator/denominator.
    pub fn framerate(self) -> (i32, i32) {
        (self.fps() * 1000, 1001)
    }

    pub fn frame_duration(self) -> Duration {
        Duration::from_secs(1001) / (self.fps() as u32 * 1000)
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstK4aColorResolution"))]
#[repr(u32)]
pub enum ColorResolution {
    #[strum(serialize = "720p")]
    #[cfg_attr(feature = "gst", enum_value(name = "1280x720", nick = "720p"))]
    Res720P,
    #[strum(serialize = "1080p")]
    #[cfg_attr(feature = "gst", enum_value(name = "1920x1080", nick = "1080p"))]
    Res1080P,
    #[strum(serialize = "1440p")]
    #[cfg_attr(feature = "gst", enum_value(name = "2560x1440", nick = "1440p"))]
    Res1440P,
    #[strum(serialize = "1536p")]
    #[cfg_attr(feature = "gst", enum_value(name = "2048x1536", nick = "1536p"))]
    Res1536P,
    #[strum(serialize = "2160p")]
    #[cfg_attr(feature = "gst", enum_value(name = "3840x2160", nick = "2160p"))]
    Res2160P,
    #[strum(serialize = "3072p")]
    #[cfg_attr(feature = "gst", enum_value(name = "4096x3072", nick = "3072p"))]
    Res3072P,
}

impl ColorResolution {
    pub fn dimensions(self) -> (i32, i32) {
        match self {
            Self::Res720P => (1280, 720),
            Self::Res1080P => (1920, 1080),
            Self::Res1440P => (2560, 1440),
            Self::Res1536P => (2048, 1536),
            Self::Res2160P => (3840, 2160),
            Self::Res3072P => (4096, 3072),
        }
    }

    /// The 4096x3072 colour mode tops out at 15 fps.
    pub fn supports(self, fps: FpsMode) -> bool {
        !(self == Self::Res3072P && fps == FpsMode::Fps30)
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstK4aDepthMode"))]
#[repr(u32)]
pub enum DepthMode {
    #[strum(serialize = "nfov-binned")]
    #[cfg_attr(feature = "gst", enum_value(name = "Narrow field of view, 2x2 binned", nick = "nfov-binned"))]
    NfovBinned,
    #[strum(serialize = "nfov-unbinned")]
    #[cfg_attr(feature = "gst", enum_value(name = "Narrow field of view, unbinned", nick = "nfov-unbinned"))]
    NfovUnbinned,
    #[strum(serialize = "wfov-binned")]
    #[cfg_attr(feature = "gst", enum_value(name = "Wide field of view, 2x2 binned", nick = "wfov-binned"))]
    WfovBinned,
    #[strum(serialize = "wfov-unbinned")]
    #[cfg_attr(feature = "gst", enum_value(name = "Wide field of view, unbinned", nick = "wfov-unbinned"))]
    WfovUnbinned,
}

impl DepthMode {
    pub fn dimensions(self) -> (i32, i32) {
        match self {
            Self::NfovBinned => (320, 288),
            Self::NfovUnbinned => (640, 576),
            Self::WfovBinned => (512, 512),
            Self::WfovUnbinned => (1024, 1024),
        }
    }

    /// The wide unbinned mode cannot run at 30 fps.
    pub fn supports(self, fps: FpsMode) -> bool {
        !(self == Self::WfovUnbinned && fps == FpsMode::Fps30)
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

/// Which image of a capture the element streams.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "gst", derive(glib::Enum))]
#[cfg_attr(feature = "gst", enum_type(name = "GstK4aMode"))]
#[repr(u32)]
pub enum Mode {
    #[strum(serialize = "color")]
    #[cfg_attr(feature = "gst", enum_value(name = "Colour camera", nick = "color"))]
    Color,
    #[strum(serialize = "ir")]
    #[cfg_attr(feature = "gst", enum_value(name = "Passive infrared", nick = "ir"))]
    Ir,
    #[strum(serialize = "depth")]
    #[cfg_attr(feature = "gst", enum_value(name = "Depth", nick = "depth"))]
    Depth,
}

impl Mode {
    /// Raw video format names offered in this mode, preferred first.
    pub fn formats(self) -> &'static [&'static str] {
        match self {
            Mode::Color => &COLOR_FORMATS,
            Mode::Ir | Mode::Depth => &GRAY_FORMATS,
        }
    }

    pub fn nick(self) -> &'static str {
        self.into()
    }
}

/// Colour camera pixel formats that map one to one onto raw video formats.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ColorFormat {
    Bgra32,
    Yuy2,
    Nv12,
}

impl ColorFormat {
    pub const fn name(self) -> &'static str {
        match self {
            ColorFormat::Bgra32 => "BGRA",
            ColorFormat::Yuy2 => "YUY2",
            ColorFormat::Nv12 => "NV12",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [ColorFormat::Bgra32, ColorFormat::Yuy2, ColorFormat::Nv12]
            .into_iter()
            .find(|format| format.name() == name)
    }
}

/// What the depth sensor runs as.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DepthSensor {
    Off,
    Depth(DepthMode),
    PassiveIr,
}

/// Device configuration handed to the SDK when the cameras start.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct DeviceConfig {
    pub color: Option<(ColorFormat, ColorResolution)>,
    pub depth: DepthSensor,
    pub fps: FpsMode,
}

/// Element properties of `k4asrc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K4aSettings {
    pub fps: FpsMode,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub mode: Mode,
    pub device_index: u32,
    pub capture_timeout_ms: u32,
}

impl Default for K4aSettings {
    fn default() -> Self {
        Self {
            fps: FpsMode::Fps30,
            color_resolution: ColorResolution::Res720P,
            depth_mode: DepthMode::NfovBinned,
            mode: Mode::Depth,
            device_index: 0,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
        }
    }
}

impl K4aSettings {
    pub fn resolution(&self) -> (i32, i32) {
        match self.mode {
            Mode::Color => self.color_resolution.dimensions(),
            Mode::Ir => IR_PASSIVE_RESOLUTION,
            Mode::Depth => self.depth_mode.dimensions(),
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.capture_timeout_ms))
    }

    /// Builds the SDK configuration for the negotiated raw video format.
    pub fn device_config(&self, format: &str) -> Result<DeviceConfig> {
        if !self.mode.formats().iter().any(|offered| *offered == format) {
            return Err(anyhow!(
                "format {} is not available in {} mode",
                format,
                self.mode.nick()
            ));
        }
        let config = match self.mode {
            Mode::Color => {
                if !self.color_resolution.supports(self.fps) {
                    return Err(anyhow!(
                        "colour resolution {} does not support {}",
                        self.color_resolution.nick(),
                        self.fps.nick()
                    ));
                }
                let color_format = ColorFormat::from_name(format)
                    .ok_or_else(|| anyhow!("unknown colour format {}", format))?;
                DeviceConfig {
                    color: Some((color_format, self.color_resolution)),
                    depth: DepthSensor::Off,
                    fps: self.fps,
                }
            }
            Mode::Ir => DeviceConfig {
                color: None,
                depth: DepthSensor::PassiveIr,
                fps: self.fps,
            },
            Mode::Depth => {
                if !self.depth_mode.supports(self.fps) {
                    return Err(anyhow!(
                        "depth mode {} does not support {}",
                        self.depth_mode.nick(),
                        self.fps.nick()
                    ));
                }
                DeviceConfig {
                    color: None,
                    depth: DepthSensor::Depth(self.depth_mode),
                    fps: self.fps,
                }
            }
        };
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_follows_mode() {
        let mut settings = K4aSettings::default();
        assert_eq!(settings.resolution(), (320, 288));
        settings.mode = Mode::Ir;
        assert_eq!(settings.resolution(), IR_PASSIVE_RESOLUTION);
        settings.mode = Mode::Color;
        settings.color_resolution = ColorResolution::Res1536P;
        assert_eq!(settings.resolution(), (2048, 1536));
    }

    #[test]
    fn ntsc_style_framerate() {
        assert_eq!(FpsMode::Fps30.framerate(), (30_000, 1001));
        assert_eq!(FpsMode::Fps30.frame_duration(), Duration::from_nanos(33_366_666));
        assert_eq!(FpsMode::Fps5.frame_duration(), Duration::from_micros(200_200));
    }

    #[test]
    fn colour_mode_uses_negotiated_format() -> Result<()> {
        let settings = K4aSettings {
            mode: Mode::Color,
            color_resolution: ColorResolution::Res1080P,
            ..K4aSettings::default()
        };
        let config = settings.device_config("NV12")?;
        assert_eq!(config.color, Some((ColorFormat::Nv12, ColorResolution::Res1080P)));
        assert_eq!(config.depth, DepthSensor::Off);
        assert!(settings.device_config("GRAY16_LE").is_err());
        Ok(())
    }

    #[test]
    fn depth_and_ir_turn_colour_off() -> Result<()> {
        let mut settings = K4aSettings {
            depth_mode: DepthMode::WfovUnbinned,
            fps: FpsMode::Fps15,
            ..K4aSettings::default()
        };
        let config = settings.device_config("GRAY16_LE")?;
        assert_eq!(config.color, None);
        assert_eq!(config.depth, DepthSensor::Depth(DepthMode::WfovUnbinned));

        settings.mode = Mode::Ir;
        assert_eq!(settings.device_config("GRAY16_LE")?.depth, DepthSensor::PassiveIr);
        Ok(())
    }

    #[test]
    fn wide_unbinned_rejects_30_fps() {
        let settings = K4aSettings {
            depth_mode: DepthMode::WfovUnbinned,
            ..K4aSettings::default()
        };
        assert!(settings.device_config("GRAY16_LE").is_err());
    }

    #[test]
    fn full_resolution_colour_rejects_30_fps() -> Result<()> {
        let mut settings = K4aSettings {
            mode: Mode::Color,
            color_resolution: ColorResolution::Res3072P,
            ..K4aSettings::default()
        };
        assert!(settings.device_config("NV12").is_err());
        settings.fps = FpsMode::Fps15;
        let config = settings.device_config("NV12")?;
        assert_eq!(config.color, Some((ColorFormat::Nv12, ColorResolution::Res3072P)));
        Ok(())
    }

    #[test]
    fn nicks_parse_back() {
        assert_eq!("1080p".parse::<ColorResolution>().ok(), Some(ColorResolution::Res1080P));
        assert_eq!("wfov-binned".parse::<DepthMode>().ok(), Some(DepthMode::WfovBinned));
        assert_eq!(FpsMode::Fps15.nick(), "fps15");
        assert_eq!(Mode::Ir.nick(), "ir");
    }
}
