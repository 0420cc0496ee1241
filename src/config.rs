//! Streaming daemon configuration.
//!
//! `car_streamd` reads an optional JSON or TOML file (path in `CAR_CONFIG`),
//! fills unset fields with defaults, applies `CAR_*` environment overrides
//! and validates the result before any pipeline is built.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use strum::{EnumString, IntoStaticStr};

use crate::depth::DepthRange;
use crate::k4a::settings::{ColorResolution, DepthMode, FpsMode, K4aSettings, Mode as K4aMode};
use crate::theta::settings::{Mode as ThetaMode, Product, ThetaSettings};

const DEFAULT_CAMERA_NAME: &str = "theta";
const DEFAULT_SINK_HOST: &str = "127.0.0.1";
const DEFAULT_SINK_BASE_PORT: u16 = 5000;

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    cameras: Option<Vec<CameraConfigFile>>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    name: Option<String>,
    source: Option<String>,
    mode: Option<String>,
    product: Option<String>,
    serial_number: Option<String>,
    device_index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    color_resolution: Option<String>,
    depth_mode: Option<String>,
    capture_timeout_ms: Option<u32>,
    colorize: Option<ColorizeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ColorizeConfigFile {
    min_depth: Option<u32>,
    max_depth: Option<u32>,
    threads: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    host: Option<String>,
    base_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub cameras: Vec<CameraConfig>,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub name: String,
    pub source: CameraSource,
}

#[derive(Debug, Clone)]
pub enum CameraSource {
    Theta(ThetaSettings),
    K4a {
        settings: K4aSettings,
        colorize: Option<ColorizeSettings>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ColorizeSettings {
    pub range: DepthRange,
    pub threads: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum SinkKind {
    /// RTP/H.264 over UDP, one port per camera.
    Udp,
    /// Discard everything; useful for bring-up.
    Fake,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub host: String,
    pub base_port: u16,
}

impl SinkSettings {
    pub fn port_for(&self, camera_index: usize) -> u16 {
        self.base_port.saturating_add(camera_index as u16)
    }
}

impl StreamConfig {
    /// Loads from `CAR_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("CAR_CONFIG").ok() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(&path))?),
            _ => None,
        };
        Self::resolve(file_cfg.unwrap_or_default())
    }

    /// Loads from an explicit file, still honouring environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::resolve(read_config_file(path)?)
    }

    fn resolve(file: StreamConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamConfigFile) -> Result<Self> {
        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .enumerate()
                .map(|(index, camera)| camera_from_file(index, camera))
                .collect::<Result<Vec<_>>>()?,
            None => vec![CameraConfig {
                name: DEFAULT_CAMERA_NAME.to_string(),
                source: CameraSource::Theta(ThetaSettings::default()),
            }],
        };
        let sink = SinkSettings {
            kind: match file.sink.as_ref().and_then(|sink| sink.kind.as_deref()) {
                Some(kind) => parse_nick(kind, "sink kind")?,
                None => SinkKind::Udp,
            },
            host: file
                .sink
                .as_ref()
                .and_then(|sink| sink.host.clone())
                .unwrap_or_else(|| DEFAULT_SINK_HOST.to_string()),
            base_port: file
                .sink
                .and_then(|sink| sink.base_port)
                .unwrap_or(DEFAULT_SINK_BASE_PORT),
        };
        Ok(Self { cameras, sink })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(kind) = std::env::var("CAR_SINK") {
            if !kind.trim().is_empty() {
                self.sink.kind = parse_nick(kind.trim(), "CAR_SINK")?;
            }
        }
        if let Ok(host) = std::env::var("CAR_SINK_HOST") {
            if !host.trim().is_empty() {
                self.sink.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("CAR_SINK_BASE_PORT") {
            self.sink.base_port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAR_SINK_BASE_PORT must be a port number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(anyhow!("camera names must not be empty"));
            }
            if !names.insert(camera.name.as_str()) {
                return Err(anyhow!("camera name {} is used twice", camera.name));
            }
            if let CameraSource::Theta(settings) = &camera.source {
                if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
                    return Err(anyhow!(
                        "camera {} needs a non-zero width, height and fps",
                        camera.name
                    ));
                }
            }
        }
        if self.sink.kind == SinkKind::Udp {
            if self.sink.host.trim().is_empty() {
                return Err(anyhow!("udp sink needs a host"));
            }
            if self.sink.base_port == 0 {
                return Err(anyhow!("udp sink base port must be non-zero"));
            }
            let last = u32::from(self.sink.base_port) + self.cameras.len() as u32 - 1;
            if last > u32::from(u16::MAX) {
                return Err(anyhow!(
                    "{} cameras do not fit above base port {}",
                    self.cameras.len(),
                    self.sink.base_port
                ));
            }
        }
        Ok(())
    }
}

fn camera_from_file(index: usize, file: CameraConfigFile) -> Result<CameraConfig> {
    let name = file.name.clone().unwrap_or_else(|| format!("camera{}", index));
    let source = match file.source.as_deref().unwrap_or("theta") {
        "theta" => theta_from_file(&name, file)?,
        "k4a" => k4a_from_file(&name, file)?,
        other => return Err(anyhow!("camera {}: unknown source {}", name, other)),
    };
    Ok(CameraConfig { name, source })
}

fn theta_from_file(name: &str, file: CameraConfigFile) -> Result<CameraSource> {
    if file.colorize.is_some() {
        return Err(anyhow!("camera {}: colorize needs a k4a depth source", name));
    }
    let mut settings = ThetaSettings::default();
    if let Some(mode) = file.mode.as_deref() {
        settings.set_mode(parse_nick::<ThetaMode>(mode, "theta mode")?);
    }
    if let Some(width) = file.width {
        settings.set_width(width);
    }
    if let Some(height) = file.height {
        settings.set_height(height);
    }
    if let Some(fps) = file.fps {
        settings.set_fps(fps);
    }
    if let Some(product) = file.product.as_deref() {
        settings.product = parse_nick::<Product>(product, "theta product")?;
    }
    if let Some(serial_number) = file.serial_number {
        settings.serial_number = serial_number;
    }
    if let Some(device_index) = file.device_index {
        settings.device_index = device_index;
    }
    Ok(CameraSource::Theta(settings))
}

fn k4a_from_file(name: &str, file: CameraConfigFile) -> Result<CameraSource> {
    let mut settings = K4aSettings::default();
    if let Some(mode) = file.mode.as_deref() {
        settings.mode = parse_nick::<K4aMode>(mode, "k4a mode")?;
    }
    if let Some(fps) = file.fps {
        settings.fps = match fps {
            5 => FpsMode::Fps5,
            15 => FpsMode::Fps15,
            30 => FpsMode::Fps30,
            other => return Err(anyhow!("camera {}: k4a cannot run at {} fps", name, other)),
        };
    }
    if let Some(resolution) = file.color_resolution.as_deref() {
        settings.color_resolution = parse_nick::<ColorResolution>(resolution, "color resolution")?;
    }
    if let Some(depth_mode) = file.depth_mode.as_deref() {
        settings.depth_mode = parse_nick::<DepthMode>(depth_mode, "depth mode")?;
    }
    if let Some(device_index) = file.device_index {
        settings.device_index = device_index;
    }
    if let Some(timeout) = file.capture_timeout_ms {
        if timeout == 0 {
            return Err(anyhow!("camera {}: capture_timeout_ms must be at least 1", name));
        }
        settings.capture_timeout_ms = timeout;
    }
    if file.width.is_some() || file.height.is_some() || file.product.is_some() {
        return Err(anyhow!(
            "camera {}: k4a geometry comes from color_resolution or depth_mode",
            name
        ));
    }
    if settings.mode == K4aMode::Depth && !settings.depth_mode.supports(settings.fps) {
        return Err(anyhow!(
            "camera {}: depth mode {} does not support {}",
            name,
            settings.depth_mode.nick(),
            settings.fps.nick()
        ));
    }
    if settings.mode == K4aMode::Color && !settings.color_resolution.supports(settings.fps) {
        return Err(anyhow!(
            "camera {}: color resolution {} does not support {}",
            name,
            settings.color_resolution.nick(),
            settings.fps.nick()
        ));
    }
    let colorize = match file.colorize {
        Some(colorize) => {
            if settings.mode != K4aMode::Depth {
                return Err(anyhow!("camera {}: colorize needs depth mode", name));
            }
            let defaults = DepthRange::default();
            let range = DepthRange::new(
                colorize.min_depth.unwrap_or(u32::from(defaults.min())),
                colorize.max_depth.unwrap_or(u32::from(defaults.max())),
            )
            .with_context(|| format!("camera {}: invalid colorize range", name))?;
            Some(ColorizeSettings {
                range,
                threads: colorize.threads.unwrap_or(0),
            })
        }
        None => None,
    };
    Ok(CameraSource::K4a { settings, colorize })
}

fn parse_nick<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("unknown {} {}", what, value))
}

fn read_config_file(path: &Path) -> Result<StreamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?,
        _ => serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?,
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<StreamConfig> {
        let file: StreamConfigFile = serde_json::from_str(json)?;
        let cfg = StreamConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn empty_file_streams_one_theta_over_udp() -> Result<()> {
        let cfg = parse("{}")?;
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].name, "theta");
        assert!(matches!(cfg.cameras[0].source, CameraSource::Theta(_)));
        assert_eq!(cfg.sink.kind, SinkKind::Udp);
        assert_eq!(cfg.sink.port_for(0), 5000);
        Ok(())
    }

    #[test]
    fn theta_geometry_after_mode_switches_to_custom() -> Result<()> {
        let cfg = parse(r#"{"cameras": [{"source": "theta", "mode": "fhd", "fps": 15}]}"#)?;
        let CameraSource::Theta(settings) = &cfg.cameras[0].source else {
            panic!("expected theta source");
        };
        assert_eq!(settings.mode, ThetaMode::NoMode);
        assert_eq!((settings.width, settings.height, settings.fps), (1920, 960, 15));
        assert_eq!(cfg.cameras[0].name, "camera0");
        Ok(())
    }

    #[test]
    fn k4a_depth_with_colorize() -> Result<()> {
        let cfg = parse(
            r#"{"cameras": [{"name": "depth", "source": "k4a", "mode": "depth", "fps": 15,
                "depth_mode": "wfov-unbinned",
                "colorize": {"min_depth": 300, "max_depth": 5000}}]}"#,
        )?;
        let CameraSource::K4a { settings, colorize } = &cfg.cameras[0].source else {
            panic!("expected k4a source");
        };
        assert_eq!(settings.fps, FpsMode::Fps15);
        assert_eq!(settings.depth_mode, DepthMode::WfovUnbinned);
        let colorize = colorize.expect("colorize settings");
        assert_eq!((colorize.range.min(), colorize.range.max()), (300, 5000));
        assert_eq!(colorize.threads, 0);
        Ok(())
    }

    #[test]
    fn rejects_inconsistent_cameras() {
        assert!(parse(r#"{"cameras": []}"#).is_err());
        assert!(parse(r#"{"cameras": [{"name": "a"}, {"name": "a"}]}"#).is_err());
        assert!(parse(r#"{"cameras": [{"source": "gopro"}]}"#).is_err());
        assert!(parse(r#"{"cameras": [{"source": "k4a", "fps": 60}]}"#).is_err());
        assert!(parse(r#"{"cameras": [{"source": "k4a", "mode": "color", "colorize": {}}]}"#).is_err());
        assert!(parse(r#"{"cameras": [{"source": "theta", "colorize": {}}]}"#).is_err());
        assert!(parse(
            r#"{"cameras": [{"source": "k4a", "colorize": {"min_depth": 10, "max_depth": 5}}]}"#
        )
        .is_err());
        assert!(parse(r#"{"cameras": [{"source": "k4a", "depth_mode": "wfov-unbinned"}]}"#).is_err());
        assert!(parse(r#"{"cameras": [{"source": "k4a", "capture_timeout_ms": 0}]}"#).is_err());
        assert!(parse(
            r#"{"cameras": [{"source": "k4a", "mode": "color", "color_resolution": "3072p", "fps": 30}]}"#
        )
        .is_err());
        assert!(parse(
            r#"{"cameras": [{"source": "k4a", "mode": "color", "color_resolution": "3072p", "fps": 15}]}"#
        )
        .is_ok());
        assert!(parse(r#"{"cameras": [{"source": "k4a", "capture_timeout_ms": 1}]}"#).is_ok());
    }

    #[test]
    fn udp_ports_must_fit() {
        assert!(parse(
            r#"{"cameras": [{"name": "a"}, {"name": "b"}], "sink": {"base_port": 65535}}"#
        )
        .is_err());
        assert!(parse(r#"{"sink": {"kind": "fake", "base_port": 0}}"#).is_ok());
    }
}
