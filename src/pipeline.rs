//! Pipeline descriptions for `car_streamd`.
//!
//! Each configured camera gets its own pipeline so a failing device does not
//! stall the others. Descriptions use `gst-launch-1.0` syntax and are parsed
//! by `gst::parse::launch` in the daemon; they can also be pasted into a shell
//! for debugging.

use std::fmt::Write as _;

use crate::config::{CameraConfig, CameraSource, SinkKind, SinkSettings, StreamConfig};
use crate::k4a::settings::Mode as K4aMode;
use crate::theta::settings::Mode as ThetaMode;

/// Payload type used for every RTP stream.
pub const RTP_PAYLOAD_TYPE: u8 = 96;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDescription {
    pub camera: String,
    pub launch: String,
}

/// Renders one launch description per camera, in configuration order.
pub fn describe(config: &StreamConfig) -> Vec<PipelineDescription> {
    config
        .cameras
        .iter()
        .enumerate()
        .map(|(index, camera)| PipelineDescription {
            camera: camera.name.clone(),
            launch: describe_camera(camera, &config.sink, index),
        })
        .collect()
}

fn describe_camera(camera: &CameraConfig, sink: &SinkSettings, index: usize) -> String {
    let mut launch = String::new();
    let encoded = match &camera.source {
        CameraSource::Theta(settings) => {
            launch.push_str("thetauvcsrc");
            if settings.mode == ThetaMode::NoMode {
                let _ = write!(
                    launch,
                    " width={} height={} fps={}",
                    settings.width, settings.height, settings.fps
                );
            } else {
                let _ = write!(launch, " mode={}", settings.mode.nick());
            }
            let _ = write!(
                launch,
                " product={} device-index={}",
                settings.product.nick(),
                settings.device_index
            );
            if !settings.serial_number.trim().is_empty() {
                let _ = write!(
                    launch,
                    " serial-number={}",
                    quote(settings.serial_number.trim())
                );
            }
            launch.push_str(" ! h264parse config-interval=-1");
            true
        }
        CameraSource::K4a { settings, colorize } => {
            let _ = write!(
                launch,
                "k4asrc mode={} fps={} device-index={} capture-timeout={}",
                settings.mode.nick(),
                settings.fps.nick(),
                settings.device_index,
                settings.capture_timeout_ms
            );
            match settings.mode {
                K4aMode::Color => {
                    let _ = write!(launch, " color-resolution={}", settings.color_resolution.nick());
                }
                K4aMode::Depth => {
                    let _ = write!(launch, " depth-mode={}", settings.depth_mode.nick());
                }
                K4aMode::Ir => {}
            }
            if let Some(colorize) = colorize {
                let _ = write!(
                    launch,
                    " ! dcolorizer min-depth={} max-depth={} threads={} ! video/x-raw,format=RGB",
                    colorize.range.min(),
                    colorize.range.max(),
                    colorize.threads
                );
            }
            if sink.kind == SinkKind::Udp {
                let _ = write!(
                    launch,
                    " ! videoconvert ! video/x-raw,format=I420 ! x264enc tune=zerolatency \
                     speed-preset=ultrafast key-int-max={} ! h264parse",
                    settings.fps.fps()
                );
                true
            } else {
                false
            }
        }
    };

    match sink.kind {
        SinkKind::Udp if encoded => {
            let _ = write!(
                launch,
                " ! rtph264pay config-interval=1 pt={} ! udpsink host={} port={} sync=false",
                RTP_PAYLOAD_TYPE,
                sink.host,
                sink.port_for(index)
            );
        }
        _ => launch.push_str(" ! fakesink sync=false"),
    }
    launch
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColorizeSettings;
    use crate::depth::DepthRange;
    use crate::k4a::settings::{FpsMode, K4aSettings};
    use crate::theta::settings::{Product, ThetaSettings};

    fn udp() -> SinkSettings {
        SinkSettings {
            kind: SinkKind::Udp,
            host: "10.0.0.2".to_string(),
            base_port: 6000,
        }
    }

    #[test]
    fn theta_preset_streams_rtp() {
        let camera = CameraConfig {
            name: "front".to_string(),
            source: CameraSource::Theta(ThetaSettings {
                product: Product::Z1,
                serial_number: "10010104".to_string(),
                ..ThetaSettings::default()
            }),
        };
        assert_eq!(
            describe_camera(&camera, &udp(), 1),
            "thetauvcsrc mode=uhd product=z1 device-index=0 serial-number=\"10010104\" \
             ! h264parse config-interval=-1 ! rtph264pay config-interval=1 pt=96 \
             ! udpsink host=10.0.0.2 port=6001 sync=false"
        );
    }

    #[test]
    fn theta_custom_geometry_omits_mode() {
        let mut settings = ThetaSettings::default();
        settings.set_width(1280);
        settings.set_height(640);
        let camera = CameraConfig {
            name: "front".to_string(),
            source: CameraSource::Theta(settings),
        };
        let launch = describe_camera(&camera, &udp(), 0);
        assert!(launch.starts_with("thetauvcsrc width=1280 height=640 fps=29 product=any-product"));
        assert!(!launch.contains("mode="));
    }

    #[test]
    fn colorized_depth_is_encoded_after_dcolorizer() -> anyhow::Result<()> {
        let camera = CameraConfig {
            name: "depth".to_string(),
            source: CameraSource::K4a {
                settings: K4aSettings {
                    fps: FpsMode::Fps15,
                    ..K4aSettings::default()
                },
                colorize: Some(ColorizeSettings {
                    range: DepthRange::new(300, 5000)?,
                    threads: 2,
                }),
            },
        };
        let launch = describe_camera(&camera, &udp(), 0);
        assert_eq!(
            launch,
            "k4asrc mode=depth fps=fps15 device-index=0 capture-timeout=1000 \
             depth-mode=nfov-binned ! dcolorizer min-depth=300 max-depth=5000 threads=2 \
             ! video/x-raw,format=RGB ! videoconvert ! video/x-raw,format=I420 \
             ! x264enc tune=zerolatency speed-preset=ultrafast key-int-max=15 ! h264parse \
             ! rtph264pay config-interval=1 pt=96 ! udpsink host=10.0.0.2 port=6000 sync=false"
        );
        Ok(())
    }

    #[test]
    fn fake_sink_skips_encoding() {
        let camera = CameraConfig {
            name: "ir".to_string(),
            source: CameraSource::K4a {
                settings: K4aSettings {
                    mode: K4aMode::Ir,
                    ..K4aSettings::default()
                },
                colorize: None,
            },
        };
        let sink = SinkSettings {
            kind: SinkKind::Fake,
            ..udp()
        };
        assert_eq!(
            describe_camera(&camera, &sink, 0),
            "k4asrc mode=ir fps=fps30 device-index=0 capture-timeout=1000 ! fakesink sync=false"
        );
    }

    #[test]
    fn serial_numbers_are_escaped() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }
}
