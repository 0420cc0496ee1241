use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::subclass::prelude::*;
use gstreamer_base::prelude::*;
use gstreamer_base::subclass::base_src::CreateSuccess;
use gstreamer_base::subclass::prelude::*;

use super::device::{self, Device, Image};
use super::settings::{ColorResolution, DepthMode, DeviceConfig, FpsMode, K4aSettings, Mode};
use crate::frame::FrameSlot;
use crate::lock;

static CAT: LazyLock<gstreamer::DebugCategory> = LazyLock::new(|| {
    gstreamer::DebugCategory::new(
        "k4asrc",
        gstreamer::DebugColorFlags::empty(),
        Some("Azure Kinect source"),
    )
});

#[derive(Default)]
struct State {
    device: Option<Arc<Device>>,
    running: Option<DeviceConfig>,
    frame_count: u64,
    pts_offset: Option<gstreamer::ClockTime>,
}

/// `timing` carries no frames: captures are pulled on the streaming thread.
/// It provides the flushing flag, the timestamp origin and the latency average.
#[derive(Default)]
pub struct K4aSrc {
    settings: Mutex<K4aSettings>,
    state: Mutex<State>,
    timing: FrameSlot<()>,
}

fn clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

impl K4aSrc {
    fn stream_caps(settings: &K4aSettings) -> gstreamer::Caps {
        let (width, height) = settings.resolution();
        let (numerator, denominator) = settings.fps.framerate();
        gstreamer_video::VideoCapsBuilder::new()
            .format_list(
                settings
                    .mode
                    .formats()
                    .iter()
                    .map(|name| gstreamer_video::VideoFormat::from_string(name)),
            )
            .width(width)
            .height(height)
            .framerate(gstreamer::Fraction::new(numerator, denominator))
            .build()
    }

    fn stop_cameras(&self, state: &mut State) {
        if let (Some(device), Some(config)) = (state.device.as_ref(), state.running.take()) {
            gstreamer::debug!(CAT, imp = self, "Stopping cameras running {:?}", config);
            device.stop_cameras();
        }
    }

    fn buffer_for(&self, image: &Image, frame_duration: Duration) -> gstreamer::Buffer {
        let captured_at = image.system_timestamp();
        self.timing
            .record_latency(device::monotonic_now().saturating_sub(captured_at));
        let relative = self.timing.running_time(captured_at);

        let (offset, base) = {
            let mut state = lock(&self.state);
            let offset = state.frame_count;
            state.frame_count += 1;
            let base = *state.pts_offset.get_or_insert_with(|| {
                self.obj()
                    .current_running_time()
                    .unwrap_or(gstreamer::ClockTime::ZERO)
            });
            (offset, base)
        };

        let mut buffer = gstreamer::Buffer::from_mut_slice(image.data().to_vec());
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(base + clock_time(relative));
            buffer.set_duration(clock_time(frame_duration));
            buffer.set_offset(offset);
            buffer.set_offset_end(offset + 1);
        }
        gstreamer::trace!(
            CAT,
            imp = self,
            "Frame {} {}x{} stride {} pts {}",
            offset,
            image.width(),
            image.height(),
            image.stride(),
            base + clock_time(relative)
        );
        buffer
    }
}

#[glib::object_subclass]
impl ObjectSubclass for K4aSrc {
    const NAME: &'static str = "GstK4aSrc";
    type Type = super::K4aSrc;
    type ParentType = gstreamer_base::PushSrc;
}

impl ObjectImpl for K4aSrc {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            let defaults = K4aSettings::default();
            vec![
                glib::ParamSpecEnum::builder_with_default("fps", defaults.fps)
                    .nick("FPS")
                    .blurb("Camera frame rate")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("color-resolution", defaults.color_resolution)
                    .nick("Color Resolution")
                    .blurb("Colour camera resolution, used in color mode")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("depth-mode", defaults.depth_mode)
                    .nick("Depth Mode")
                    .blurb("Depth sensor field of view and binning, used in depth mode")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("mode", defaults.mode)
                    .nick("Mode")
                    .blurb("Which image of each capture to stream")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("device-index")
                    .nick("Device Index")
                    .blurb("Index of the Kinect to open")
                    .default_value(defaults.device_index)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("capture-timeout")
                    .nick("Capture Timeout")
                    .blurb("Milliseconds to wait for a capture before checking for shutdown")
                    .minimum(1)
                    .default_value(defaults.capture_timeout_ms)
                    .mutable_ready()
                    .build(),
            ]
        });
        PROPERTIES.as_ref()
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = lock(&self.settings);
        match pspec.name() {
            "fps" => {
                let fps: FpsMode = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing fps from {} to {}", settings.fps.nick(), fps.nick());
                settings.fps = fps;
            }
            "color-resolution" => {
                let resolution: ColorResolution = value.get().expect("type checked upstream");
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing color-resolution from {} to {}",
                    settings.color_resolution.nick(),
                    resolution.nick()
                );
                settings.color_resolution = resolution;
            }
            "depth-mode" => {
                let depth_mode: DepthMode = value.get().expect("type checked upstream");
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing depth-mode from {} to {}",
                    settings.depth_mode.nick(),
                    depth_mode.nick()
                );
                settings.depth_mode = depth_mode;
            }
            "mode" => {
                let mode: Mode = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing mode from {} to {}", settings.mode.nick(), mode.nick());
                settings.mode = mode;
            }
            "device-index" => {
                let device_index = value.get().expect("type checked upstream");
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing device-index from {} to {}",
                    settings.device_index,
                    device_index
                );
                settings.device_index = device_index;
            }
            "capture-timeout" => {
                let timeout = value.get().expect("type checked upstream");
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing capture-timeout from {} to {}",
                    settings.capture_timeout_ms,
                    timeout
                );
                settings.capture_timeout_ms = timeout;
            }
            _ => unimplemented!(),
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = lock(&self.settings);
        match pspec.name() {
            "fps" => settings.fps.to_value(),
            "color-resolution" => settings.color_resolution.to_value(),
            "depth-mode" => settings.depth_mode.to_value(),
            "mode" => settings.mode.to_value(),
            "device-index" => settings.device_index.to_value(),
            "capture-timeout" => settings.capture_timeout_ms.to_value(),
            _ => unimplemented!(),
        }
    }

    fn constructed(&self) {
        self.parent_constructed();
        let obj = self.obj();
        obj.set_live(true);
        obj.set_format(gstreamer::Format::Time);
    }
}

impl GstObjectImpl for K4aSrc {}

impl ElementImpl for K4aSrc {
    fn metadata() -> Option<&'static gstreamer::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gstreamer::subclass::ElementMetadata> = LazyLock::new(|| {
            gstreamer::subclass::ElementMetadata::new(
                "Azure Kinect Source",
                "Source/Video",
                "Streams colour, passive IR or depth images from an Azure Kinect DK",
                "cAR contributors",
            )
        });
        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gstreamer::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Vec<gstreamer::PadTemplate>> = LazyLock::new(|| {
            let caps = gstreamer_video::VideoCapsBuilder::new()
                .format_list([
                    gstreamer_video::VideoFormat::Bgra,
                    gstreamer_video::VideoFormat::Yuy2,
                    gstreamer_video::VideoFormat::Nv12,
                    gstreamer_video::VideoFormat::Gray16Le,
                ])
                .build();
            let src_pad_template = gstreamer::PadTemplate::new(
                "src",
                gstreamer::PadDirection::Src,
                gstreamer::PadPresence::Always,
                &caps,
            )
            .expect("valid src pad template");
            vec![src_pad_template]
        });
        PAD_TEMPLATES.as_ref()
    }

    fn change_state(
        &self,
        transition: gstreamer::StateChange,
    ) -> Result<gstreamer::StateChangeSuccess, gstreamer::StateChangeError> {
        if transition == gstreamer::StateChange::NullToReady {
            let index = lock(&self.settings).device_index;
            let opened = Device::open(index).map_err(|err| {
                gstreamer::element_imp_error!(
                    self,
                    gstreamer::ResourceError::NotFound,
                    [
                        "Could not open Kinect {} of {} installed: {}",
                        index,
                        device::installed_count(),
                        err
                    ]
                );
                gstreamer::StateChangeError
            })?;
            match opened.serial_number() {
                Ok(serial) => gstreamer::info!(CAT, imp = self, "Opened Kinect {} ({})", opened.index(), serial),
                Err(err) => gstreamer::warning!(CAT, imp = self, "Opened Kinect {}: {}", opened.index(), err),
            }
            lock(&self.state).device = Some(Arc::new(opened));
        }

        let success = self.parent_change_state(transition)?;

        if transition == gstreamer::StateChange::ReadyToNull {
            let mut state = lock(&self.state);
            self.stop_cameras(&mut state);
            state.device = None;
        }
        Ok(success)
    }
}

impl BaseSrcImpl for K4aSrc {
    fn caps(&self, filter: Option<&gstreamer::Caps>) -> Option<gstreamer::Caps> {
        let caps = Self::stream_caps(&lock(&self.settings));
        Some(match filter {
            Some(filter) => filter.intersect_with_mode(&caps, gstreamer::CapsIntersectMode::First),
            None => caps,
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }

    /// Starts the cameras in the negotiated format, restarting on renegotiation.
    fn set_caps(&self, caps: &gstreamer::Caps) -> Result<(), gstreamer::LoggableError> {
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|_| gstreamer::loggable_error!(CAT, "Invalid caps {}", caps))?;
        let config = lock(&self.settings)
            .device_config(info.format().to_str())
            .map_err(|err| gstreamer::loggable_error!(CAT, "{:#}", err))?;

        let mut state = lock(&self.state);
        if state.running == Some(config) {
            return Ok(());
        }
        self.stop_cameras(&mut state);
        let device = state
            .device
            .clone()
            .ok_or_else(|| gstreamer::loggable_error!(CAT, "No Kinect open"))?;
        device
            .start_cameras(&config)
            .map_err(|err| gstreamer::loggable_error!(CAT, "Could not start cameras: {}", err))?;
        gstreamer::info!(CAT, imp = self, "Started cameras with {:?} for {}", config, caps);
        state.running = Some(config);
        Ok(())
    }

    fn start(&self) -> Result<(), gstreamer::ErrorMessage> {
        let mut state = lock(&self.state);
        if state.device.is_none() {
            return Err(gstreamer::error_msg!(
                gstreamer::ResourceError::NotFound,
                ["No Kinect open"]
            ));
        }
        state.frame_count = 0;
        state.pts_offset = None;
        self.timing.reset();
        self.timing.set_flushing(false);
        Ok(())
    }

    fn stop(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.timing.set_flushing(true);
        let mut state = lock(&self.state);
        self.stop_cameras(&mut state);
        gstreamer::info!(CAT, imp = self, "Stopped after {} frames", state.frame_count);
        Ok(())
    }

    fn unlock(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.timing.set_flushing(true);
        Ok(())
    }

    fn unlock_stop(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.timing.set_flushing(false);
        Ok(())
    }

    fn query(&self, query: &mut gstreamer::QueryRef) -> bool {
        if let gstreamer::QueryViewMut::Latency(latency) = query.view_mut() {
            let frame_duration = lock(&self.settings).fps.frame_duration();
            let measured = self.timing.latency().unwrap_or_default();
            latency.set(
                true,
                clock_time(frame_duration.max(measured)),
                gstreamer::ClockTime::NONE,
            );
            return true;
        }
        BaseSrcImplExt::parent_query(self, query)
    }
}

impl PushSrcImpl for K4aSrc {
    fn create(
        &self,
        _buffer: Option<&mut gstreamer::BufferRef>,
    ) -> Result<CreateSuccess, gstreamer::FlowError> {
        let (mode, timeout, frame_duration) = {
            let settings = lock(&self.settings);
            (settings.mode, settings.capture_timeout(), settings.fps.frame_duration())
        };
        let device = lock(&self.state).device.clone().ok_or_else(|| {
            gstreamer::element_imp_error!(self, gstreamer::CoreError::Negotiation, ["No Kinect open"]);
            gstreamer::FlowError::Error
        })?;

        loop {
            if self.timing.is_flushing() {
                return Err(gstreamer::FlowError::Flushing);
            }
            let capture = match device.capture(timeout) {
                Ok(Some(capture)) => capture,
                Ok(None) => {
                    gstreamer::debug!(CAT, imp = self, "No capture within {:?}", timeout);
                    continue;
                }
                Err(err) => {
                    gstreamer::element_imp_error!(
                        self,
                        gstreamer::ResourceError::Read,
                        ["Capture failed: {}", err]
                    );
                    return Err(gstreamer::FlowError::Error);
                }
            };
            let image = match mode {
                Mode::Color => capture.color(),
                Mode::Ir => capture.ir(),
                Mode::Depth => capture.depth(),
            };
            match image {
                Some(image) => {
                    return Ok(CreateSuccess::NewBuffer(self.buffer_for(&image, frame_duration)));
                }
                None => gstreamer::trace!(CAT, imp = self, "Capture without a {} image", mode.nick()),
            }
        }
    }
}
