use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::subclass::prelude::*;
use gstreamer_base::prelude::*;
use gstreamer_base::subclass::base_src::CreateSuccess;
use gstreamer_base::subclass::prelude::*;

use super::settings::{presentation_time, Mode, Product, ThetaSettings};
use super::uvc::{Context, Device, Stream};
use crate::frame::{FrameSlot, SlotWait};
use crate::lock;

static CAT: LazyLock<gstreamer::DebugCategory> = LazyLock::new(|| {
    gstreamer::DebugCategory::new(
        "thetauvcsrc",
        gstreamer::DebugColorFlags::empty(),
        Some("Ricoh Theta UVC source"),
    )
});

/// `create` warns when the camera stays silent this long.
const STALL_WARNING: Duration = Duration::from_secs(5);

#[derive(Default)]
struct State {
    device: Option<Arc<Device>>,
    stream: Option<Stream>,
    frame_interval: Option<Duration>,
    pts_offset: Option<gstreamer::ClockTime>,
}

#[derive(Default)]
pub struct ThetaUvcSrc {
    settings: Mutex<ThetaSettings>,
    state: Mutex<State>,
    frames: Arc<FrameSlot<gstreamer::Buffer>>,
}

impl ThetaUvcSrc {
    fn open_device(&self) -> anyhow::Result<()> {
        let selector = lock(&self.settings).selector();
        let context = Context::new().context("initialise libuvc")?;
        let device = context
            .select(&selector)
            .with_context(|| format!("enumerate devices matching {}", selector))?
            .ok_or_else(|| anyhow!("no Ricoh Theta matches {}", selector))?;
        gstreamer::info!(CAT, imp = self, "Selected device {}", selector);
        lock(&self.state).device = Some(Arc::new(device));
        Ok(())
    }

    fn stream_caps(settings: &ThetaSettings) -> gstreamer::Caps {
        gstreamer::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gstreamer::Fraction::new(settings.fps as i32, 1))
            .build()
    }

    /// Shifts device-relative timestamps onto the pipeline's running time.
    fn retime(&self, buffer: &mut gstreamer::Buffer) {
        let offset = {
            let mut state = lock(&self.state);
            *state.pts_offset.get_or_insert_with(|| {
                self.obj()
                    .current_running_time()
                    .unwrap_or(gstreamer::ClockTime::ZERO)
            })
        };
        let pts = buffer.pts().map(|pts| pts + offset);
        buffer.make_mut().set_pts(pts);
    }
}

#[glib::object_subclass]
impl ObjectSubclass for ThetaUvcSrc {
    const NAME: &'static str = "GstThetaUvcSrc";
    type Type = super::ThetaUvcSrc;
    type ParentType = gstreamer_base::PushSrc;
}

impl ObjectImpl for ThetaUvcSrc {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            let defaults = ThetaSettings::default();
            vec![
                glib::ParamSpecUInt::builder("width")
                    .nick("Width")
                    .blurb("Stream width; setting it selects the custom mode")
                    .default_value(defaults.width)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("height")
                    .nick("Height")
                    .blurb("Stream height; setting it selects the custom mode")
                    .default_value(defaults.height)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("fps")
                    .nick("FPS")
                    .blurb("Frames per second requested from the camera")
                    .default_value(defaults.fps)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("mode", defaults.mode)
                    .nick("Mode")
                    .blurb("Stream preset; presets overwrite width, height and fps")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("product", defaults.product)
                    .nick("Product")
                    .blurb("Theta model to look for")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecString::builder("serial-number")
                    .nick("Serial Number")
                    .blurb("Serial number of the camera (empty for any)")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("device-index")
                    .nick("Device Index")
                    .blurb("Which of the matching cameras to open, in bus order")
                    .default_value(defaults.device_index)
                    .mutable_ready()
                    .build(),
            ]
        });
        PROPERTIES.as_ref()
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = lock(&self.settings);
        match pspec.name() {
            "width" => {
                let width = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing width from {} to {}", settings.width, width);
                settings.set_width(width);
            }
            "height" => {
                let height = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing height from {} to {}", settings.height, height);
                settings.set_height(height);
            }
            "fps" => {
                let fps = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing fps from {} to {}", settings.fps, fps);
                settings.set_fps(fps);
            }
            "mode" => {
                let mode: Mode = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing mode from {} to {}", settings.mode.nick(), mode.nick());
                settings.set_mode(mode);
            }
            "product" => {
                let product: Product = value.get().expect("type checked upstream");
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing product from {} to {}",
                    settings.product.nick(),
                    product.nick()
                );
                settings.product = product;
            }
            "serial-number" => {
                let serial_number = value
                    .get::<Option<String>>()
                    .expect("type checked upstream")
                    .unwrap_or_default();
                gstreamer::debug!(
                    CAT,
                    imp = self,
                    "Changing serial-number from {:?} to {:?}",
                    settings.serial_number,
                    serial_number
                );
                settings.serial_number = serial_number;
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
            _ => unimplemented!(),
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = lock(&self.settings);
        match pspec.name() {
            "width" => settings.width.to_value(),
            "height" => settings.height.to_value(),
            "fps" => settings.fps.to_value(),
            "mode" => settings.mode.to_value(),
            "product" => settings.product.to_value(),
            "serial-number" => settings.serial_number.to_value(),
            "device-index" => settings.device_index.to_value(),
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

impl GstObjectImpl for ThetaUvcSrc {}

impl ElementImpl for ThetaUvcSrc {
    fn metadata() -> Option<&'static gstreamer::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gstreamer::subclass::ElementMetadata> = LazyLock::new(|| {
            gstreamer::subclass::ElementMetadata::new(
                "Ricoh Theta UVC Source",
                "Source/Video",
                "Streams equirectangular H.264 from a Ricoh Theta V or Z1 over USB",
                "cAR contributors",
            )
        });
        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gstreamer::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Vec<gstreamer::PadTemplate>> = LazyLock::new(|| {
            let caps = gstreamer::Caps::builder("video/x-h264")
                .field("stream-format", "byte-stream")
                .field("alignment", "au")
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
            self.open_device().map_err(|err| {
                gstreamer::element_imp_error!(
                    self,
                    gstreamer::ResourceError::NotFound,
                    ["{:#}", err]
                );
                gstreamer::StateChangeError
            })?;
        }

        let success = self.parent_change_state(transition)?;

        if transition == gstreamer::StateChange::ReadyToNull {
            lock(&self.state).device = None;
        }
        Ok(success)
    }
}

impl BaseSrcImpl for ThetaUvcSrc {
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

    fn start(&self) -> Result<(), gstreamer::ErrorMessage> {
        let settings = lock(&self.settings).clone();
        let mut state = lock(&self.state);
        let device = state.device.clone().ok_or_else(|| {
            gstreamer::error_msg!(gstreamer::ResourceError::NotFound, ["No Theta device selected"])
        })?;
        let handle = device.open().map_err(|err| {
            gstreamer::error_msg!(
                gstreamer::ResourceError::OpenRead,
                ["Could not open Theta device: {}", err]
            )
        })?;
        let ctrl = handle
            .h264_stream_ctrl(settings.width, settings.height, settings.fps)
            .map_err(|err| {
                gstreamer::error_msg!(
                    gstreamer::ResourceError::Settings,
                    [
                        "Camera does not offer {}x{} at {} fps: {}",
                        settings.width,
                        settings.height,
                        settings.fps,
                        err
                    ]
                )
            })?;
        let interval = ctrl.frame_interval();
        gstreamer::debug!(CAT, imp = self, "Negotiated {:?}", ctrl);

        self.frames.reset();
        self.frames.set_flushing(false);
        let frames = Arc::clone(&self.frames);
        let mut first_sequence = None;
        let stream = handle
            .start_streaming(ctrl, move |frame| {
                let data = frame.data();
                if data.is_empty() {
                    return;
                }
                let first = *first_sequence.get_or_insert(frame.sequence());
                let pts = presentation_time(frame.sequence(), first, interval);
                let mut buffer = gstreamer::Buffer::from_mut_slice(data.to_vec());
                {
                    let buffer = buffer.make_mut();
                    buffer.set_pts(gstreamer::ClockTime::from_nseconds(pts.as_nanos() as u64));
                    buffer.set_duration(gstreamer::ClockTime::from_nseconds(interval.as_nanos() as u64));
                    buffer.set_offset(u64::from(frame.sequence().wrapping_sub(first)));
                }
                frames.push(buffer);
            })
            .map_err(|err| {
                gstreamer::error_msg!(
                    gstreamer::ResourceError::Read,
                    ["Could not start streaming: {}", err]
                )
            })?;

        state.stream = Some(stream);
        state.frame_interval = Some(interval);
        state.pts_offset = None;
        gstreamer::info!(
            CAT,
            imp = self,
            "Streaming {}x{} with a frame interval of {:?}",
            settings.width,
            settings.height,
            interval
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.frames.set_flushing(true);
        let stream = {
            let mut state = lock(&self.state);
            state.frame_interval = None;
            state.pts_offset = None;
            state.stream.take()
        };
        // Stopping joins the libusb callback, so it happens outside the state lock.
        drop(stream);
        let stats = self.frames.stats();
        gstreamer::info!(
            CAT,
            imp = self,
            "Stopped after {} frames ({} dropped)",
            stats.produced,
            stats.dropped
        );
        self.frames.reset();
        Ok(())
    }

    fn unlock(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.frames.set_flushing(true);
        Ok(())
    }

    fn unlock_stop(&self) -> Result<(), gstreamer::ErrorMessage> {
        self.frames.set_flushing(false);
        Ok(())
    }

    fn query(&self, query: &mut gstreamer::QueryRef) -> bool {
        if let gstreamer::QueryViewMut::Latency(latency) = query.view_mut() {
            let Some(interval) = lock(&self.state).frame_interval else {
                return false;
            };
            latency.set(
                true,
                gstreamer::ClockTime::from_nseconds(interval.as_nanos() as u64),
                gstreamer::ClockTime::NONE,
            );
            return true;
        }
        BaseSrcImplExt::parent_query(self, query)
    }
}

impl PushSrcImpl for ThetaUvcSrc {
    fn create(
        &self,
        _buffer: Option<&mut gstreamer::BufferRef>,
    ) -> Result<CreateSuccess, gstreamer::FlowError> {
        loop {
            match self.frames.wait(STALL_WARNING) {
                SlotWait::Frame(mut buffer) => {
                    self.retime(&mut buffer);
                    gstreamer::trace!(CAT, imp = self, "Pushing frame pts={:?}", buffer.pts());
                    return Ok(CreateSuccess::NewBuffer(buffer));
                }
                SlotWait::Flushing => return Err(gstreamer::FlowError::Flushing),
                SlotWait::TimedOut => {
                    gstreamer::warning!(
                        CAT,
                        imp = self,
                        "No frame from the camera for {:?}",
                        STALL_WARNING
                    );
                }
            }
        }
    }
}
