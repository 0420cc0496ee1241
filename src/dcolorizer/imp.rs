use std::sync::{Arc, LazyLock, Mutex};

use anyhow::anyhow;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::subclass::prelude::*;
use gstreamer_base::subclass::prelude::*;
use gstreamer_base::subclass::BaseTransformMode;
use gstreamer_video::{VideoFormat, VideoInfo};

use crate::depth::{DepthCodec, DepthRange, Endianness};
use crate::lock;

static CAT: LazyLock<gstreamer::DebugCategory> = LazyLock::new(|| {
    gstreamer::DebugCategory::new(
        "dcolorizer",
        gstreamer::DebugColorFlags::empty(),
        Some("Depth to colour converter"),
    )
});

const GRAY16_LE: &str = "GRAY16_LE";
const GRAY16_BE: &str = "GRAY16_BE";
const RGB: &str = "RGB";

#[derive(Debug, Clone, Copy)]
struct Settings {
    threads: u32,
    min_depth: u32,
    max_depth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 0,
            min_depth: 1,
            max_depth: u32::from(u16::MAX),
        }
    }
}

#[derive(Default)]
struct State {
    pool: Option<Arc<rayon::ThreadPool>>,
    input: Option<VideoInfo>,
    output: Option<VideoInfo>,
}

#[derive(Default)]
pub struct DColorizer {
    settings: Mutex<Settings>,
    state: Mutex<State>,
}

/// Formats a raw video format converts into.
fn converted_formats(format: &str) -> &'static [&'static str] {
    match format {
        GRAY16_LE | GRAY16_BE => &[RGB],
        RGB => &[GRAY16_LE, GRAY16_BE],
        _ => &[],
    }
}

fn structure_formats(structure: &gstreamer::StructureRef) -> Vec<String> {
    let Ok(value) = structure.value("format") else {
        return vec![GRAY16_LE.into(), GRAY16_BE.into(), RGB.into()];
    };
    if let Ok(format) = value.get::<&str>() {
        return vec![format.to_owned()];
    }
    value
        .get::<gstreamer::List>()
        .map(|formats| {
            formats
                .iter()
                .filter_map(|format| format.get::<&str>().ok().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

fn endianness(format: VideoFormat) -> Option<Endianness> {
    match format {
        VideoFormat::Gray16Le => Some(Endianness::Little),
        VideoFormat::Gray16Be => Some(Endianness::Big),
        _ => None,
    }
}

fn convert(
    codec: DepthCodec,
    input: (&VideoInfo, &[u8]),
    output: (&VideoInfo, &mut [u8]),
) -> anyhow::Result<()> {
    let (in_info, src) = input;
    let (out_info, dst) = output;
    let width = in_info.width() as usize;
    let height = in_info.height() as usize;
    let src_stride = in_info.stride()[0] as usize;
    let dst_stride = out_info.stride()[0] as usize;
    match (endianness(in_info.format()), out_info.format()) {
        (Some(src_endian), VideoFormat::Rgb) => {
            codec.colorize(src, src_stride, src_endian, dst, dst_stride, width, height)
        }
        (None, out_format) if in_info.format() == VideoFormat::Rgb => {
            let dst_endian = endianness(out_format)
                .ok_or_else(|| anyhow!("cannot decolorize into {}", out_format))?;
            codec.decolorize(src, src_stride, dst, dst_stride, dst_endian, width, height)
        }
        (_, out_format) => Err(anyhow!(
            "cannot convert {} into {}",
            in_info.format(),
            out_format
        )),
    }
}

impl DColorizer {
    fn build_pool(&self) -> anyhow::Result<rayon::ThreadPool> {
        let threads = lock(&self.settings).threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .thread_name(|index| format!("dcolorizer-{}", index))
            .build()?;
        gstreamer::debug!(CAT, imp = self, "Built pool of {} threads", pool.current_num_threads());
        Ok(pool)
    }
}

#[glib::object_subclass]
impl ObjectSubclass for DColorizer {
    const NAME: &'static str = "GstDColorizer";
    type Type = super::DColorizer;
    type ParentType = gstreamer_base::BaseTransform;
}

impl ObjectImpl for DColorizer {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            let defaults = Settings::default();
            vec![
                glib::ParamSpecUInt::builder("threads")
                    .nick("Threads")
                    .blurb("Worker threads for the conversion (0 = one per core)")
                    .default_value(defaults.threads)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("min-depth")
                    .nick("Minimum Depth")
                    .blurb("Nearest depth mapped onto the colour wheel")
                    .minimum(1)
                    .maximum(u32::from(u16::MAX) - 1)
                    .default_value(defaults.min_depth)
                    .mutable_playing()
                    .build(),
                glib::ParamSpecUInt::builder("max-depth")
                    .nick("Maximum Depth")
                    .blurb("Farthest depth mapped onto the colour wheel")
                    .minimum(2)
                    .maximum(u32::from(u16::MAX))
                    .default_value(defaults.max_depth)
                    .mutable_playing()
                    .build(),
            ]
        });
        PROPERTIES.as_ref()
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = lock(&self.settings);
        match pspec.name() {
            "threads" => {
                let threads = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing threads from {} to {}", settings.threads, threads);
                settings.threads = threads;
            }
            "min-depth" => {
                let min_depth = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing min-depth from {} to {}", settings.min_depth, min_depth);
                settings.min_depth = min_depth;
            }
            "max-depth" => {
                let max_depth = value.get().expect("type checked upstream");
                gstreamer::debug!(CAT, imp = self, "Changing max-depth from {} to {}", settings.max_depth, max_depth);
                settings.max_depth = max_depth;
            }
            _ => unimplemented!(),
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = lock(&self.settings);
        match pspec.name() {
            "threads" => settings.threads.to_value(),
            "min-depth" => settings.min_depth.to_value(),
            "max-depth" => settings.max_depth.to_value(),
            _ => unimplemented!(),
        }
    }
}

impl GstObjectImpl for DColorizer {}

impl ElementImpl for DColorizer {
    fn metadata() -> Option<&'static gstreamer::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gstreamer::subclass::ElementMetadata> = LazyLock::new(|| {
            gstreamer::subclass::ElementMetadata::new(
                "Depth Colorizer",
                "Filter/Converter/Video",
                "Encodes 16-bit depth as RGB hue video and decodes it back",
                "cAR contributors",
            )
        });
        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gstreamer::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Vec<gstreamer::PadTemplate>> = LazyLock::new(|| {
            let caps = gstreamer_video::VideoCapsBuilder::new()
                .format_list([VideoFormat::Gray16Le, VideoFormat::Gray16Be, VideoFormat::Rgb])
                .build();
            let src_pad_template = gstreamer::PadTemplate::new(
                "src",
                gstreamer::PadDirection::Src,
                gstreamer::PadPresence::Always,
                &caps,
            )
            .expect("valid src pad template");
            let sink_pad_template = gstreamer::PadTemplate::new(
                "sink",
                gstreamer::PadDirection::Sink,
                gstreamer::PadPresence::Always,
                &caps,
            )
            .expect("valid sink pad template");
            vec![src_pad_template, sink_pad_template]
        });
        PAD_TEMPLATES.as_ref()
    }

    fn change_state(
        &self,
        transition: gstreamer::StateChange,
    ) -> Result<gstreamer::StateChangeSuccess, gstreamer::StateChangeError> {
        if transition == gstreamer::StateChange::NullToReady {
            let pool = self.build_pool().map_err(|err| {
                gstreamer::element_imp_error!(
                    self,
                    gstreamer::LibraryError::Init,
                    ["Could not build thread pool: {:#}", err]
                );
                gstreamer::StateChangeError
            })?;
            lock(&self.state).pool = Some(Arc::new(pool));
        }

        let success = self.parent_change_state(transition)?;

        if transition == gstreamer::StateChange::ReadyToNull {
            *lock(&self.state) = State::default();
        }
        Ok(success)
    }
}

impl BaseTransformImpl for DColorizer {
    const MODE: BaseTransformMode = BaseTransformMode::NeverInPlace;
    const PASSTHROUGH_ON_SAME_CAPS: bool = true;
    const TRANSFORM_IP_ON_PASSTHROUGH: bool = false;

    fn transform_caps(
        &self,
        direction: gstreamer::PadDirection,
        caps: &gstreamer::Caps,
        filter: Option<&gstreamer::Caps>,
    ) -> Option<gstreamer::Caps> {
        let mut converted = gstreamer::Caps::new_empty();
        {
            let converted = converted.make_mut();
            for structure in caps.iter() {
                for format in structure_formats(structure) {
                    for target in converted_formats(&format) {
                        let mut target_structure = structure.to_owned();
                        target_structure.set("format", *target);
                        target_structure.remove_field("colorimetry");
                        target_structure.remove_field("chroma-site");
                        converted.merge_structure(target_structure);
                    }
                }
            }
        }
        // Same caps on both pads come last so conversion is preferred but passthrough stays possible.
        converted.merge(caps.clone());

        gstreamer::debug!(
            CAT,
            imp = self,
            "Transformed {} caps {} into {}",
            if direction == gstreamer::PadDirection::Sink { "sink" } else { "src" },
            caps,
            converted
        );
        Some(match filter {
            Some(filter) => filter.intersect_with_mode(&converted, gstreamer::CapsIntersectMode::First),
            None => converted,
        })
    }

    fn unit_size(&self, caps: &gstreamer::Caps) -> Option<usize> {
        VideoInfo::from_caps(caps).ok().map(|info| info.size())
    }

    fn set_caps(
        &self,
        incaps: &gstreamer::Caps,
        outcaps: &gstreamer::Caps,
    ) -> Result<(), gstreamer::LoggableError> {
        let input = VideoInfo::from_caps(incaps)
            .map_err(|_| gstreamer::loggable_error!(CAT, "Invalid input caps {}", incaps))?;
        let output = VideoInfo::from_caps(outcaps)
            .map_err(|_| gstreamer::loggable_error!(CAT, "Invalid output caps {}", outcaps))?;
        if input.width() != output.width() || input.height() != output.height() {
            return Err(gstreamer::loggable_error!(
                CAT,
                "Cannot scale {}x{} to {}x{}",
                input.width(),
                input.height(),
                output.width(),
                output.height()
            ));
        }
        gstreamer::info!(
            CAT,
            imp = self,
            "Converting {} to {} at {}x{}",
            input.format(),
            output.format(),
            input.width(),
            input.height()
        );
        let mut state = lock(&self.state);
        state.input = Some(input);
        state.output = Some(output);
        Ok(())
    }

    fn transform(
        &self,
        inbuf: &gstreamer::Buffer,
        outbuf: &mut gstreamer::BufferRef,
    ) -> Result<gstreamer::FlowSuccess, gstreamer::FlowError> {
        let (input_info, output_info, pool) = {
            let state = lock(&self.state);
            match (state.input.clone(), state.output.clone()) {
                (Some(input), Some(output)) => (input, output, state.pool.clone()),
                _ => {
                    gstreamer::element_imp_error!(
                        self,
                        gstreamer::CoreError::Negotiation,
                        ["Caps not negotiated"]
                    );
                    return Err(gstreamer::FlowError::NotNegotiated);
                }
            }
        };
        let settings = *lock(&self.settings);
        let range = DepthRange::new(settings.min_depth, settings.max_depth).map_err(|err| {
            gstreamer::element_imp_error!(self, gstreamer::LibraryError::Settings, ["{:#}", err]);
            gstreamer::FlowError::Error
        })?;
        let codec = DepthCodec::new(range);

        let input = inbuf.map_readable().map_err(|_| {
            gstreamer::element_imp_error!(
                self,
                gstreamer::CoreError::Failed,
                ["Could not map input buffer readable"]
            );
            gstreamer::FlowError::Error
        })?;
        let mut output = outbuf.map_writable().map_err(|_| {
            gstreamer::element_imp_error!(
                self,
                gstreamer::CoreError::Failed,
                ["Could not map output buffer writable"]
            );
            gstreamer::FlowError::Error
        })?;

        let src = input.as_slice();
        let dst = output.as_mut_slice();
        let converted = match pool {
            Some(pool) => pool.install(|| {
                convert(codec, (&input_info, src), (&output_info, dst))
            }),
            None => convert(codec, (&input_info, src), (&output_info, dst)),
        };
        converted.map_err(|err| {
            gstreamer::element_imp_error!(self, gstreamer::StreamError::Format, ["{:#}", err]);
            gstreamer::FlowError::Error
        })?;
        Ok(gstreamer::FlowSuccess::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_convert_to_rgb() {
        assert_eq!(converted_formats(GRAY16_LE), &[RGB]);
        assert_eq!(converted_formats(GRAY16_BE), &[RGB]);
        assert_eq!(converted_formats(RGB), &[GRAY16_LE, GRAY16_BE]);
        assert!(converted_formats("I420").is_empty());
    }

    #[test]
    fn structure_formats_reads_lists() {
        gstreamer::init().expect("gstreamer init");
        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format_list([VideoFormat::Gray16Le, VideoFormat::Rgb])
            .build();
        let structure = caps.structure(0).expect("one structure");
        assert_eq!(structure_formats(structure), vec![GRAY16_LE, RGB]);

        let any = gstreamer::Caps::builder("video/x-raw").build();
        assert_eq!(structure_formats(any.structure(0).expect("one structure")).len(), 3);
    }
}
