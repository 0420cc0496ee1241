#![cfg(feature = "dcolorizer")]

use std::sync::Once;

use gstreamer::prelude::*;
use gstreamer_video::{VideoCapsBuilder, VideoFormat};

use gstcar::depth::{hue_for_level, DepthRange, Endianness, MAX_LEVEL};

const WIDTH: i32 = 4;
const HEIGHT: i32 = 2;

fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        gstreamer::init().expect("gstreamer init");
        gstcar::plugin_register_static().expect("register elements");
    });
}

/// Pushes one frame through `appsrc ! <chain> ! appsink` and returns the output frame.
fn run_frame(chain: &str, input_format: VideoFormat, frame: Vec<u8>) -> Vec<u8> {
    init();
    let launch = format!("appsrc name=src format=time ! {} ! appsink name=sink sync=false", chain);
    let pipeline = gstreamer::parse::launch(&launch)
        .expect("parse pipeline")
        .downcast::<gstreamer::Pipeline>()
        .expect("pipeline");
    let appsrc = pipeline
        .by_name("src")
        .expect("appsrc")
        .downcast::<gstreamer_app::AppSrc>()
        .expect("appsrc type");
    let appsink = pipeline
        .by_name("sink")
        .expect("appsink")
        .downcast::<gstreamer_app::AppSink>()
        .expect("appsink type");
    appsrc.set_caps(Some(
        &VideoCapsBuilder::new()
            .format(input_format)
            .width(WIDTH)
            .height(HEIGHT)
            .framerate(gstreamer::Fraction::new(30, 1))
            .build(),
    ));

    pipeline
        .set_state(gstreamer::State::Playing)
        .expect("pipeline playing");
    let mut buffer = gstreamer::Buffer::from_mut_slice(frame);
    buffer
        .get_mut()
        .expect("unique buffer")
        .set_pts(gstreamer::ClockTime::ZERO);
    appsrc.push_buffer(buffer).expect("push frame");
    appsrc.end_of_stream().expect("end of stream");

    let sample = appsink.pull_sample().expect("output sample");
    let output = sample
        .buffer()
        .expect("sample buffer")
        .map_readable()
        .expect("readable buffer")
        .as_slice()
        .to_vec();
    pipeline
        .set_state(gstreamer::State::Null)
        .expect("pipeline stopped");
    output
}

fn depth_frame(depths: [u16; 8], endian: Endianness) -> Vec<u8> {
    depths.iter().flat_map(|depth| endian.write(*depth)).collect()
}

#[test]
fn colorizes_gray16_into_rgb() {
    let frame = depth_frame([300, 5000, 0, 100, 9000, 300, 5000, 0], Endianness::Little);
    let rgb = run_frame(
        "dcolorizer min-depth=300 max-depth=5000 ! video/x-raw,format=RGB",
        VideoFormat::Gray16Le,
        frame,
    );
    assert_eq!(rgb.len(), (WIDTH * HEIGHT * 3) as usize);
    let pixels: Vec<[u8; 3]> = rgb.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect();
    assert_eq!(pixels[0], hue_for_level(MAX_LEVEL));
    assert_eq!(pixels[1], hue_for_level(0));
    assert_eq!(pixels[2], [0, 0, 0]);
    assert_eq!(pixels[3], hue_for_level(MAX_LEVEL));
    assert_eq!(pixels[4], hue_for_level(0));
}

#[test]
fn two_colorizers_restore_depth() {
    let depths = [300, 5000, 0, 1200, 2500, 800, 4100, 650];
    let frame = depth_frame(depths, Endianness::Little);
    let restored = run_frame(
        "dcolorizer min-depth=300 max-depth=5000 ! video/x-raw,format=RGB \
         ! dcolorizer min-depth=300 max-depth=5000 ! video/x-raw,format=GRAY16_BE",
        VideoFormat::Gray16Le,
        frame,
    );
    let restored: Vec<u16> = restored
        .chunks_exact(2)
        .map(|sample| Endianness::Big.read([sample[0], sample[1]]))
        .collect();
    assert_eq!(restored[0], 300);
    assert_eq!(restored[1], 5000);
    assert_eq!(restored[2], 0);
    let step = DepthRange::new(300, 5000).expect("range").level_step();
    for (original, restored) in depths.iter().zip(&restored) {
        let depth = f64::from(*original);
        let error = (depth - f64::from(*restored)).abs();
        assert!(error <= depth * depth * step + 1.0, "{} came back as {}", original, restored);
    }
}

#[test]
fn identical_caps_pass_through() {
    let frame = depth_frame([1, 2, 3, 4, 5, 6, 7, 8], Endianness::Little);
    let output = run_frame(
        "dcolorizer ! video/x-raw,format=GRAY16_LE",
        VideoFormat::Gray16Le,
        frame.clone(),
    );
    assert_eq!(output, frame);
}

#[test]
fn inverted_range_is_an_element_error() {
    init();
    let pipeline = gstreamer::parse::launch(
        "appsrc name=src format=time ! dcolorizer min-depth=4000 max-depth=3000 \
         ! video/x-raw,format=RGB ! appsink name=sink sync=false",
    )
    .expect("parse pipeline")
    .downcast::<gstreamer::Pipeline>()
    .expect("pipeline");
    let appsrc = pipeline
        .by_name("src")
        .expect("appsrc")
        .downcast::<gstreamer_app::AppSrc>()
        .expect("appsrc type");
    appsrc.set_caps(Some(
        &VideoCapsBuilder::new()
            .format(VideoFormat::Gray16Le)
            .width(WIDTH)
            .height(HEIGHT)
            .framerate(gstreamer::Fraction::new(30, 1))
            .build(),
    ));
    pipeline
        .set_state(gstreamer::State::Playing)
        .expect("pipeline playing");
    appsrc
        .push_buffer(gstreamer::Buffer::from_mut_slice(depth_frame([1000; 8], Endianness::Little)))
        .expect("push frame");

    let bus = pipeline.bus().expect("bus");
    let error = bus.timed_pop_filtered(
        gstreamer::ClockTime::from_seconds(5),
        &[gstreamer::MessageType::Error],
    );
    assert!(error.is_some(), "expected an error message");
    pipeline
        .set_state(gstreamer::State::Null)
        .expect("pipeline stopped");
}
