use anyhow::Result;

use gstcar::depth::{hue_for_level, DepthCodec, DepthRange, Endianness, MAX_LEVEL};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;

fn kinect_frame() -> Vec<u16> {
    (0..WIDTH * HEIGHT)
        .map(|index| {
            if index % 97 == 0 {
                0
            } else {
                300 + (index * 13 % 4700) as u16
            }
        })
        .collect()
}

fn to_bytes(depths: &[u16], endian: Endianness) -> Vec<u8> {
    depths.iter().flat_map(|depth| endian.write(*depth)).collect()
}

#[test]
fn frame_survives_colour_coding_within_one_level() -> Result<()> {
    let range = DepthRange::new(300, 5000)?;
    let codec = DepthCodec::new(range);
    let depths = kinect_frame();
    let raw = to_bytes(&depths, Endianness::Big);

    let mut rgb = vec![0u8; WIDTH * HEIGHT * 3];
    codec.colorize(&raw, WIDTH * 2, Endianness::Big, &mut rgb, WIDTH * 3, WIDTH, HEIGHT)?;
    let mut decoded = vec![0u8; WIDTH * HEIGHT * 2];
    codec.decolorize(&rgb, WIDTH * 3, &mut decoded, WIDTH * 2, Endianness::Little, WIDTH, HEIGHT)?;

    for (original, sample) in depths.iter().zip(decoded.chunks_exact(2)) {
        let restored = Endianness::Little.read([sample[0], sample[1]]);
        if *original == 0 {
            assert_eq!(restored, 0);
            continue;
        }
        let depth = f64::from(*original);
        let error = (depth - f64::from(restored)).abs();
        assert!(
            error <= depth * depth * range.level_step() + 1.0,
            "{} came back as {}",
            original,
            restored
        );
    }
    Ok(())
}

#[test]
fn out_of_range_depth_clamps_to_wheel_ends() -> Result<()> {
    let codec = DepthCodec::new(DepthRange::new(500, 4000)?);
    assert_eq!(codec.encode_depth(100), hue_for_level(MAX_LEVEL));
    assert_eq!(codec.encode_depth(9000), hue_for_level(0));
    assert_eq!(codec.decode_pixel(hue_for_level(0)), 4000);
    assert_eq!(codec.decode_pixel(hue_for_level(MAX_LEVEL)), 500);
    Ok(())
}

#[test]
fn oversized_maximum_saturates() -> Result<()> {
    let range = DepthRange::new(1, 1_000_000)?;
    assert_eq!(range.max(), u16::MAX);
    assert!(DepthRange::new(70_000, 80_000).is_err());
    Ok(())
}
