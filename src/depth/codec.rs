use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;

/// Number of distinct hues on the full colour wheel (six segments of 255 steps).
pub const HUE_LEVELS: u16 = 1530;

/// Highest level produced by the encoder: magenta, five segments round the wheel.
/// The last segment (magenta back to red) is a guard band so that the two ends
/// of the depth range sit 255 levels apart.
pub const MAX_LEVEL: u16 = 1275;

/// Pixels whose channels sum below this carry no depth. Every encoded hue sums
/// to at least 255, so a dimmed hue still clears it.
const MIN_COLOR_ENERGY: i32 = 128;

const DEPTH_BYTES: usize = 2;
const RGB_BYTES: usize = 3;

/// Byte order of a 16-bit depth sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    pub fn read(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn write(self, value: u16) -> [u8; 2] {
        match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }
}

/// Inclusive depth limits, in the sensor's native unit (millimetres for the Kinect).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthRange {
    min: u16,
    max: u16,
}

impl DepthRange {
    /// Builds a range from property-sized values. `max` saturates at `u16::MAX`.
    pub fn new(min: u32, max: u32) -> Result<Self> {
        let max = max.min(u32::from(u16::MAX)) as u16;
        if min == 0 {
            bail!("minimum depth must be at least 1");
        }
        if min >= u32::from(max) {
            bail!("minimum depth {} must be below maximum depth {}", min, max);
        }
        Ok(Self {
            min: min as u16,
            max,
        })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn clamp(&self, depth: u16) -> u16 {
        depth.clamp(self.min, self.max)
    }

    /// Disparity of the far and near limits.
    fn disparity_bounds(&self) -> (f64, f64) {
        (1.0 / f64::from(self.max), 1.0 / f64::from(self.min))
    }

    /// Disparity covered by one hue level.
    pub fn level_step(&self) -> f64 {
        let (far, near) = self.disparity_bounds();
        (near - far) / f64::from(MAX_LEVEL)
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: u16::MAX,
        }
    }
}

/// Maps a wheel level to RGB. Level 0 is red; hues rise through yellow,
/// green, cyan and blue to magenta at [`MAX_LEVEL`].
pub fn hue_for_level(level: u16) -> [u8; 3] {
    let d = i32::from(level.min(MAX_LEVEL));
    let (r, g, b) = match d {
        0..=255 => (255, d, 0),
        256..=510 => (510 - d, 255, 0),
        511..=765 => (0, 255, d - 510),
        766..=1020 => (0, 1020 - d, 255),
        _ => (d - 1020, 0, 255),
    };
    [r as u8, g as u8, b as u8]
}

/// Inverse of [`hue_for_level`]. Returns `None` for pixels too dark to carry a hue.
///
/// Hues in the guard band between magenta and red snap to whichever end of
/// the encoded range is nearer on the wheel.
pub fn level_for_hue([r, g, b]: [u8; 3]) -> Option<u16> {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    if r + g + b < MIN_COLOR_ENERGY {
        return None;
    }
    let level = if r >= g && r >= b {
        if g >= b {
            g - b
        } else {
            g - b + i32::from(HUE_LEVELS)
        }
    } else if g >= b {
        b - r + 510
    } else {
        r - g + 1020
    };
    Some(snap_to_range(level) as u16)
}

fn snap_to_range(level: i32) -> i32 {
    let max = i32::from(MAX_LEVEL);
    if level <= max {
        return level.max(0);
    }
    if level - max < i32::from(HUE_LEVELS) - level {
        max
    } else {
        0
    }
}

/// Depth <-> colour conversion for one depth range.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthCodec {
    range: DepthRange,
}

impl DepthCodec {
    pub fn new(range: DepthRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> DepthRange {
        self.range
    }

    /// Wheel level for a depth sample, `None` when the sample is empty.
    pub fn level_for_depth(&self, depth: u16) -> Option<u16> {
        if depth == 0 {
            return None;
        }
        let (far, near) = self.range.disparity_bounds();
        let disparity = 1.0 / f64::from(self.range.clamp(depth));
        let level = ((disparity - far) / (near - far) * f64::from(MAX_LEVEL)).round();
        Some(level.clamp(0.0, f64::from(MAX_LEVEL)) as u16)
    }

    pub fn encode_depth(&self, depth: u16) -> [u8; 3] {
        match self.level_for_depth(depth) {
            Some(level) => hue_for_level(level),
            None => [0, 0, 0],
        }
    }

    pub fn decode_pixel(&self, rgb: [u8; 3]) -> u16 {
        let Some(level) = level_for_hue(rgb) else {
            return 0;
        };
        let (far, near) = self.range.disparity_bounds();
        let disparity = far + (near - far) * f64::from(level) / f64::from(MAX_LEVEL);
        let depth = (1.0 / disparity).round().clamp(0.0, f64::from(u16::MAX));
        self.range.clamp(depth as u16)
    }

    /// Converts a 16-bit depth plane into a packed RGB plane.
    #[allow(clippy::too_many_arguments)]
    pub fn colorize(
        &self,
        src: &[u8],
        src_stride: usize,
        src_endian: Endianness,
        dst: &mut [u8],
        dst_stride: usize,
        width: usize,
        height: usize,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let src_row = width * DEPTH_BYTES;
        let dst_row = width * RGB_BYTES;
        check_plane("depth", src.len(), src_stride, src_row, height)?;
        check_plane("colour", dst.len(), dst_stride, dst_row, height)?;

        src.par_chunks(src_stride)
            .zip(dst.par_chunks_mut(dst_stride))
            .take(height)
            .for_each(|(src_line, dst_line)| {
                for (sample, pixel) in src_line[..src_row]
                    .chunks_exact(DEPTH_BYTES)
                    .zip(dst_line[..dst_row].chunks_exact_mut(RGB_BYTES))
                {
                    let depth = src_endian.read([sample[0], sample[1]]);
                    pixel.copy_from_slice(&self.encode_depth(depth));
                }
            });
        Ok(())
    }

    /// Converts a packed RGB plane back into 16-bit depth.
    #[allow(clippy::too_many_arguments)]
    pub fn decolorize(
        &self,
        src: &[u8],
        src_stride: usize,
        dst: &mut [u8],
        dst_stride: usize,
        dst_endian: Endianness,
        width: usize,
        height: usize,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let src_row = width * RGB_BYTES;
        let dst_row = width * DEPTH_BYTES;
        check_plane("colour", src.len(), src_stride, src_row, height)?;
        check_plane("depth", dst.len(), dst_stride, dst_row, height)?;

        src.par_chunks(src_stride)
            .zip(dst.par_chunks_mut(dst_stride))
            .take(height)
            .for_each(|(src_line, dst_line)| {
                for (pixel, sample) in src_line[..src_row]
                    .chunks_exact(RGB_BYTES)
                    .zip(dst_line[..dst_row].chunks_exact_mut(DEPTH_BYTES))
                {
                    let depth = self.decode_pixel([pixel[0], pixel[1], pixel[2]]);
                    sample.copy_from_slice(&dst_endian.write(depth));
                }
            });
        Ok(())
    }
}

fn check_plane(what: &str, len: usize, stride: usize, row_bytes: usize, height: usize) -> Result<()> {
    if stride < row_bytes {
        bail!(
            "{} stride {} is shorter than a row of {} bytes",
            what,
            stride,
            row_bytes
        );
    }
    let needed = stride
        .checked_mul(height - 1)
        .and_then(|bytes| bytes.checked_add(row_bytes))
        .ok_or_else(|| anyhow!("{} plane dimensions overflow", what))?;
    if len < needed {
        bail!("{} plane holds {} bytes, {} needed", what, len, needed);
    }
    Ok(())
}
