//! depth_colorize - offline depth colour coding
//!
//! Converts raw, tightly packed 16-bit depth frames into the hue-coded RGB
//! frames `dcolorizer` produces, and back. Input files may hold any number
//! of frames back to back.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use gstcar::depth::{DepthCodec, DepthRange, Endianness};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode GRAY16 depth frames as packed RGB.
    Colorize(Conversion),
    /// Decode packed RGB frames back into GRAY16 depth.
    Decolorize(Conversion),
}

#[derive(clap::Args, Debug)]
struct Conversion {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    width: usize,
    #[arg(long)]
    height: usize,
    /// Nearest depth on the colour wheel, in sensor units (millimetres for the Kinect).
    #[arg(long, default_value_t = 1)]
    min_depth: u32,
    /// Farthest depth on the colour wheel.
    #[arg(long, default_value_t = 65535)]
    max_depth: u32,
    /// Depth samples are big-endian (GRAY16_BE) instead of little-endian.
    #[arg(long)]
    big_endian: bool,
}

const DEPTH_BYTES: usize = 2;
const RGB_BYTES: usize = 3;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Colorize(args) => convert(args, true),
        Command::Decolorize(args) => convert(args, false),
    }
}

fn frame_bytes(args: &Conversion, bytes_per_pixel: usize) -> Result<usize> {
    args.width
        .checked_mul(args.height)
        .and_then(|pixels| pixels.checked_mul(bytes_per_pixel))
        .ok_or_else(|| anyhow!("{}x{} frames are too large", args.width, args.height))
}

fn convert(args: &Conversion, colorize: bool) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        bail!("width and height must be >= 1");
    }
    let codec = DepthCodec::new(DepthRange::new(args.min_depth, args.max_depth)?);
    let endian = if args.big_endian {
        Endianness::Big
    } else {
        Endianness::Little
    };
    let (in_bpp, out_bpp) = if colorize {
        (DEPTH_BYTES, RGB_BYTES)
    } else {
        (RGB_BYTES, DEPTH_BYTES)
    };
    let in_frame = frame_bytes(args, in_bpp)?;
    let out_frame = frame_bytes(args, out_bpp)?;

    let input = fs::read(&args.input).with_context(|| format!("read {}", args.input.display()))?;
    if input.is_empty() || input.len() % in_frame != 0 {
        bail!(
            "{} holds {} bytes, not a whole number of {}x{} frames of {} bytes",
            args.input.display(),
            input.len(),
            args.width,
            args.height,
            in_frame
        );
    }
    let frames = input.len() / in_frame;
    let mut output = vec![0u8; frames * out_frame];

    for (src, dst) in input
        .chunks_exact(in_frame)
        .zip(output.chunks_exact_mut(out_frame))
    {
        if colorize {
            codec.colorize(
                src,
                args.width * DEPTH_BYTES,
                endian,
                dst,
                args.width * RGB_BYTES,
                args.width,
                args.height,
            )?;
        } else {
            codec.decolorize(
                src,
                args.width * RGB_BYTES,
                dst,
                args.width * DEPTH_BYTES,
                endian,
                args.width,
                args.height,
            )?;
        }
    }

    fs::write(&args.output, &output)
        .with_context(|| format!("write {}", args.output.display()))?;
    log::info!(
        "{} {} frame(s) of {}x{} (depth {}..={}) into {}",
        if colorize { "colorized" } else { "decolorized" },
        frames,
        args.width,
        args.height,
        codec.range().min(),
        codec.range().max(),
        args.output.display()
    );
    Ok(())
}
