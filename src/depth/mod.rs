//! Depth colorization.
//!
//! 16-bit depth maps do not survive lossy video codecs: a single flipped high
//! bit moves a sample by metres. This module encodes depth as a hue on a
//! six-segment colour wheel so that codec noise only nudges the decoded
//! depth by a few levels.
//!
//! Depth is first converted to disparity (`1 / depth`), which spends more of
//! the 1276 encoded levels on near objects, then normalised between the
//! disparities of the configured far and near limits. A depth of zero means
//! "no measurement" and is encoded as black.
//!
//! The codec is responsible for:
//! - Validating the depth range before any frame is touched
//! - Converting whole frames row-parallel, honouring strides
//! - Leaving row padding untouched
//!
//! The codec MUST NOT:
//! - Panic on undersized buffers (it returns an error instead)
//! - Own a thread pool (callers pick one with `rayon::ThreadPool::install`)

mod codec;

pub use codec::{hue_for_level, level_for_hue, DepthCodec, DepthRange, Endianness, HUE_LEVELS, MAX_LEVEL};
