//! cAR GStreamer plugins
//!
//! Video sources and filters for the cameras used by the cAR remote-driving
//! rig, built both as a regular library and as the GStreamer plugin `car`.
//!
//! # Elements
//!
//! - `thetauvcsrc`: H.264 360-degree video from a Ricoh Theta V or Z1 (feature `theta`)
//! - `k4asrc`: colour, passive IR or depth from an Azure Kinect DK (feature `k4a`)
//! - `dcolorizer`: 16-bit depth to RGB hue video and back (feature `dcolorizer`)
//!
//! # Module Structure
//!
//! - `depth`: the hue codec behind `dcolorizer`, usable without GStreamer
//! - `frame`: handoff between device threads and the streaming thread
//! - `theta::settings`, `k4a::settings`: element property semantics
//! - `config`, `pipeline`: configuration and pipeline rendering for `car_streamd`

pub mod config;
pub mod depth;
pub mod frame;
pub mod k4a;
pub mod pipeline;
pub mod theta;

#[cfg(feature = "dcolorizer")]
pub mod dcolorizer;

#[cfg(feature = "gst")]
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks element state, recovering it if a streaming thread panicked while holding it.
#[cfg(feature = "gst")]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(feature = "gst")]
#[allow(unused_variables)]
fn plugin_init(plugin: &gstreamer::Plugin) -> Result<(), gstreamer::glib::BoolError> {
    #[cfg(feature = "dcolorizer")]
    dcolorizer::register(plugin)?;
    #[cfg(feature = "theta")]
    theta::register(plugin)?;
    #[cfg(feature = "k4a")]
    k4a::register(plugin)?;
    Ok(())
}

#[cfg(feature = "gst")]
gstreamer::plugin_define!(
    car,
    "Video sources and filters for cAR cameras",
    plugin_init,
    env!("CARGO_PKG_VERSION"),
    "BSD",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY")
);
