//! Azure Kinect DK source (`k4asrc`).
//!
//! One element instance streams one image kind of the Kinect: colour,
//! passive infrared or 16-bit depth in millimetres. Depth is usually fed
//! through `dcolorizer` so it survives lossy video encoding.

pub mod settings;

#[cfg(feature = "k4a")]
pub mod device;
#[cfg(feature = "k4a")]
mod imp;

#[cfg(feature = "k4a")]
use gstreamer::{glib, prelude::*};

#[cfg(feature = "k4a")]
glib::wrapper! {
    pub struct K4aSrc(ObjectSubclass<imp::K4aSrc>) @extends gstreamer_base::PushSrc, gstreamer_base::BaseSrc, gstreamer::Element, gstreamer::Object;
}

#[cfg(feature = "k4a")]
pub fn register(plugin: &gstreamer::Plugin) -> Result<(), glib::BoolError> {
    gstreamer::Element::register(
        Some(plugin),
        "k4asrc",
        gstreamer::Rank::NONE,
        K4aSrc::static_type(),
    )
}
