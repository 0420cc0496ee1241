//! Ricoh Theta 360-degree camera source (`thetauvcsrc`).
//!
//! The camera streams equirectangular H.264 over UVC. The element:
//! - Selects a device by product, serial number and index when going to READY
//! - Negotiates the stream geometry with the camera when starting
//! - Copies each UVC payload into a buffer timestamped from the UVC sequence
//!
//! The element MUST NOT:
//! - Block the libusb event thread (frames are handed off through a `FrameSlot`)
//! - Decode or re-encode the H.264 stream

pub mod settings;

#[cfg(feature = "theta")]
mod imp;
#[cfg(feature = "theta")]
pub mod uvc;

#[cfg(feature = "theta")]
use gstreamer::{glib, prelude::*};

#[cfg(feature = "theta")]
glib::wrapper! {
    pub struct ThetaUvcSrc(ObjectSubclass<imp::ThetaUvcSrc>) @extends gstreamer_base::PushSrc, gstreamer_base::BaseSrc, gstreamer::Element, gstreamer::Object;
}

#[cfg(feature = "theta")]
pub fn register(plugin: &gstreamer::Plugin) -> Result<(), glib::BoolError> {
    gstreamer::Element::register(
        Some(plugin),
        "thetauvcsrc",
        gstreamer::Rank::NONE,
        ThetaUvcSrc::static_type(),
    )
}
