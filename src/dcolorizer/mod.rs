//! Depth colorizer filter (`dcolorizer`).
//!
//! Converts 16-bit depth video into RGB hue video and back, so depth can be
//! carried through ordinary lossy video encoders. The conversion itself lives
//! in [`crate::depth`]; this element wires it into caps negotiation and runs
//! it on a dedicated rayon pool.

mod imp;

use gstreamer::{glib, prelude::*};

glib::wrapper! {
    pub struct DColorizer(ObjectSubclass<imp::DColorizer>) @extends gstreamer_base::BaseTransform, gstreamer::Element, gstreamer::Object;
}

pub fn register(plugin: &gstreamer::Plugin) -> Result<(), glib::BoolError> {
    gstreamer::Element::register(
        Some(plugin),
        "dcolorizer",
        gstreamer::Rank::NONE,
        DColorizer::static_type(),
    )
}
