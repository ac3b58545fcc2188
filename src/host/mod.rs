//! Hosts that drive filters outside of a live scene graph.

mod offscreen;

pub use offscreen::OffscreenHost;
