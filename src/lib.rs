//! Deinterlace: temporal deinterlacing filter stage.
//!
//! Runs interlaced frames through a GPU effect that reconstructs the missing
//! field from the current frame and the one rendered before it.

pub mod error;
pub mod filter;
pub mod frame;
pub mod host;
pub mod output;
pub mod settings;
pub mod shader;
pub mod utils;
