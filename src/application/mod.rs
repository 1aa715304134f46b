//! Application layer: the rendering pipeline and its error surface.

pub mod error;
pub mod render;
