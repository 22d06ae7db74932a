//! Native renderers for the output capabilities.
//!
//! Everything here works on in-memory models and returns bytes; writing to
//! disk is left to the capability layer so confinement stays in one place.

pub mod docx;
pub mod layout;
pub mod model;
pub mod ooxml;
pub mod pdf;
pub mod pptx;
pub mod raster;
