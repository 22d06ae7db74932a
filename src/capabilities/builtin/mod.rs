pub mod canvas;
pub mod document;
pub mod image;
pub mod slides;

pub use canvas::CanvasWriter;
pub use document::DocumentWriter;
pub use image::ImageWriter;
pub use slides::SlideWriter;

use anyhow::{anyhow, bail, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::render::model::MAX_ELEMENTS;

/// Decodes a script-built model and enforces the element cap.
fn parse_model<T: DeserializeOwned>(
    capability: &str,
    model: &Value,
    count: impl Fn(&T) -> usize,
) -> Result<T> {
    let parsed: T = serde_json::from_value(model.clone())
        .map_err(|e| anyhow!("invalid {capability} model: {e}"))?;
    let elements = count(&parsed);
    if elements > MAX_ELEMENTS {
        bail!("{capability} model has {elements} elements (max {MAX_ELEMENTS})");
    }
    Ok(parsed)
}

fn unsupported(capability: &str, extension: &str) -> anyhow::Error {
    anyhow!("{capability} cannot render '{extension}' files")
}
