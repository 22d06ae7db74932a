use serde_json::Value;

use super::{parse_model, unsupported};
use crate::capabilities::OutputCapability;
use crate::render::model::ImageModel;
use crate::render::raster;

/// Raster images drawn with lines, rectangles and block text.
pub struct ImageWriter;

impl OutputCapability for ImageWriter {
    fn name(&self) -> &str {
        "image"
    }

    fn formats(&self) -> &[&'static str] {
        &[".png"]
    }

    fn render(&self, model: &Value, extension: &str) -> anyhow::Result<Vec<u8>> {
        let image: ImageModel = parse_model(self.name(), model, ImageModel::element_count)?;
        match extension {
            ".png" => raster::image_png(&image),
            other => Err(unsupported(self.name(), other)),
        }
    }
}
