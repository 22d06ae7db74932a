use serde_json::Value;

use super::{parse_model, unsupported};
use crate::capabilities::OutputCapability;
use crate::render::layout;
use crate::render::model::CanvasModel;

/// Free-form PDF drawing: text at coordinates, lines, rectangles, colors.
pub struct CanvasWriter;

impl OutputCapability for CanvasWriter {
    fn name(&self) -> &str {
        "canvas"
    }

    fn formats(&self) -> &[&'static str] {
        &[".pdf"]
    }

    fn render(&self, model: &Value, extension: &str) -> anyhow::Result<Vec<u8>> {
        let canvas: CanvasModel = parse_model(self.name(), model, CanvasModel::element_count)?;
        match extension {
            ".pdf" => Ok(layout::canvas_pdf(&canvas)),
            other => Err(unsupported(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_renders_drawn_text() {
        let model = json!({
            "page_size": [200, 100],
            "pages": [[{"op": "text", "x": 5, "y": 5, "text": "Hello"}]]
        });
        let bytes = CanvasWriter.render(&model, ".pdf").unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("(Hello) Tj"));
        assert!(text.contains("/MediaBox [0 0 200 100]"));
    }

    #[test]
    fn test_canvas_only_renders_pdf() {
        let err = CanvasWriter.render(&json!({}), ".png").unwrap_err();
        assert!(err.to_string().contains("'.png'"));
    }
}
