use serde_json::Value;

use super::{parse_model, unsupported};
use crate::capabilities::OutputCapability;
use crate::render::model::DeckModel;
use crate::render::{layout, pptx};

/// Slide decks with a title, text lines and bullets per slide.
pub struct SlideWriter;

impl OutputCapability for SlideWriter {
    fn name(&self) -> &str {
        "pptx"
    }

    fn formats(&self) -> &[&'static str] {
        &[".pptx", ".pdf"]
    }

    fn render(&self, model: &Value, extension: &str) -> anyhow::Result<Vec<u8>> {
        let deck: DeckModel = parse_model(self.name(), model, DeckModel::element_count)?;
        match extension {
            ".pptx" => pptx::write(&deck),
            ".pdf" => Ok(layout::deck_pdf(&deck)),
            other => Err(unsupported(self.name(), other)),
        }
    }
}
