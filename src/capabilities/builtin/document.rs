use serde_json::Value;

use super::{parse_model, unsupported};
use crate::capabilities::OutputCapability;
use crate::render::model::DocumentModel;
use crate::render::{docx, layout};

/// Word-processing documents: headings, paragraphs, bullets, tables.
pub struct DocumentWriter;

impl OutputCapability for DocumentWriter {
    fn name(&self) -> &str {
        "docx"
    }

    fn formats(&self) -> &[&'static str] {
        &[".docx", ".pdf"]
    }

    fn render(&self, model: &Value, extension: &str) -> anyhow::Result<Vec<u8>> {
        let doc: DocumentModel = parse_model(self.name(), model, DocumentModel::element_count)?;
        match extension {
            ".docx" => docx::write(&doc),
            ".pdf" => Ok(layout::document_pdf(&doc)),
            other => Err(unsupported(self.name(), other)),
        }
    }
}
