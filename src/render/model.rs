//! Document models handed from scripts to the native renderers.
//!
//! The script-side capability objects build these up and pass them as JSON
//! when `save` is called. Unknown fields are ignored so the script surface
//! can grow without breaking older renderers.

use serde::Deserialize;

/// Upper bound on blocks / slides / drawing operations in one model.
pub const MAX_ELEMENTS: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading {
        text: String,
        #[serde(default = "default_heading_level")]
        level: u8,
    },
    Paragraph {
        text: String,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        italic: bool,
    },
    Bullet {
        text: String,
    },
    Table {
        rows: Vec<Vec<String>>,
    },
    PageBreak,
}

fn default_heading_level() -> u8 {
    1
}

/// Flowing word-processing document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocumentModel {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Slide {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub text: Vec<String>,
}

/// Slide deck, one entry per slide.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeckModel {
    #[serde(default)]
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Text {
        x: f64,
        y: f64,
        text: String,
        #[serde(default = "default_font")]
        font: String,
        #[serde(default = "default_font_size")]
        size: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[serde(default = "default_line_width")]
        width: f64,
    },
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default)]
        fill: bool,
        #[serde(default = "default_true")]
        stroke: bool,
    },
    FillColor {
        r: f64,
        g: f64,
        b: f64,
    },
    StrokeColor {
        r: f64,
        g: f64,
        b: f64,
    },
}

fn default_font() -> String {
    "Helvetica".to_string()
}

fn default_font_size() -> f64 {
    12.0
}

fn default_line_width() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Free-form drawing surface with explicit pages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CanvasModel {
    #[serde(default = "default_page_size")]
    pub page_size: (f64, f64),
    #[serde(default)]
    pub pages: Vec<Vec<DrawOp>>,
}

fn default_page_size() -> (f64, f64) {
    crate::render::pdf::A4
}

/// Single raster image drawn with the canvas operations, in pixels from
/// the top-left corner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageModel {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_background")]
    pub background: (f64, f64, f64),
    #[serde(default)]
    pub ops: Vec<DrawOp>,
}

fn default_background() -> (f64, f64, f64) {
    (1.0, 1.0, 1.0)
}

impl DocumentModel {
    pub fn element_count(&self) -> usize {
        self.blocks.len()
    }
}

impl DeckModel {
    pub fn element_count(&self) -> usize {
        self.slides.len()
    }
}

impl CanvasModel {
    pub fn element_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum::<usize>() + self.pages.len()
    }
}

impl ImageModel {
    pub fn element_count(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_blocks_parse() {
        let model: DocumentModel = serde_json::from_value(json!({
            "blocks": [
                {"type": "heading", "text": "Title"},
                {"type": "paragraph", "text": "Body", "bold": true},
                {"type": "bullet", "text": "item"},
                {"type": "table", "rows": [["a", "b"], ["c", "d"]]},
                {"type": "page_break"}
            ]
        }))
        .unwrap();
        assert_eq!(model.blocks.len(), 5);
        assert_eq!(
            model.blocks[0],
            Block::Heading {
                text: "Title".to_string(),
                level: 1
            }
        );
        assert_eq!(model.blocks[4], Block::PageBreak);
    }

    #[test]
    fn test_unknown_block_type_is_rejected() {
        let result: Result<DocumentModel, _> =
            serde_json::from_value(json!({"blocks": [{"type": "script", "text": "x"}]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_canvas_defaults() {
        let model: CanvasModel = serde_json::from_value(json!({
            "pages": [[{"op": "text", "x": 10, "y": 20, "text": "hi"}]]
        }))
        .unwrap();
        assert_eq!(model.page_size, crate::render::pdf::A4);
        match &model.pages[0][0] {
            DrawOp::Text { font, size, .. } => {
                assert_eq!(font, "Helvetica");
                assert_eq!(*size, 12.0);
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert_eq!(model.element_count(), 2);
    }

    #[test]
    fn test_image_defaults() {
        let model: ImageModel = serde_json::from_value(json!({
            "width": 64, "height": 32,
            "ops": [{"op": "line", "x1": 0, "y1": 0, "x2": 63, "y2": 31}]
        }))
        .unwrap();
        assert_eq!(model.background, (1.0, 1.0, 1.0));
        assert_eq!(model.element_count(), 1);
        assert!(serde_json::from_value::<ImageModel>(json!({"width": -1, "height": 1})).is_err());
    }

    #[test]
    fn test_slide_defaults() {
        let deck: DeckModel =
            serde_json::from_value(json!({"slides": [{"title": "Intro"}]})).unwrap();
        assert_eq!(deck.slides[0].title, "Intro");
        assert!(deck.slides[0].bullets.is_empty());
    }
}
