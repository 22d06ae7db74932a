//! Text flow and page layout for the PDF renditions of documents, decks
//! and canvases.

use super::model::{Block, CanvasModel, DeckModel, DocumentModel, DrawOp};
use super::pdf::{Font, Page, PdfDocument, A4};

const MARGIN: f64 = 56.0;

/// Landscape 4:3 slide, in points.
const SLIDE: (f64, f64) = (720.0, 540.0);

/// Greedy word wrap. Whitespace runs collapse, words longer than `width`
/// are split. Returns no lines for blank input.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        loop {
            let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
            if needed <= width {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(word.iter());
                current_len += word.len();
                break;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // Word alone is too long for a line: hard split.
            let rest = word.split_off(width);
            lines.push(word.iter().collect());
            word = rest;
            if word.is_empty() {
                break;
            }
        }
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Cursor that flows lines of text down successive pages.
struct Flow {
    doc: PdfDocument,
    page: Page,
    y: f64,
    width: f64,
    height: f64,
    paginate: bool,
}

impl Flow {
    fn new(width: f64, height: f64) -> Self {
        Self {
            doc: PdfDocument::new(),
            page: Page::new(width, height),
            y: height - MARGIN,
            width,
            height,
            paginate: true,
        }
    }

    /// A flow that never starts a new page; text past the bottom margin
    /// falls off the page.
    fn single_page(width: f64, height: f64) -> Self {
        Self {
            paginate: false,
            ..Self::new(width, height)
        }
    }

    fn usable_width(&self) -> f64 {
        self.width - 2.0 * MARGIN
    }

    fn chars_per_line(&self, font: Font, size: f64, indent: f64) -> usize {
        ((self.usable_width() - indent) / (size * font.average_width())).floor().max(1.0) as usize
    }

    fn break_page(&mut self) {
        let page = std::mem::replace(&mut self.page, Page::new(self.width, self.height));
        self.doc.push(page);
        self.y = self.height - MARGIN;
    }

    fn ensure_room(&mut self, needed: f64) {
        if self.paginate && self.y - needed < MARGIN && !self.page.is_empty() {
            self.break_page();
        }
    }

    fn paragraph(&mut self, text: &str, font: Font, size: f64, indent: f64, space_after: f64) {
        let leading = size * 1.3;
        let per_line = self.chars_per_line(font, size, indent);
        for raw_line in text.split('\n') {
            let wrapped = wrap_text(raw_line, per_line);
            if wrapped.is_empty() {
                self.y -= leading;
                continue;
            }
            for line in wrapped {
                self.ensure_room(leading);
                self.y -= size;
                self.page.text(font, size, MARGIN + indent, self.y, &line);
                self.y -= leading - size;
            }
        }
        self.y -= space_after;
    }

    fn table(&mut self, rows: &[Vec<String>]) {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        let size = 10.0;
        let row_height = size * 1.8;
        let col_width = self.usable_width() / columns as f64;
        let max_chars = ((col_width - 6.0) / (size * Font::Helvetica.average_width())).max(1.0) as usize;
        for row in rows {
            self.ensure_room(row_height);
            let top = self.y;
            for (i, cell) in row.iter().enumerate() {
                let x = MARGIN + i as f64 * col_width;
                let text: String = cell.chars().take(max_chars).collect();
                self.page.text(Font::Helvetica, size, x + 3.0, top - size - 3.0, &text);
                self.page.rect(x, top - row_height, col_width, row_height, false, true);
            }
            self.y -= row_height;
        }
        self.y -= 8.0;
    }

    fn finish(mut self) -> PdfDocument {
        if !self.page.is_empty() || self.doc.page_count() == 0 {
            self.doc.push(self.page);
        }
        self.doc
    }
}

/// Lays a flowing document out on A4 pages.
pub fn document_pdf(model: &DocumentModel) -> Vec<u8> {
    let mut flow = Flow::new(A4.0, A4.1);
    for block in &model.blocks {
        match block {
            Block::Heading { text, level } => {
                let size = match level {
                    0 | 1 => 20.0,
                    2 => 16.0,
                    _ => 13.0,
                };
                flow.ensure_room(size * 3.0);
                flow.y -= size * 0.4;
                flow.paragraph(text, Font::HelveticaBold, size, 0.0, size * 0.4);
            }
            Block::Paragraph { text, bold, italic } => {
                flow.paragraph(text, Font::helvetica(*bold, *italic), 11.0, 0.0, 6.0);
            }
            Block::Bullet { text } => {
                flow.paragraph(&format!("\u{b7} {text}"), Font::Helvetica, 11.0, 14.0, 2.0);
            }
            Block::Table { rows } => flow.table(rows),
            Block::PageBreak => flow.break_page(),
        }
    }
    flow.finish().to_bytes()
}

/// One landscape page per slide.
pub fn deck_pdf(model: &DeckModel) -> Vec<u8> {
    let mut doc = PdfDocument::new();
    for slide in &model.slides {
        let mut flow = Flow::single_page(SLIDE.0, SLIDE.1);
        if !slide.title.is_empty() {
            flow.paragraph(&slide.title, Font::HelveticaBold, 28.0, 0.0, 18.0);
        }
        for line in &slide.text {
            flow.paragraph(line, Font::Helvetica, 18.0, 0.0, 6.0);
        }
        for bullet in &slide.bullets {
            flow.paragraph(&format!("\u{b7} {bullet}"), Font::Helvetica, 18.0, 18.0, 6.0);
        }
        doc.push(flow.page);
    }
    doc.to_bytes()
}

/// Replays canvas drawing operations page by page.
pub fn canvas_pdf(model: &CanvasModel) -> Vec<u8> {
    let (width, height) = model.page_size;
    let mut doc = PdfDocument::new();
    for ops in &model.pages {
        let mut page = Page::new(width, height);
        for op in ops {
            match op {
                DrawOp::Text { x, y, text, font, size } => {
                    page.text(Font::from_name(font), *size, *x, *y, text)
                }
                DrawOp::Line { x1, y1, x2, y2, width } => page.line(*x1, *y1, *x2, *y2, *width),
                DrawOp::Rect { x, y, width, height, fill, stroke } => {
                    page.rect(*x, *y, *width, *height, *fill, *stroke)
                }
                DrawOp::FillColor { r, g, b } => page.fill_color(*r, *g, *b),
                DrawOp::StrokeColor { r, g, b } => page.stroke_color(*r, *g, *b),
            }
        }
        doc.push(page);
    }
    doc.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::model::Slide;

    fn page_count(pdf: &[u8]) -> usize {
        let text = String::from_utf8_lossy(pdf);
        let start = text.find("/Count ").unwrap() + 7;
        text[start..]
            .split_whitespace()
            .next()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_wrap_text_basic() {
        assert_eq!(
            wrap_text("the quick brown fox jumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
    }

    #[test]
    fn test_wrap_text_blank() {
        assert!(wrap_text("   \n\t ", 10).is_empty());
    }

    #[test]
    fn test_wrap_text_splits_long_words() {
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("ab abcdefgh", 4), vec!["ab", "abcd", "efgh"]);
    }

    #[test]
    fn test_wrap_text_zero_width() {
        assert_eq!(wrap_text("ab", 0), vec!["a", "b"]);
    }

    #[test]
    fn test_document_page_break_creates_pages() {
        let model = DocumentModel {
            blocks: vec![
                Block::Paragraph { text: "one".into(), bold: false, italic: false },
                Block::PageBreak,
                Block::Paragraph { text: "two".into(), bold: false, italic: false },
            ],
        };
        assert_eq!(page_count(&document_pdf(&model)), 2);
    }

    #[test]
    fn test_paragraph_emphasis_selects_font() {
        let model = DocumentModel {
            blocks: vec![
                Block::Paragraph { text: "slanted".into(), bold: false, italic: true },
                Block::Paragraph { text: "both".into(), bold: true, italic: true },
            ],
        };
        let text = String::from_utf8_lossy(&document_pdf(&model)).into_owned();
        assert!(text.contains("/F5 11 Tf"));
        assert!(text.contains("(slanted) Tj"));
        assert!(text.contains("/F6 11 Tf"));
    }

    #[test]
    fn test_long_document_overflows() {
        let blocks = (0..200)
            .map(|i| Block::Paragraph { text: format!("Paragraph number {i}"), bold: false, italic: false })
            .collect();
        let pdf = document_pdf(&DocumentModel { blocks });
        assert!(page_count(&pdf) > 1);
    }

    #[test]
    fn test_empty_document_is_one_page() {
        assert_eq!(page_count(&document_pdf(&DocumentModel::default())), 1);
    }

    #[test]
    fn test_deck_one_page_per_slide() {
        let deck = DeckModel {
            slides: vec![
                Slide { title: "A".into(), bullets: vec!["x".into()], text: vec![] },
                Slide { title: "B".into(), bullets: vec![], text: vec!["y".into()] },
            ],
        };
        let pdf = deck_pdf(&deck);
        assert_eq!(page_count(&pdf), 2);
        assert!(String::from_utf8_lossy(&pdf).contains("(A) Tj"));
    }

    #[test]
    fn test_canvas_replays_ops() {
        let model = CanvasModel {
            page_size: (300.0, 200.0),
            pages: vec![vec![
                DrawOp::FillColor { r: 1.0, g: 0.0, b: 0.0 },
                DrawOp::Text { x: 10.0, y: 20.0, text: "Hi".into(), font: "Courier".into(), size: 14.0 },
            ]],
        };
        let text = String::from_utf8_lossy(&canvas_pdf(&model)).into_owned();
        assert!(text.contains("/MediaBox [0 0 300 200]"));
        assert!(text.contains("1 0 0 rg"));
        assert!(text.contains("BT /F4 14 Tf 10 20 Td (Hi) Tj ET"));
    }
}
