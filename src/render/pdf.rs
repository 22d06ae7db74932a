//! Minimal PDF 1.4 writer.
//!
//! Supports six of the standard Type 1 fonts, text, lines, rectangles and
//! RGB colors, which is everything the output capabilities need. Content
//! streams are left uncompressed.

use std::fmt::Write as _;

/// A4 portrait, in points.
pub const A4: (f64, f64) = (595.0, 842.0);

/// Standard 14 fonts that every PDF reader ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
    HelveticaBold,
    TimesRoman,
    Courier,
    HelveticaOblique,
    HelveticaBoldOblique,
}

impl Font {
    const ALL: [Font; 6] = [
        Font::Helvetica,
        Font::HelveticaBold,
        Font::TimesRoman,
        Font::Courier,
        Font::HelveticaOblique,
        Font::HelveticaBoldOblique,
    ];

    /// Helvetica face for the given emphasis.
    pub fn helvetica(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => Font::Helvetica,
            (true, false) => Font::HelveticaBold,
            (false, true) => Font::HelveticaOblique,
            (true, true) => Font::HelveticaBoldOblique,
        }
    }

    /// Resolves a user-supplied font name, falling back to Helvetica.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.starts_with("courier") {
            Font::Courier
        } else if lower.starts_with("times") {
            Font::TimesRoman
        } else {
            let italic = lower.contains("oblique") || lower.contains("italic");
            Font::helvetica(lower.contains("bold"), italic)
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Font::Helvetica => "Helvetica",
            Font::HelveticaBold => "Helvetica-Bold",
            Font::TimesRoman => "Times-Roman",
            Font::Courier => "Courier",
            Font::HelveticaOblique => "Helvetica-Oblique",
            Font::HelveticaBoldOblique => "Helvetica-BoldOblique",
        }
    }

    fn resource_name(self) -> &'static str {
        match self {
            Font::Helvetica => "F1",
            Font::HelveticaBold => "F2",
            Font::TimesRoman => "F3",
            Font::Courier => "F4",
            Font::HelveticaOblique => "F5",
            Font::HelveticaBoldOblique => "F6",
        }
    }

    /// Rough average glyph width as a fraction of the font size. Good enough
    /// for line wrapping; exact metrics are not needed.
    pub fn average_width(self) -> f64 {
        match self {
            Font::Courier => 0.6,
            Font::HelveticaBold | Font::HelveticaBoldOblique => 0.55,
            _ => 0.5,
        }
    }
}

/// One page and its content stream.
#[derive(Debug, Clone)]
pub struct Page {
    width: f64,
    height: f64,
    content: String,
}

impl Page {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.clamp(72.0, 14_400.0),
            height: height.clamp(72.0, 14_400.0),
            content: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn text(&mut self, font: Font, size: f64, x: f64, y: f64, text: &str) {
        let _ = writeln!(
            self.content,
            "BT /{} {} Tf {} {} Td ({}) Tj ET",
            font.resource_name(),
            num(size.clamp(1.0, 400.0)),
            num(x),
            num(y),
            escape_text(text)
        );
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        let _ = writeln!(
            self.content,
            "{} w {} {} m {} {} l S",
            num(width.max(0.0)),
            num(x1),
            num(y1),
            num(x2),
            num(y2)
        );
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: bool, stroke: bool) {
        let op = match (fill, stroke) {
            (true, true) => "B",
            (true, false) => "f",
            _ => "S",
        };
        let _ = writeln!(self.content, "{} {} {} {} re {op}", num(x), num(y), num(w), num(h));
    }

    pub fn fill_color(&mut self, r: f64, g: f64, b: f64) {
        let _ = writeln!(self.content, "{} {} {} rg", unit(r), unit(g), unit(b));
    }

    pub fn stroke_color(&mut self, r: f64, g: f64, b: f64) {
        let _ = writeln!(self.content, "{} {} {} RG", unit(r), unit(g), unit(b));
    }
}

/// Collects pages and serializes them into a complete PDF file.
#[derive(Debug, Default)]
pub struct PdfDocument {
    pages: Vec<Page>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serializes the document. A document without pages gets one blank A4
    /// page so the output is always a valid file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let blank;
        let pages: &[Page] = if self.pages.is_empty() {
            blank = [Page::new(A4.0, A4.1)];
            &blank
        } else {
            &self.pages
        };

        // Object layout: 1 catalog, 2 page tree, 3.. fonts, then page/content pairs.
        let font_base = 3;
        let page_base = font_base + Font::ALL.len();
        let mut objects: Vec<Vec<u8>> = Vec::new();

        objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

        let kids: Vec<String> = (0..pages.len())
            .map(|i| format!("{} 0 R", page_base + i * 2))
            .collect();
        objects.push(
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                pages.len()
            )
            .into_bytes(),
        );

        for font in Font::ALL {
            objects.push(
                format!(
                    "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                    font.base_font()
                )
                .into_bytes(),
            );
        }

        let font_resources: String = Font::ALL
            .iter()
            .enumerate()
            .map(|(i, f)| format!("/{} {} 0 R", f.resource_name(), font_base + i))
            .collect::<Vec<_>>()
            .join(" ");

        for (i, page) in pages.iter().enumerate() {
            let content_id = page_base + i * 2 + 1;
            objects.push(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                     /Resources << /Font << {font_resources} >> >> /Contents {content_id} 0 R >>",
                    num(page.width),
                    num(page.height)
                )
                .into_bytes(),
            );
            let mut stream = format!("<< /Length {} >>\nstream\n", page.content.len()).into_bytes();
            stream.extend_from_slice(page.content.as_bytes());
            stream.extend_from_slice(b"\nendstream");
            objects.push(stream);
        }

        let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        );
        out.extend_from_slice(xref.as_bytes());
        out
    }
}

/// Formats a coordinate with at most two decimals.
fn num(v: f64) -> String {
    if !v.is_finite() || v.abs() < 0.005 {
        return "0".to_string();
    }
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn unit(v: f64) -> String {
    num(if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
}

/// Escapes a string for a PDF literal. Latin-1 characters are written as
/// octal escapes (WinAnsi), anything outside Latin-1 becomes `?`.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(c),
            '\t' => out.push(' '),
            '\u{a0}'..='\u{ff}' => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            _ => out.push('?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let pdf = PdfDocument::new().to_bytes();
        let text = as_text(&pdf);
        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(text.contains("/Count 1"));
        assert!(text.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let mut doc = PdfDocument::new();
        let mut page = Page::new(A4.0, A4.1);
        page.text(Font::Helvetica, 12.0, 72.0, 720.0, "Hello");
        doc.push(page);
        let pdf = doc.to_bytes();
        let text = as_text(&pdf);

        let xref_start = text.find("xref\n").unwrap();
        let entries: Vec<usize> = text[xref_start..]
            .lines()
            .skip(3)
            .take_while(|l| l.ends_with(" n "))
            .map(|l| l[..10].parse().unwrap())
            .collect();
        assert_eq!(entries.len(), 3 + Font::ALL.len() + 1);
        for (i, offset) in entries.iter().enumerate() {
            let expected = format!("{} 0 obj", i + 1);
            assert!(pdf[*offset..].starts_with(expected.as_bytes()), "object {} misplaced", i + 1);
        }
    }

    #[test]
    fn test_multiple_pages_are_counted() {
        let mut doc = PdfDocument::new();
        for _ in 0..3 {
            doc.push(Page::new(A4.0, A4.1));
        }
        assert!(as_text(&doc.to_bytes()).contains("/Count 3"));
    }

    #[test]
    fn test_stream_length_matches_content() {
        let mut doc = PdfDocument::new();
        let mut page = Page::new(200.0, 200.0);
        page.line(0.0, 0.0, 100.0, 100.0, 1.5);
        let expected = page.content.len();
        doc.push(page);
        assert!(as_text(&doc.to_bytes()).contains(&format!("/Length {expected}")));
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(escape_text("café"), "caf\\351");
        assert_eq!(escape_text("日本"), "??");
    }

    #[test]
    fn test_num_formatting() {
        assert_eq!(num(72.0), "72");
        assert_eq!(num(1.5), "1.5");
        assert_eq!(num(0.126), "0.13");
        assert_eq!(num(-0.001), "0");
        assert_eq!(num(f64::NAN), "0");
    }

    #[test]
    fn test_font_from_name() {
        assert_eq!(Font::from_name("Helvetica-Bold"), Font::HelveticaBold);
        assert_eq!(Font::from_name("Courier"), Font::Courier);
        assert_eq!(Font::from_name("Times-Roman"), Font::TimesRoman);
        assert_eq!(Font::from_name("Comic Sans"), Font::Helvetica);
        assert_eq!(Font::from_name("Helvetica-Oblique"), Font::HelveticaOblique);
        assert_eq!(Font::from_name("helvetica bold italic"), Font::HelveticaBoldOblique);
    }

    #[test]
    fn test_oblique_fonts_are_declared() {
        let text = as_text(&PdfDocument::new().to_bytes());
        assert!(text.contains("/F5 7 0 R"));
        assert!(text.contains("/BaseFont /Helvetica-Oblique"));
        assert!(text.contains("/BaseFont /Helvetica-BoldOblique"));
    }

    #[test]
    fn test_rect_operators() {
        let mut page = Page::new(100.0, 100.0);
        page.rect(1.0, 2.0, 3.0, 4.0, true, false);
        page.rect(1.0, 2.0, 3.0, 4.0, false, true);
        assert!(page.content.contains("1 2 3 4 re f\n"));
        assert!(page.content.contains("1 2 3 4 re S\n"));
    }
}
