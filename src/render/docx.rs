//! WordprocessingML (.docx) writer.
//!
//! Produces the smallest package Word and LibreOffice open cleanly: content
//! types, the package relationship and a single document part. Headings use
//! direct run formatting, so no styles part is needed.

use anyhow::Result;

use super::model::{Block, DocumentModel};
use super::ooxml::{esc, relationship, relationships, Package, REL_OFFICE_DOCUMENT};

const CONTENT_TYPES: &str = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

pub fn write(model: &DocumentModel) -> Result<Vec<u8>> {
    let mut body = String::new();
    for block in &model.blocks {
        match block {
            Block::Heading { text, level } => {
                // Half-points: 32 = 16pt, 28 = 14pt, 24 = 12pt
                let size = match level {
                    0 | 1 => 32,
                    2 => 28,
                    _ => 24,
                };
                body.push_str(&paragraph(text, true, false, Some(size)));
            }
            Block::Paragraph { text, bold, italic } => {
                body.push_str(&paragraph(text, *bold, *italic, None));
            }
            Block::Bullet { text } => {
                body.push_str(&format!(
                    r#"<w:p><w:pPr><w:ind w:left="360" w:hanging="360"/></w:pPr>{}</w:p>"#,
                    run(&format!("\u{2022}\t{text}"), false, false, None)
                ));
            }
            Block::Table { rows } => body.push_str(&table(rows)),
            Block::PageBreak => body.push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#),
        }
    }

    let document = format!(
        r#"<w:document xmlns:w="{W_NS}"><w:body>{body}<w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1134" w:right="1134" w:bottom="1134" w:left="1134" w:header="709" w:footer="709" w:gutter="0"/></w:sectPr></w:body></w:document>"#
    );

    let mut pkg = Package::new();
    pkg.part("[Content_Types].xml", CONTENT_TYPES)?;
    pkg.part(
        "_rels/.rels",
        &relationships(&[relationship("rId1", REL_OFFICE_DOCUMENT, "word/document.xml")]),
    )?;
    pkg.part("word/document.xml", &document)?;
    pkg.finish()
}

/// One paragraph; embedded newlines become line breaks within it.
fn paragraph(text: &str, bold: bool, italic: bool, size: Option<u32>) -> String {
    format!("<w:p>{}</w:p>", run(text, bold, italic, size))
}

fn run(text: &str, bold: bool, italic: bool, size: Option<u32>) -> String {
    let mut props = String::new();
    if bold {
        props.push_str("<w:b/>");
    }
    if italic {
        props.push_str("<w:i/>");
    }
    if let Some(size) = size {
        props.push_str(&format!(r#"<w:sz w:val="{size}"/>"#));
    }
    let props = if props.is_empty() {
        String::new()
    } else {
        format!("<w:rPr>{props}</w:rPr>")
    };

    let mut content = String::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            content.push_str("<w:br/>");
        }
        for (j, segment) in line.split('\t').enumerate() {
            if j > 0 {
                content.push_str("<w:tab/>");
            }
            if !segment.is_empty() {
                content.push_str(&format!(r#"<w:t xml:space="preserve">{}</w:t>"#, esc(segment)));
            }
        }
    }
    format!("<w:r>{props}{content}</w:r>")
}

fn table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }
    // Usable width of A4 with the margins above, in twentieths of a point.
    let col_width = 9638 / columns;
    let border = r#"w:val="single" w:sz="4" w:space="0" w:color="auto""#;
    let mut xml = format!(
        r#"<w:tbl><w:tblPr><w:tblW w:w="0" w:type="auto"/><w:tblBorders><w:top {border}/><w:left {border}/><w:bottom {border}/><w:right {border}/><w:insideH {border}/><w:insideV {border}/></w:tblBorders></w:tblPr><w:tblGrid>"#
    );
    for _ in 0..columns {
        xml.push_str(&format!(r#"<w:gridCol w:w="{col_width}"/>"#));
    }
    xml.push_str("</w:tblGrid>");
    for row in rows {
        xml.push_str("<w:tr>");
        for i in 0..columns {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            xml.push_str(&format!(
                r#"<w:tc><w:tcPr><w:tcW w:w="{col_width}" w:type="dxa"/></w:tcPr>{}</w:tc>"#,
                paragraph(cell, false, false, None)
            ));
        }
        xml.push_str("</w:tr>");
    }
    xml.push_str("</w:tbl>");
    // A table must be followed by a paragraph before the section properties.
    xml.push_str("<w:p/>");
    xml
}
