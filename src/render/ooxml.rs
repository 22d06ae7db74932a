//! Shared plumbing for Office Open XML packages (docx, pptx): a zip
//! container with deflated XML parts.

use std::borrow::Cow;
use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

pub const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";

/// An in-memory OPC package under construction.
pub struct Package {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl Package {
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Adds an XML part; the XML declaration is prepended.
    pub fn part(&mut self, name: &str, xml: &str) -> Result<()> {
        self.zip
            .start_file(name, self.options)
            .with_context(|| format!("starting package part {name}"))?;
        self.zip.write_all(XML_DECLARATION.as_bytes())?;
        self.zip.write_all(b"\n")?;
        self.zip.write_all(xml.as_bytes())?;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let cursor = self.zip.finish().context("finalizing package")?;
        Ok(cursor.into_inner())
    }
}

/// Escapes text for element content and attribute values, dropping
/// characters XML 1.0 cannot represent.
pub fn esc(text: &str) -> String {
    let cleaned: Cow<'_, str> = if text.chars().any(is_invalid_xml_char) {
        Cow::Owned(text.chars().filter(|c| !is_invalid_xml_char(*c)).collect())
    } else {
        Cow::Borrowed(text)
    };
    quick_xml::escape::escape(cleaned.as_ref()).into_owned()
}

fn is_invalid_xml_char(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}')
}

/// A `<Relationship>` entry.
pub fn relationship(id: &str, rel_type: &str, target: &str) -> String {
    format!(r#"<Relationship Id="{id}" Type="{rel_type}" Target="{target}"/>"#)
}

/// Wraps relationship entries in a `<Relationships>` part.
pub fn relationships(entries: &[String]) -> String {
    format!(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        entries.concat()
    )
}
