//! RGB raster drawing and PNG encoding for the `image` capability.
//!
//! Coordinates are in pixels with the origin at the top-left corner.
//! Anything drawn outside the image is clipped.

use std::io::Write;

use anyhow::{bail, Context};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use super::model::{DrawOp, ImageModel};

/// Largest accepted width or height.
pub const MAX_DIMENSION: u32 = 4096;

/// Largest text scale; one scale step is one 6x8 pixel glyph cell.
const MAX_TEXT_SCALE: i64 = 32;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub type Rgb = [u8; 3];

pub const BLACK: Rgb = [0, 0, 0];

/// Maps 0.0..=1.0 components to bytes, clamping out-of-range values.
pub fn rgb(r: f64, g: f64, b: f64) -> Rgb {
    let channel = |v: f64| if v.is_nan() { 0 } else { (v.clamp(0.0, 1.0) * 255.0).round() as u8 };
    [channel(r), channel(g), channel(b)]
}

pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, background: Rgb) -> anyhow::Result<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            bail!("image size {width}x{height} is outside 1..={MAX_DIMENSION} pixels");
        }
        let pixels = background.repeat(width as usize * height as usize);
        Ok(Self { width, height, pixels })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[at], self.pixels[at + 1], self.pixels[at + 2]])
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[at..at + 3].copy_from_slice(&color);
    }

    /// Fills the pixel span `[x0, x1) x [y0, y1)`, clipped to the image.
    fn fill_span(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        let (x0, x1) = (x0.max(0), x1.min(i64::from(self.width)));
        let (y0, y1) = (y0.max(0), y1.min(i64::from(self.height)));
        for y in y0..y1 {
            for x in x0..x1 {
                self.put(x, y, color);
            }
        }
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Rgb) {
        let (x0, x1) = ordered(x, x + width);
        let (y0, y1) = ordered(y, y + height);
        self.fill_span(to_px(x0), to_px(y0), to_px(x1), to_px(y1), color);
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, line: f64, color: Rgb) {
        let (x0, x1) = ordered(x, x + width);
        let (y0, y1) = ordered(y, y + height);
        self.line(x0, y0, x1, y0, line, color);
        self.line(x1, y0, x1, y1, line, color);
        self.line(x1, y1, x0, y1, line, color);
        self.line(x0, y1, x0, y0, line, color);
    }

    /// Bresenham line with a square brush `width` pixels across.
    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64, color: Rgb) {
        let brush = if width.is_finite() { width.round().clamp(1.0, 64.0) as i64 } else { 1 };
        let margin = brush as f64;
        let bounds = (-margin, -margin, f64::from(self.width) + margin, f64::from(self.height) + margin);
        let Some((x1, y1, x2, y2)) = clip_line(x1, y1, x2, y2, bounds) else {
            return;
        };
        let (mut x, mut y) = (to_px(x1), to_px(y1));
        let (end_x, end_y) = (to_px(x2), to_px(y2));
        let dx = (end_x - x).abs();
        let dy = -(end_y - y).abs();
        let step_x = if x < end_x { 1 } else { -1 };
        let step_y = if y < end_y { 1 } else { -1 };
        let mut err = dx + dy;
        let half = (brush - 1) / 2;
        loop {
            self.fill_span(x - half, y - half, x - half + brush, y - half + brush, color);
            if x == end_x && y == end_y {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += step_x;
            }
            if e2 <= dx {
                err += dx;
                y += step_y;
            }
        }
    }

    /// Draws `text` with its top-left corner at `(x, y)` using the built-in
    /// 5x7 font, scaled so a line is roughly `size` pixels tall.
    pub fn text(&mut self, x: f64, y: f64, size: f64, text: &str, color: Rgb) {
        let scale = if size.is_finite() { (size / 8.0).round() as i64 } else { 1 };
        let scale = scale.clamp(1, MAX_TEXT_SCALE);
        let (mut left, top) = (to_px(x), to_px(y));
        for c in text.chars() {
            if left >= i64::from(self.width) {
                break;
            }
            if left + 6 * scale > 0 {
                let rows = glyph(c);
                for (row, bits) in rows.iter().enumerate() {
                    for col in 0..5 {
                        if bits & (0x10 >> col) != 0 {
                            let px = left + col * scale;
                            let py = top + row as i64 * scale;
                            self.fill_span(px, py, px + scale, py + scale, color);
                        }
                    }
                }
            }
            left += 6 * scale;
        }
    }

    /// Encodes the raster as an 8-bit RGB PNG.
    pub fn to_png(&self) -> anyhow::Result<Vec<u8>> {
        let row_bytes = self.width as usize * 3;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        for row in self.pixels.chunks(row_bytes) {
            // filter type 0 (none) per scanline
            encoder.write_all(&[0])?;
            encoder.write_all(row)?;
        }
        let compressed = encoder.finish().context("compressing image data")?;

        let mut header = Vec::with_capacity(13);
        header.extend_from_slice(&self.width.to_be_bytes());
        header.extend_from_slice(&self.height.to_be_bytes());
        header.extend_from_slice(&[8, 2, 0, 0, 0]);

        let mut png = Vec::with_capacity(compressed.len() + 64);
        png.extend_from_slice(PNG_SIGNATURE);
        chunk(&mut png, b"IHDR", &header);
        chunk(&mut png, b"IDAT", &compressed);
        chunk(&mut png, b"IEND", &[]);
        Ok(png)
    }
}

fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Non-finite coordinates collapse to 0; `as` saturates the rest.
fn to_px(v: f64) -> i64 {
    if v.is_finite() {
        v.round() as i64
    } else {
        0
    }
}

/// Liang-Barsky clipping against `(min_x, min_y, max_x, max_y)`.
fn clip_line(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    (min_x, min_y, max_x, max_y): (f64, f64, f64, f64),
) -> Option<(f64, f64, f64, f64)> {
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (x2 - x1, y2 - y1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x1 - min_x), (dx, max_x - x1), (-dy, y1 - min_y), (dy, max_y - y1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((x1 + t0 * dx, y1 + t0 * dy, x1 + t1 * dx, y1 + t1 * dy))
}

/// Rasterizes an image model into PNG bytes.
pub fn image_png(model: &ImageModel) -> anyhow::Result<Vec<u8>> {
    let (r, g, b) = model.background;
    let mut raster = Raster::new(model.width, model.height, rgb(r, g, b))?;
    let (mut fill, mut stroke) = (BLACK, BLACK);
    for op in &model.ops {
        match op {
            DrawOp::Text { x, y, text, size, .. } => raster.text(*x, *y, *size, text, fill),
            DrawOp::Line { x1, y1, x2, y2, width } => raster.line(*x1, *y1, *x2, *y2, *width, stroke),
            DrawOp::Rect { x, y, width, height, fill: filled, stroke: stroked } => {
                if *filled {
                    raster.fill_rect(*x, *y, *width, *height, fill);
                }
                if *stroked {
                    raster.stroke_rect(*x, *y, *width, *height, 1.0, stroke);
                }
            }
            DrawOp::FillColor { r, g, b } => fill = rgb(*r, *g, *b),
            DrawOp::StrokeColor { r, g, b } => stroke = rgb(*r, *g, *b),
        }
    }
    raster.to_png()
}

/// 5x7 glyph rows, most significant of the low five bits on the left.
/// Lowercase letters use the uppercase shapes; anything unknown is a box.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        ' ' => [0; 7],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        ';' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        '=' => [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '<' => [0x02, 0x04, 0x08, 0x10, 0x08, 0x04, 0x02],
        '>' => [0x08, 0x04, 0x02, 0x01, 0x02, 0x04, 0x08],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        '$' => [0x04, 0x0F, 0x14, 0x0E, 0x05, 0x1E, 0x04],
        '&' => [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D],
        '*' => [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        '"' => [0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb = [255, 255, 255];

    #[test]
    fn test_size_limits() {
        assert!(Raster::new(0, 10, WHITE).is_err());
        assert!(Raster::new(MAX_DIMENSION + 1, 10, WHITE).is_err());
        assert!(Raster::new(MAX_DIMENSION, 1, WHITE).is_ok());
    }

    #[test]
    fn test_fill_rect_is_clipped() {
        let mut raster = Raster::new(10, 10, WHITE).unwrap();
        raster.fill_rect(-5.0, -5.0, 8.0, 8.0, BLACK);
        assert_eq!(raster.pixel(0, 0), Some(BLACK));
        assert_eq!(raster.pixel(2, 2), Some(BLACK));
        assert_eq!(raster.pixel(3, 3), Some(WHITE));
        assert_eq!(raster.pixel(10, 0), None);
    }

    #[test]
    fn test_line_endpoints_and_far_coordinates() {
        let mut raster = Raster::new(20, 20, WHITE).unwrap();
        raster.line(0.0, 0.0, 19.0, 19.0, 1.0, BLACK);
        assert_eq!(raster.pixel(0, 0), Some(BLACK));
        assert_eq!(raster.pixel(10, 10), Some(BLACK));
        assert_eq!(raster.pixel(19, 19), Some(BLACK));
        assert_eq!(raster.pixel(19, 0), Some(WHITE));

        // clipped before stepping, so this returns immediately
        raster.line(-1e12, 5.0, 1e12, 5.0, 1.0, BLACK);
        assert_eq!(raster.pixel(7, 5), Some(BLACK));
        raster.line(f64::NAN, 0.0, 5.0, 5.0, 1.0, BLACK);
    }

    #[test]
    fn test_text_marks_pixels() {
        let mut raster = Raster::new(40, 20, WHITE).unwrap();
        raster.text(1.0, 1.0, 8.0, "T", BLACK);
        // top bar of the T, then its stem
        assert_eq!(raster.pixel(1, 1), Some(BLACK));
        assert_eq!(raster.pixel(5, 1), Some(BLACK));
        assert_eq!(raster.pixel(3, 7), Some(BLACK));
        assert_eq!(raster.pixel(1, 7), Some(WHITE));
    }

    #[test]
    fn test_rgb_clamps() {
        assert_eq!(rgb(2.0, -1.0, 0.5), [255, 0, 128]);
        assert_eq!(rgb(f64::NAN, 0.0, 1.0), [0, 0, 255]);
    }

    #[test]
    fn test_png_structure() {
        let raster = Raster::new(3, 2, [255, 0, 0]).unwrap();
        let png = raster.to_png().unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes(png[16..20].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(png[20..24].try_into().unwrap()), 2);
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
        // IEND chunk CRC is fixed
        assert_eq!(&png[png.len() - 4..], &[0xAE, 0x42, 0x60, 0x82]);
    }

    #[test]
    fn test_png_pixels_round_trip_through_zlib() {
        use std::io::Read;

        let mut raster = Raster::new(2, 1, WHITE).unwrap();
        raster.fill_rect(1.0, 0.0, 1.0, 1.0, [1, 2, 3]);
        let png = raster.to_png().unwrap();
        let idat = png.windows(4).position(|w| w == b"IDAT").unwrap();
        let len = u32::from_be_bytes(png[idat - 4..idat].try_into().unwrap()) as usize;
        let mut raw = Vec::new();
        flate2::read::ZlibDecoder::new(&png[idat + 4..idat + 4 + len])
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw, vec![0, 255, 255, 255, 1, 2, 3]);
    }
}
