use chrono::DateTime;
use image::RgbaImage;

use crate::error::JobError;
use crate::palette::Colour;

/// Draws the per-snapshot date frame that is layered over the timelapse.
pub trait OverlayRenderer: Send + Sync {
    fn render_date(&self, unix_seconds: i64) -> Result<RgbaImage, JobError>;
}

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

// 5x7 bitmaps, one row per byte, most significant of the low five bits is the left column.
fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f],
        '3' => [0x1f, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0c, 0x0c, 0x00, 0x0c, 0x0c, 0x00],
        _ => [0; 7],
    }
}

/// Bitmap-font renderer producing `yyyy-MM-dd HH:mm` in white with a drop shadow.
#[derive(Debug, Clone)]
pub struct GlyphOverlay {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
    pub colour: Colour,
    pub shadow: Colour,
}

impl Default for GlyphOverlay {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 128,
            scale: 12,
            colour: Colour([255, 255, 255, 255]),
            shadow: Colour([0, 0, 0, 160]),
        }
    }
}

impl GlyphOverlay {
    pub fn draw_text(&self, text: &str) -> RgbaImage {
        let mut image = RgbaImage::new(self.width, self.height);
        let advance = (GLYPH_W + 1) * self.scale;
        let text_w = (text.chars().count() as u32 * advance).saturating_sub(self.scale);
        let text_h = GLYPH_H * self.scale;
        let x0 = self.width.saturating_sub(text_w) / 2;
        let y0 = self.height.saturating_sub(text_h) / 2;
        let offset = (self.scale / 4).max(1);

        // shadow first, text on top
        for (colour, dx) in [(self.shadow, offset), (self.colour, 0)] {
            for (i, c) in text.chars().enumerate() {
                let gx = x0 + i as u32 * advance + dx;
                self.draw_glyph(&mut image, glyph(c), gx, y0 + dx, colour);
            }
        }
        image
    }

    fn draw_glyph(&self, image: &mut RgbaImage, rows: [u8; 7], x: u32, y: u32, colour: Colour) {
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = x + col * self.scale;
                let py = y + row as u32 * self.scale;
                for sy in py..(py + self.scale).min(image.height()) {
                    for sx in px..(px + self.scale).min(image.width()) {
                        image.put_pixel(sx, sy, colour.to_pixel());
                    }
                }
            }
        }
    }
}

impl OverlayRenderer for GlyphOverlay {
    fn render_date(&self, unix_seconds: i64) -> Result<RgbaImage, JobError> {
        let date = DateTime::from_timestamp(unix_seconds, 0)
            .ok_or_else(|| JobError::decode(format!("date {unix_seconds} is out of range")))?;
        Ok(self.draw_text(&date.format("%Y-%m-%d %H:%M").to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_frame() -> anyhow::Result<()> {
        let overlay = GlyphOverlay::default();
        let image = overlay.render_date(1_690_000_000)?;
        assert_eq!(image.dimensions(), (1280, 128));

        let opaque = image.pixels().filter(|p| p.0 == [255, 255, 255, 255]).count();
        assert!(opaque > 0);
        // corners stay transparent
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
        assert_eq!(image.get_pixel(1279, 127).0[3], 0);
        Ok(())
    }

    #[test]
    fn test_out_of_range_date() {
        assert!(GlyphOverlay::default().render_date(i64::MAX).is_err());
    }
}
