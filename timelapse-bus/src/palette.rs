use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour(pub [u8; 4]);

impl Colour {
    pub const TRANSPARENT: Colour = Colour([0, 0, 0, 0]);
    pub const BLACK: Colour = Colour([0, 0, 0, 255]);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Colour([r, g, b, 255])
    }

    /// From the `0xRRGGBBAA` integers used in canvas metadata.
    pub const fn from_rgba_u32(value: u32) -> Self {
        Colour(value.to_be_bytes())
    }

    pub fn to_pixel(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

/// Palette used by the canvas when its metadata carries none.
pub const DEFAULT_PALETTE: [Colour; 32] = [
    Colour::rgb(109, 0, 26),
    Colour::rgb(190, 0, 57),
    Colour::rgb(255, 69, 0),
    Colour::rgb(255, 168, 0),
    Colour::rgb(255, 214, 53),
    Colour::rgb(255, 248, 184),
    Colour::rgb(0, 163, 104),
    Colour::rgb(0, 204, 120),
    Colour::rgb(126, 237, 86),
    Colour::rgb(0, 117, 111),
    Colour::rgb(0, 158, 170),
    Colour::rgb(0, 204, 192),
    Colour::rgb(36, 80, 164),
    Colour::rgb(54, 144, 234),
    Colour::rgb(81, 233, 244),
    Colour::rgb(73, 58, 193),
    Colour::rgb(106, 92, 255),
    Colour::rgb(148, 179, 255),
    Colour::rgb(129, 30, 159),
    Colour::rgb(180, 74, 192),
    Colour::rgb(228, 171, 255),
    Colour::rgb(222, 16, 127),
    Colour::rgb(255, 56, 129),
    Colour::rgb(255, 153, 170),
    Colour::rgb(109, 72, 47),
    Colour::rgb(156, 105, 38),
    Colour::rgb(255, 180, 112),
    Colour::rgb(0, 0, 0),
    Colour::rgb(81, 82, 82),
    Colour::rgb(137, 141, 144),
    Colour::rgb(212, 215, 217),
    Colour::rgb(255, 255, 255),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(Arc<[Colour]>);

impl Default for Palette {
    fn default() -> Self {
        Palette(Arc::from(&DEFAULT_PALETTE[..]))
    }
}

impl Palette {
    /// An empty list falls back to [`DEFAULT_PALETTE`].
    pub fn new(colours: Vec<Colour>) -> Self {
        if colours.is_empty() {
            return Self::default();
        }
        Palette(colours.into())
    }

    pub fn from_rgba_u32(values: &[u32]) -> Self {
        Self::new(values.iter().copied().map(Colour::from_rgba_u32).collect())
    }

    /// Out of range indices map to the first entry.
    pub fn colour(&self, index: u8) -> Colour {
        self.0
            .get(index as usize)
            .or_else(|| self.0.first())
            .copied()
            .unwrap_or(Colour::TRANSPARENT)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn colours(&self) -> &[Colour] {
        &self.0
    }
}

/// Expands a board of one palette index per pixel into an RGBA image.
/// Bytes past `width * height` are ignored.
pub fn decode_board(
    board: &[u8],
    width: u32,
    height: u32,
    palette: &Palette,
) -> Result<RgbaImage, JobError> {
    if width == 0 || height == 0 {
        return Err(JobError::decode(format!("canvas is {width}x{height}")));
    }
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| JobError::decode(format!("canvas {width}x{height} is too large")))?;
    if board.len() < pixels {
        return Err(JobError::decode(format!(
            "board has {} bytes, {width}x{height} needs {pixels}",
            board.len()
        )));
    }

    let mut raw = Vec::with_capacity(pixels * 4);
    for &index in &board[..pixels] {
        raw.extend_from_slice(&palette.colour(index).0);
    }
    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| JobError::decode("pixel buffer does not match dimensions"))
}

pub fn encode_png(image: &RgbaImage) -> Result<Bytes, JobError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}

pub const SWATCH_BLOCK: u32 = 128;

/// One square block per palette colour on a black background.
pub fn palette_swatch(palette: &Palette) -> RgbaImage {
    let count = palette.len().max(1) as u32;
    let cols = (count as f64).sqrt().ceil() as u32;
    let rows = count.div_ceil(cols);

    let mut image = RgbaImage::from_pixel(
        cols * SWATCH_BLOCK,
        rows * SWATCH_BLOCK,
        Colour::BLACK.to_pixel(),
    );
    for (i, colour) in palette.colours().iter().enumerate() {
        let (col, row) = (i as u32 % cols, i as u32 / cols);
        for y in 0..SWATCH_BLOCK {
            for x in 0..SWATCH_BLOCK {
                image.put_pixel(
                    col * SWATCH_BLOCK + x,
                    row * SWATCH_BLOCK + y,
                    colour.to_pixel(),
                );
            }
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_board_maps_indices() -> anyhow::Result<()> {
        let palette = Palette::from_rgba_u32(&[0xff0000ff, 0x00ff00ff]);
        let image = decode_board(&[0, 1, 7, 1, 99], 2, 2, &palette)?;

        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 255, 0, 255]);
        // out of range falls back to entry 0
        assert_eq!(image.get_pixel(0, 1).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 255, 0, 255]);
        Ok(())
    }

    #[test]
    fn test_decode_board_rejects_short_board() {
        let err = decode_board(&[0; 3], 2, 2, &Palette::default()).expect_err("short board");
        assert!(matches!(err, JobError::Decode(_)));
        assert!(decode_board(&[], 0, 4, &Palette::default()).is_err());
    }

    #[test]
    fn test_empty_palette_uses_default() {
        let palette = Palette::new(Vec::new());
        assert_eq!(palette.len(), 32);
        assert_eq!(palette.colour(31), Colour::rgb(255, 255, 255));
    }

    #[test]
    fn test_png_is_readable() -> anyhow::Result<()> {
        let image = decode_board(&[2, 5, 8, 31], 2, 2, &Palette::default())?;
        let png = encode_png(&image)?;
        let back = image::load_from_memory_with_format(&png, ImageFormat::Png)?.to_rgba8();
        assert_eq!(back, image);
        Ok(())
    }

    #[test]
    fn test_swatch_grid() {
        let swatch = palette_swatch(&Palette::default());
        // 32 colours: 6 columns, 6 rows
        assert_eq!(swatch.dimensions(), (6 * SWATCH_BLOCK, 6 * SWATCH_BLOCK));
        assert_eq!(swatch.get_pixel(SWATCH_BLOCK + 3, 5).0, [190, 0, 57, 255]);
        assert_eq!(swatch.get_pixel(5 * SWATCH_BLOCK + 1, 5 * SWATCH_BLOCK + 1).0, [0, 0, 0, 255]);
    }
}
