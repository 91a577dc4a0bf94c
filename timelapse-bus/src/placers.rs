use std::collections::HashMap;

use image::RgbaImage;

use crate::error::JobError;
use crate::palette::Colour;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placer {
    pub int_id: u32,
    pub chat_name: String,
    pub pixels_placed: u32,
    pub colour: Colour,
}

impl Placer {
    pub fn new(int_id: u32, chat_name: String, pixels_placed: u32) -> Self {
        let colour = colour_hash(&chat_name);
        Self {
            int_id,
            chat_name,
            pixels_placed,
            colour,
        }
    }
}

/// Big-endian `u32` user id per pixel. A trailing partial word is ignored.
pub fn parse_placers(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(4)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        .collect()
}

/// Pixel counts per user id, highest first. Ties break on the lower id and id 0
/// (never placed) is not counted.
pub fn rank_placers(placers: &[u32]) -> Vec<(u32, u32)> {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for &id in placers.iter().filter(|&&id| id != 0) {
        *counts.entry(id).or_default() += 1;
    }
    let mut ranked = counts.into_iter().collect::<Vec<_>>();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Stable per-name colour.
pub fn colour_hash(text: &str) -> Colour {
    let hash = text
        .bytes()
        .fold(0u32, |hash, c| hash.wrapping_mul(31).wrapping_add(c as u32));
    Colour(hash.to_be_bytes())
}

/// Paints every pixel owned by one of `top` in that placer's colour, the rest transparent.
pub fn render_canvas_control(
    placers: &[u32],
    width: u32,
    height: u32,
    top: &[Placer],
) -> Result<RgbaImage, JobError> {
    let pixels = (width as usize) * (height as usize);
    if pixels == 0 || placers.len() < pixels {
        return Err(JobError::decode(format!(
            "placers has {} entries, {width}x{height} needs {pixels}",
            placers.len()
        )));
    }

    let colours = top
        .iter()
        .map(|p| (p.int_id, p.colour))
        .collect::<HashMap<_, _>>();
    let mut image = RgbaImage::new(width, height);
    for (i, id) in placers[..pixels].iter().enumerate() {
        if let Some(colour) = colours.get(id) {
            let i = i as u32;
            image.put_pixel(i % width, i / width, colour.to_pixel());
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_big_endian_ids() {
        assert_eq!(parse_placers(&[0, 0, 0, 7, 0, 0, 1, 0, 9]), vec![7, 256]);
    }

    #[test]
    fn test_rank_orders_by_count() {
        let ranked = rank_placers(&[3, 1, 3, 0, 0, 0, 2, 2, 3]);
        assert_eq!(ranked, vec![(3, 3), (2, 2), (1, 1)]);
    }

    #[test]
    fn test_colour_hash() {
        assert_eq!(colour_hash("a"), Colour([0, 0, 0, 97]));
        // 'a' * 31 + 'b' = 3105 = 0x0c21
        assert_eq!(colour_hash("ab"), Colour([0, 0, 0x0c, 0x21]));
        assert_eq!(colour_hash("zekiah"), colour_hash("zekiah"));
    }

    #[test]
    fn test_canvas_control_paints_top_placers_only() -> anyhow::Result<()> {
        let top = vec![Placer {
            int_id: 5,
            chat_name: "five".to_string(),
            pixels_placed: 2,
            colour: Colour([1, 2, 3, 255]),
        }];
        let image = render_canvas_control(&[5, 6, 0, 5], 2, 2, &top)?;
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(1, 1).0, [1, 2, 3, 255]);

        assert!(render_canvas_control(&[5, 6], 2, 2, &top).is_err());
        Ok(())
    }
}
