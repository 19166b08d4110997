//! Sprite loading and built-in defaults.
//!
//! Sprites are monochrome intensity grids. Custom sprites are loaded from the
//! JSON format produced by the glyph sprite editor:
//!
//! ```json
//! {
//!   "dimensions": { "width": 25, "height": 25 },
//!   "frames": [
//!     { "pixels": [ { "index": "3-12", "opacity": 1.0 }, ... ] }
//!   ]
//! }
//! ```
//!
//! `index` is "row-col"; opacity 0.0-1.0 scales to intensity 0-255. Only the
//! first frame is used. When no sprite file is configured, generated defaults
//! are used: a filled circle for "on", an X for "off", a border for errors.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// A monochrome intensity grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sprite {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct SpriteFile {
    dimensions: Dimensions,
    #[serde(default)]
    frames: Vec<SpriteFrame>,
}

#[derive(Debug, Deserialize)]
struct Dimensions {
    width: usize,
    height: usize,
}

#[derive(Debug, Deserialize)]
struct SpriteFrame {
    #[serde(default)]
    pixels: Vec<SpritePixel>,
}

#[derive(Debug, Deserialize)]
struct SpritePixel {
    index: String,
    opacity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum SpriteError {
    #[error("failed to read sprite file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse sprite JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid sprite: {0}")]
    Format(String),
}

impl Sprite {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpriteError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SpriteError> {
        let file: SpriteFile = serde_json::from_str(json)?;

        let width = file.dimensions.width;
        let height = file.dimensions.height;
        if width == 0 || height == 0 {
            return Err(SpriteError::Format(format!(
                "dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let mut pixels = vec![0u8; width * height];
        if let Some(first) = file.frames.first() {
            for pixel in &first.pixels {
                let Some((row, col)) = parse_index(&pixel.index) else {
                    warn!("Invalid pixel index format: {}", pixel.index);
                    continue;
                };
                if row >= height || col >= width {
                    warn!("Pixel index out of bounds: {}", pixel.index);
                    continue;
                }
                let intensity = (pixel.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
                pixels[row * width + col] = intensity;
            }
        }

        Ok(Sprite {
            width,
            height,
            pixels,
        })
    }

    /// Default "on" sprite: a filled circle
    pub fn default_on(rows: usize, cols: usize) -> Self {
        let cy = (rows as f64 - 1.0) / 2.0;
        let cx = (cols as f64 - 1.0) / 2.0;
        let radius = rows.min(cols) as f64 * 0.4;

        let mut pixels = vec![0u8; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let dy = row as f64 - cy;
                let dx = col as f64 - cx;
                if (dx * dx + dy * dy).sqrt() <= radius {
                    pixels[row * cols + col] = 255;
                }
            }
        }
        Sprite {
            width: cols,
            height: rows,
            pixels,
        }
    }

    /// Default "off" sprite: a dim X across the grid
    pub fn default_off(rows: usize, cols: usize) -> Self {
        let mut pixels = vec![0u8; rows * cols];
        let dim = rows.min(cols);
        for i in 0..dim {
            pixels[i * cols + i] = 128;
            pixels[i * cols + (dim - 1 - i)] = 128;
        }
        Sprite {
            width: cols,
            height: rows,
            pixels,
        }
    }

    /// Default error sprite: a full-intensity border
    pub fn default_error(rows: usize, cols: usize) -> Self {
        let mut pixels = vec![0u8; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                if row == 0 || row == rows - 1 || col == 0 || col == cols - 1 {
                    pixels[row * cols + col] = 255;
                }
            }
        }
        Sprite {
            width: cols,
            height: rows,
            pixels,
        }
    }
}

fn parse_index(index: &str) -> Option<(usize, usize)> {
    let (row, col) = index.split_once('-')?;
    Some((row.parse().ok()?, col.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sprite_json() {
        let json = r#"{
            "dimensions": { "width": 3, "height": 2 },
            "frames": [
                { "pixels": [
                    { "index": "0-0", "opacity": 1.0 },
                    { "index": "1-2", "opacity": 0.5 },
                    { "index": "9-9", "opacity": 1.0 },
                    { "index": "bogus", "opacity": 1.0 }
                ] }
            ]
        }"#;

        let sprite = Sprite::from_json_str(json).unwrap();
        assert_eq!((sprite.width, sprite.height), (3, 2));
        assert_eq!(sprite.pixels, vec![255, 0, 0, 0, 0, 128]);
    }

    #[test]
    fn test_only_first_frame_is_used() {
        let json = r#"{
            "dimensions": { "width": 2, "height": 1 },
            "frames": [
                { "pixels": [ { "index": "0-0", "opacity": 1.0 } ] },
                { "pixels": [ { "index": "0-1", "opacity": 1.0 } ] }
            ]
        }"#;

        let sprite = Sprite::from_json_str(json).unwrap();
        assert_eq!(sprite.pixels, vec![255, 0]);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let json = r#"{ "dimensions": { "width": 0, "height": 5 }, "frames": [] }"#;
        assert!(matches!(
            Sprite::from_json_str(json),
            Err(SpriteError::Format(_))
        ));
    }

    #[test]
    fn test_default_on_sprite_shape() {
        let sprite = Sprite::default_on(25, 25);
        // Center lit, corners dark
        assert_eq!(sprite.pixels[12 * 25 + 12], 255);
        assert_eq!(sprite.pixels[0], 0);
        assert_eq!(sprite.pixels[24 * 25 + 24], 0);
        // Symmetric left/right
        assert_eq!(sprite.pixels[12 * 25 + 2], sprite.pixels[12 * 25 + 22]);
    }

    #[test]
    fn test_default_off_sprite_is_an_x() {
        let sprite = Sprite::default_off(5, 5);
        assert_eq!(sprite.pixels[0], 128); // 0,0
        assert_eq!(sprite.pixels[4], 128); // 0,4
        assert_eq!(sprite.pixels[2 * 5 + 2], 128); // center
        assert_eq!(sprite.pixels[1], 0);
    }

    #[test]
    fn test_default_error_sprite_is_a_border() {
        let sprite = Sprite::default_error(4, 4);
        assert_eq!(sprite.pixels[0], 255);
        assert_eq!(sprite.pixels[3], 255);
        assert_eq!(sprite.pixels[1 * 4 + 0], 255);
        assert_eq!(sprite.pixels[1 * 4 + 1], 0);
    }
}
