//! Renderable frames for the glyph matrix.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sprite::Sprite;

/// Animation tag attached to a frame. The display binding decides how to
/// interpret it; the core only carries it through.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Animation {
    #[default]
    Static,
    Pulse,
    Scroll,
}

/// One renderable snapshot for the glyph matrix: a fixed-dimension grid of
/// intensity values (0-255) plus an animation tag and duration hint.
///
/// Frames are immutable once constructed and compare byte-for-byte, which the
/// engine relies on to suppress duplicate pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: usize,
    cols: usize,
    pixels: Vec<u8>,
    pub animation: Animation,
    pub duration_hint: Option<Duration>,
}

impl Frame {
    /// An all-zero frame: the defined default when no rule has data to show
    pub fn blank(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            pixels: vec![0; rows * cols],
            animation: Animation::Static,
            duration_hint: None,
        }
    }

    pub fn from_pixels(rows: usize, cols: usize, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), rows * cols);
        Self {
            rows,
            cols,
            pixels,
            animation: Animation::Static,
            duration_hint: None,
        }
    }

    pub fn from_sprite(sprite: &Sprite) -> Self {
        Self::from_pixels(sprite.height, sprite.width, sprite.pixels.clone())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.pixels[row * self.cols + col]
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&p| p == 0)
    }

    /// Per-cell maximum of two frames of equal dimensions. Animation and
    /// duration hint are taken from `self`.
    pub fn max_with(&self, other: &Frame) -> Frame {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        let pixels = self
            .pixels
            .iter()
            .zip(other.pixels.iter())
            .map(|(&a, &b)| a.max(b))
            .collect();
        Frame {
            rows: self.rows,
            cols: self.cols,
            pixels,
            animation: self.animation,
            duration_hint: self.duration_hint,
        }
    }

    /// ASCII rendering for logs and tests: `.` dark through `#` full intensity
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((self.cols + 1) * self.rows);
        for row in 0..self.rows {
            if row > 0 {
                out.push('\n');
            }
            for col in 0..self.cols {
                out.push(match self.get(row, col) {
                    0 => '.',
                    1..=84 => '+',
                    85..=169 => '*',
                    _ => '#',
                });
            }
        }
        out
    }
}
