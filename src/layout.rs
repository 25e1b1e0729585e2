use serde::{Deserialize, Serialize};

use crate::model::{Block, BoundingBox};

/// Baseline-to-baseline distance as a multiple of the font size.
pub const LINE_HEIGHT: f32 = 1.2;
pub const FULL_WIDTH_COEFFICIENT: f32 = 1.0;
pub const HALF_WIDTH_COEFFICIENT: f32 = 0.55;

pub const MIN_FONT_SIZE: f32 = 6.0;
pub const MAX_FONT_SIZE: f32 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontLimits {
    pub min: f32,
    pub max: f32,
}

impl Default for FontLimits {
    fn default() -> Self {
        Self {
            min: MIN_FONT_SIZE,
            max: MAX_FONT_SIZE,
        }
    }
}

impl FontLimits {
    pub fn clamp(&self, size: f32) -> f32 {
        if size.is_nan() {
            return self.min;
        }
        size.clamp(self.min, self.max)
    }
}

/// Width source used while wrapping. Engines back this with real font metrics.
pub trait TextMeasure {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

/// Script-weighted width estimate, no font data required.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMeasure;

impl TextMeasure for EstimatedMeasure {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        estimate_text_width(text, size)
    }
}

impl<F> TextMeasure for F
where
    F: Fn(&str, f32) -> f32,
{
    fn text_width(&self, text: &str, size: f32) -> f32 {
        self(text, size)
    }
}

pub fn is_full_width(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3000..=0x303F
            | 0x3040..=0x30FF
            | 0x31F0..=0x31FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xF900..=0xFAFF
            | 0xFF01..=0xFF60
            | 0xFFE0..=0xFFE6
    )
}

pub fn char_width_coefficient(ch: char) -> f32 {
    if is_full_width(ch) {
        FULL_WIDTH_COEFFICIENT
    } else {
        HALF_WIDTH_COEFFICIENT
    }
}

pub fn estimate_text_width(text: &str, size: f32) -> f32 {
    text.chars()
        .filter(|ch| *ch != '\n')
        .map(char_width_coefficient)
        .sum::<f32>()
        * size
}

/// Keeps `original_size` when the text fits the box width, otherwise scales it down.
/// The result is always within `limits`.
pub fn estimate_size(text: &str, bbox: &BoundingBox, original_size: f32, limits: &FontLimits) -> f32 {
    let estimated = estimate_text_width(text, original_size);
    if estimated <= bbox.width() {
        return limits.clamp(original_size);
    }
    limits.clamp(original_size * (bbox.width() / estimated))
}

/// Shrinks the original size by the square root of the block's expansion ratio.
pub fn adjusted_font_size(block: &Block, limits: &FontLimits) -> f32 {
    let ratio = block.expansion_ratio();
    if ratio <= 1.0 {
        return limits.clamp(block.font.size);
    }
    limits.clamp(block.font.size / ratio.sqrt())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    pub size: f32,
    pub lines: Vec<String>,
}

impl Fit {
    pub fn height(&self) -> f32 {
        self.lines.len() as f32 * self.size * LINE_HEIGHT
    }
}

/// Largest integer size from `max_size` down to the minimum whose wrapped lines fit the box height.
/// Falls back to the minimum size when nothing fits.
pub fn fit(
    text: &str,
    bbox: &BoundingBox,
    max_size: f32,
    measure: &dyn TextMeasure,
    limits: &FontLimits,
) -> Fit {
    let top = limits.clamp(max_size).floor() as i32;
    let bottom = limits.min.ceil() as i32;
    for size in (bottom..=top).rev() {
        let size = size as f32;
        let lines = wrap_text(text, bbox.width(), size, measure);
        if lines.len() as f32 * size * LINE_HEIGHT <= bbox.height() {
            return Fit { size, lines };
        }
    }
    Fit {
        size: limits.min,
        lines: wrap_text(text, bbox.width(), limits.min, measure),
    }
}

/// Greedy character wrap: a line breaks when the next character would overflow `max_width`.
pub fn wrap_text(text: &str, max_width: f32, size: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' {
            lines.push(std::mem::take(&mut current));
            continue;
        }
        if current.is_empty() && ch == ' ' && !lines.is_empty() {
            continue;
        }
        let mut candidate = current.clone();
        candidate.push(ch);
        if measure.text_width(&candidate, size) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current).trim_end().to_string());
            if ch != ' ' {
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.is_empty() {
        lines.push(text.to_string());
    }
    lines
}
