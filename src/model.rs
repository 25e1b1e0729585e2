use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::languages::Language;

/// Axis-aligned box in page units, origin at the top-left corner of the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Builds a box from two corners, swapping coordinates so that `x1 >= x0` and `y1 >= y0`.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}, {:.1})",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

const FLAG_ITALIC: u32 = 1 << 1;
const FLAG_BOLD: u32 = 1 << 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontAttributes {
    pub family: String,
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
    pub color: [u8; 3],
}

impl FontAttributes {
    pub fn new(family: impl Into<String>, size: f32) -> Self {
        Self {
            family: family.into(),
            size,
            bold: false,
            italic: false,
            color: [0, 0, 0],
        }
    }

    /// Decodes the engine's style bit-flags (bit 4 bold, bit 1 italic) and packed `0xRRGGBB` color.
    pub fn from_flags(family: impl Into<String>, size: f32, flags: u32, color: u32) -> Self {
        Self {
            family: family.into(),
            size,
            bold: flags & FLAG_BOLD != 0,
            italic: flags & FLAG_ITALIC != 0,
            color: [
                ((color >> 16) & 0xFF) as u8,
                ((color >> 8) & 0xFF) as u8,
                (color & 0xFF) as u8,
            ],
        }
    }

    pub fn normalized_color(&self) -> [f32; 3] {
        self.color.map(|channel| channel as f32 / 255.0)
    }
}

impl Default for FontAttributes {
    fn default() -> Self {
        Self::new("", 12.0)
    }
}

/// Identity of a block, unique within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{:06}", self.0)
    }
}

/// Per-document id sequence.
#[derive(Debug, Default)]
pub struct IdSequence {
    next: u32,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_block(&mut self) -> BlockId {
        self.next += 1;
        BlockId(self.next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub bbox: BoundingBox,
    pub font: FontAttributes,
    /// Reading-order position on the page.
    pub index: usize,
}

impl Span {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub text: String,
    pub bbox: BoundingBox,
    pub font: FontAttributes,
    pub translated_text: Option<String>,
    pub line_count: usize,
    pub spans: Vec<Span>,
}

impl Block {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn expansion_ratio(&self) -> f32 {
        let original = self.char_count();
        match self.translated_text.as_deref() {
            Some(translated) if !translated.is_empty() && original > 0 => {
                translated.chars().count() as f32 / original as f32
            }
            _ => 1.0,
        }
    }

    /// Text to place: the translation when present, the original otherwise.
    pub fn display_text(&self) -> &str {
        self.translated_text.as_deref().unwrap_or(&self.text)
    }

    pub fn is_translated(&self) -> bool {
        self.translated_text.is_some()
    }
}

/// Consecutive spans translated as one unit. Member spans are borrowed from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationGroup<'a> {
    pub start_index: usize,
    pub end_index: usize,
    pub original_text: String,
    pub translated_text: String,
    pub spans: Vec<&'a Span>,
}

impl<'a> TranslationGroup<'a> {
    pub fn singleton(span: &'a Span) -> Self {
        Self {
            start_index: span.index,
            end_index: span.index,
            original_text: span.text.clone(),
            translated_text: span.text.clone(),
            spans: vec![span],
        }
    }

    /// Placement box: top-left of the first member, bottom-right of the last.
    pub fn extended_bbox(&self) -> Option<BoundingBox> {
        let first = self.spans.first()?;
        let last = self.spans.last()?;
        Some(BoundingBox::new(
            first.bbox.x0,
            first.bbox.y0,
            last.bbox.x1,
            last.bbox.y1,
        ))
    }
}

impl TranslationGroup<'_> {
    pub fn record(&self) -> GroupRecord {
        GroupRecord {
            start_index: self.start_index,
            end_index: self.end_index,
            original_text: self.original_text.clone(),
            translated_text: self.translated_text.clone(),
        }
    }
}

/// Owned form of a [`TranslationGroup`], kept on the page once translated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub start_index: usize,
    pub end_index: usize,
    pub original_text: String,
    pub translated_text: String,
}

impl GroupRecord {
    pub fn expansion_ratio(&self) -> f32 {
        let original = self.original_text.chars().count();
        if original == 0 || self.translated_text.is_empty() {
            return 1.0;
        }
        self.translated_text.chars().count() as f32 / original as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    pub image_type: String,
    pub xref: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingInfo {
    pub id: String,
    pub kind: String,
    pub bbox: BoundingBox,
    pub stroke_color: Option<[u8; 3]>,
    pub fill_color: Option<[u8; 3]>,
    pub stroke_width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub width: f32,
    pub height: f32,
    pub rotation: i32,
    pub blocks: Vec<Block>,
    pub images: Vec<ImageInfo>,
    pub drawings: Vec<DrawingInfo>,
    /// Span-grouped translations. Empty unless the page was translated in group mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupRecord>,
}

impl Page {
    /// All retained spans on the page in reading order.
    pub fn spans(&self) -> Vec<&Span> {
        let mut spans = self
            .blocks
            .iter()
            .flat_map(|block| block.spans.iter())
            .collect::<Vec<_>>();
        spans.sort_by_key(|span| span.index);
        spans
    }

    /// Binds the recorded groups back to the page's spans by index.
    pub fn translation_groups(&self) -> Vec<TranslationGroup<'_>> {
        let spans = self.spans();
        self.groups
            .iter()
            .map(|record| TranslationGroup {
                start_index: record.start_index,
                end_index: record.end_index,
                original_text: record.original_text.clone(),
                translated_text: record.translated_text.clone(),
                spans: spans
                    .iter()
                    .copied()
                    .filter(|span| (record.start_index..=record.end_index).contains(&span.index))
                    .collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file: PathBuf,
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub pages: Vec<Page>,
    pub source_language: Option<Language>,
    pub target_language: Option<Language>,
}

impl Document {
    pub fn all_text(&self) -> String {
        self.pages
            .iter()
            .flat_map(|page| page.blocks.iter())
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn statistics(&self) -> LayoutStatistics {
        LayoutStatistics::collect(self)
    }
}

/// Expansion ratio above which a block is considered at risk of overflowing its box.
pub const OVERFLOW_RISK_RATIO: f32 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutStatistics {
    pub total_pages: usize,
    pub total_blocks: usize,
    pub total_images: usize,
    pub avg_expansion_ratio: f32,
    pub max_expansion_ratio: f32,
    /// Translated units (blocks, or groups on grouped pages) above [`OVERFLOW_RISK_RATIO`].
    pub blocks_needing_adjustment: usize,
    pub pages_with_overflow_risk: Vec<usize>,
}

impl LayoutStatistics {
    fn collect(document: &Document) -> Self {
        let mut stats = LayoutStatistics {
            total_pages: 0,
            total_blocks: 0,
            total_images: 0,
            avg_expansion_ratio: 1.0,
            max_expansion_ratio: 1.0,
            blocks_needing_adjustment: 0,
            pages_with_overflow_risk: Vec::new(),
        };
        let mut ratios = Vec::new();
        for page in &document.pages {
            stats.total_pages += 1;
            stats.total_blocks += page.blocks.len();
            stats.total_images += page.images.len();
            let mut at_risk = false;
            let page_ratios = if page.groups.is_empty() {
                page.blocks
                    .iter()
                    .filter(|block| block.is_translated())
                    .map(Block::expansion_ratio)
                    .collect::<Vec<_>>()
            } else {
                page.groups.iter().map(GroupRecord::expansion_ratio).collect()
            };
            for ratio in page_ratios {
                ratios.push(ratio);
                if ratio > OVERFLOW_RISK_RATIO {
                    stats.blocks_needing_adjustment += 1;
                    at_risk = true;
                }
            }
            if at_risk {
                stats.pages_with_overflow_risk.push(page.number);
            }
        }
        if !ratios.is_empty() {
            stats.avg_expansion_ratio = ratios.iter().sum::<f32>() / ratios.len() as f32;
            stats.max_expansion_ratio = ratios.iter().copied().fold(f32::MIN, f32::max);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, translated: Option<&str>) -> Block {
        Block {
            id: BlockId(1),
            text: text.to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 100.0, 20.0),
            font: FontAttributes::new("Helvetica", 12.0),
            translated_text: translated.map(str::to_string),
            line_count: 1,
            spans: Vec::new(),
        }
    }

    fn span(index: usize, bbox: [f32; 4]) -> Span {
        Span {
            text: format!("s{}", index),
            bbox: BoundingBox::from_array(bbox),
            font: FontAttributes::default(),
            index,
        }
    }

    #[test]
    fn bbox_dimensions_are_non_negative() {
        let bbox = BoundingBox::new(130.0, 112.0, 50.0, 100.0);
        assert_eq!(bbox.x0, 50.0);
        assert_eq!(bbox.y0, 100.0);
        assert_eq!(bbox.width(), 80.0);
        assert_eq!(bbox.height(), 12.0);
        assert_eq!(bbox.center(), (90.0, 106.0));
    }

    #[test]
    fn font_attributes_decode_flags_and_color() {
        let font = FontAttributes::from_flags("Helvetica-Bold", 10.0, 16 | 2, 0xFF8000);
        assert!(font.bold);
        assert!(font.italic);
        assert_eq!(font.color, [255, 128, 0]);
        let plain = FontAttributes::from_flags("Helvetica", 10.0, 4, 0);
        assert!(!plain.bold);
        assert!(!plain.italic);
    }

    #[test]
    fn normalized_color_scales_to_unit_range() {
        let mut font = FontAttributes::default();
        font.color = [255, 0, 51];
        assert_eq!(font.normalized_color(), [1.0, 0.0, 0.2]);
    }

    #[test]
    fn expansion_ratio_counts_characters() {
        assert_eq!(block("Hi", Some("こんにちは")).expansion_ratio(), 2.5);
        assert_eq!(block("Hi", None).expansion_ratio(), 1.0);
        assert_eq!(block("", Some("abc")).expansion_ratio(), 1.0);
    }

    #[test]
    fn translating_to_original_text_keeps_unit_ratio() {
        let mut block = block("Context Task:", None);
        block.translated_text = Some(block.text.clone());
        assert_eq!(block.expansion_ratio(), 1.0);
    }

    #[test]
    fn id_sequence_is_per_instance() {
        let mut first = IdSequence::new();
        let mut second = IdSequence::new();
        assert_eq!(first.next_block(), BlockId(1));
        assert_eq!(first.next_block(), BlockId(2));
        assert_eq!(second.next_block(), BlockId(1));
        assert_eq!(BlockId(7).to_string(), "block_000007");
    }

    #[test]
    fn extended_bbox_ignores_interior_spans() {
        let spans = [
            span(0, [50.0, 100.0, 80.0, 112.0]),
            span(1, [10.0, 60.0, 400.0, 300.0]),
            span(2, [90.0, 100.0, 140.0, 114.0]),
        ];
        let group = TranslationGroup {
            start_index: 0,
            end_index: 2,
            original_text: "s0s1s2".to_string(),
            translated_text: "x".to_string(),
            spans: spans.iter().collect(),
        };
        assert_eq!(
            group.extended_bbox(),
            Some(BoundingBox::new(50.0, 100.0, 140.0, 114.0))
        );
    }

    #[test]
    fn statistics_flag_pages_with_large_expansion() {
        let page = |number: usize, blocks: Vec<Block>| Page {
            number,
            width: 595.0,
            height: 842.0,
            rotation: 0,
            blocks,
            images: Vec::new(),
            drawings: Vec::new(),
            groups: Vec::new(),
        };
        let document = Document {
            file: PathBuf::from("sample.pdf"),
            page_count: 2,
            title: None,
            author: None,
            pages: vec![
                page(0, vec![block("ab", Some("abcd")), block("abcd", Some("abcd"))]),
                page(1, vec![block("abc", None)]),
            ],
            source_language: None,
            target_language: None,
        };
        let stats = document.statistics();
        assert_eq!(stats.total_pages, 2);
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.blocks_needing_adjustment, 1);
        assert_eq!(stats.pages_with_overflow_risk, vec![0]);
        assert_eq!(stats.max_expansion_ratio, 2.0);
        assert_eq!(stats.avg_expansion_ratio, 1.5);
    }

    #[test]
    fn group_records_rebind_and_drive_statistics() {
        let mut body = block("s0s1", None);
        body.spans = vec![
            span(0, [50.0, 100.0, 80.0, 112.0]),
            span(1, [80.0, 100.0, 110.0, 112.0]),
        ];
        let page = Page {
            number: 1,
            width: 595.0,
            height: 842.0,
            rotation: 0,
            blocks: vec![body],
            images: Vec::new(),
            drawings: Vec::new(),
            groups: vec![GroupRecord {
                start_index: 0,
                end_index: 1,
                original_text: "s0s1".to_string(),
                translated_text: "translated".to_string(),
            }],
        };
        let groups = page.translation_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].spans.len(), 2);
        assert_eq!(
            groups[0].extended_bbox(),
            Some(BoundingBox::new(50.0, 100.0, 110.0, 112.0))
        );
        assert_eq!(groups[0].record(), page.groups[0]);

        let document = Document {
            file: PathBuf::from("sample.pdf"),
            page_count: 1,
            title: None,
            author: None,
            pages: vec![page],
            source_language: None,
            target_language: None,
        };
        let stats = document.statistics();
        assert_eq!(stats.max_expansion_ratio, 2.5);
        assert_eq!(stats.blocks_needing_adjustment, 1);
        assert_eq!(stats.pages_with_overflow_risk, vec![1]);
    }
}
