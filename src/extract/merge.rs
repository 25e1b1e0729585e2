use tracing::debug;

use crate::model::Block;

use super::geom::{horizontal_overlap_ratio, vertical_overlap_ratio};

/// Both axis ratios must exceed this for two blocks to count as duplicates.
pub const OVERLAP_THRESHOLD: f32 = 0.8;

/// Drops blocks that duplicate a longer block's geometry, then restores reading order.
pub fn merge_overlapping(blocks: Vec<Block>) -> Vec<Block> {
    let before = blocks.len();
    let mut sorted = blocks;
    sorted.sort_by_key(|block| std::cmp::Reverse(block.char_count()));
    let mut kept: Vec<Block> = Vec::new();

    'outer: for block in sorted {
        for existing in &kept {
            if horizontal_overlap_ratio(&existing.bbox, &block.bbox) > OVERLAP_THRESHOLD
                && vertical_overlap_ratio(&existing.bbox, &block.bbox) > OVERLAP_THRESHOLD
            {
                debug!(
                    "dropping {} '{}' overlapped by {} '{}'",
                    block.id, block.text, existing.id, existing.text
                );
                continue 'outer;
            }
        }
        kept.push(block);
    }
    sort_reading_order(&mut kept);
    if kept.len() != before {
        debug!("overlap merge kept {} of {} blocks", kept.len(), before);
    }
    kept
}

pub(crate) fn sort_reading_order(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockId, BoundingBox, FontAttributes};

    fn block(id: u32, text: &str, bbox: [f32; 4]) -> Block {
        Block {
            id: BlockId(id),
            text: text.to_string(),
            bbox: BoundingBox::from_array(bbox),
            font: FontAttributes::new("Helvetica", 10.0),
            translated_text: None,
            line_count: 1,
            spans: Vec::new(),
        }
    }

    fn texts(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|block| block.text.as_str()).collect()
    }

    #[test]
    fn caption_over_heading_keeps_longer_text() {
        let blocks = vec![
            block(1, "Task", [67.0, 100.0, 95.0, 112.0]),
            block(2, "Context Task:", [50.0, 100.0, 130.0, 112.0]),
        ];
        let merged = merge_overlapping(blocks);
        assert_eq!(texts(&merged), vec!["Context Task:"]);
    }

    #[test]
    fn adjacent_lines_survive() {
        let blocks = vec![
            block(1, "First line", [50.0, 100.0, 200.0, 112.0]),
            block(2, "Second line", [50.0, 110.0, 200.0, 122.0]),
        ];
        let merged = merge_overlapping(blocks);
        assert_eq!(texts(&merged), vec!["First line", "Second line"]);
    }

    #[test]
    fn result_is_in_reading_order() {
        let blocks = vec![
            block(1, "bottom", [10.0, 300.0, 60.0, 312.0]),
            block(2, "right", [200.0, 100.0, 260.0, 112.0]),
            block(3, "left", [10.0, 100.0, 60.0, 112.0]),
        ];
        let merged = merge_overlapping(blocks);
        assert_eq!(texts(&merged), vec!["left", "right", "bottom"]);
    }

    #[test]
    fn merge_is_idempotent_and_never_grows() {
        let blocks = vec![
            block(1, "Task", [67.0, 100.0, 95.0, 112.0]),
            block(2, "Context Task:", [50.0, 100.0, 130.0, 112.0]),
            block(3, "Body text", [50.0, 130.0, 300.0, 142.0]),
            block(4, "Body", [52.0, 131.0, 290.0, 141.0]),
            block(5, "Footer", [50.0, 800.0, 120.0, 812.0]),
        ];
        let count = blocks.len();
        let once = merge_overlapping(blocks);
        assert!(once.len() <= count);
        let twice = merge_overlapping(once.clone());
        assert_eq!(once, twice);
        assert_eq!(texts(&once), vec!["Context Task:", "Body text", "Footer"]);
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(merge_overlapping(Vec::new()).is_empty());
    }
}
