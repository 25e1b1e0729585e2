use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{PageDict, RawSpan};
use crate::model::{Block, BoundingBox, FontAttributes, IdSequence, Span};

mod geom;
mod merge;
mod text;

pub use merge::{OVERLAP_THRESHOLD, merge_overlapping};

/// Granularity at which positioned text runs become translation units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Block,
    Line,
    Span,
    /// Paragraph units that also carry their individual runs.
    #[default]
    Hybrid,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Block => "block",
            ExtractionMode::Line => "line",
            ExtractionMode::Span => "span",
            ExtractionMode::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    mode: ExtractionMode,
    merge_overlapping: bool,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractionMode::default())
    }
}

/// A kept run with its position in the engine's block/line/span tree.
#[derive(Debug, Clone)]
struct Run {
    block: usize,
    line: usize,
    span: Span,
}

impl Extractor {
    pub fn new(mode: ExtractionMode) -> Self {
        Self {
            mode,
            merge_overlapping: true,
        }
    }

    pub fn with_merge(mut self, enabled: bool) -> Self {
        self.merge_overlapping = enabled;
        self
    }

    /// Builds the page's blocks. Ids come from the caller's per-document sequence.
    pub fn extract(&self, page: &PageDict, ids: &mut IdSequence) -> Vec<Block> {
        let runs = collect_runs(page);
        if runs.is_empty() {
            return Vec::new();
        }
        let blocks = match self.mode {
            ExtractionMode::Span => span_blocks(runs, ids),
            ExtractionMode::Line => line_blocks(runs, ids),
            ExtractionMode::Block => paragraph_blocks(runs, ids, false),
            ExtractionMode::Hybrid => paragraph_blocks(runs, ids, true),
        };
        debug!("extracted {} {} units", blocks.len(), self.mode.as_str());
        let mut blocks = if self.merge_overlapping {
            merge_overlapping(blocks)
        } else {
            blocks
        };
        renumber_spans(&mut blocks);
        blocks
    }
}

/// Reassigns span indices as a dense `0..n` sequence in their existing order,
/// closing the gaps left by runs of merged-away blocks.
fn renumber_spans(blocks: &mut [Block]) {
    let mut positions = blocks
        .iter()
        .enumerate()
        .flat_map(|(block_idx, block)| {
            block
                .spans
                .iter()
                .enumerate()
                .map(move |(span_idx, span)| (span.index, block_idx, span_idx))
        })
        .collect::<Vec<_>>();
    positions.sort_unstable();
    for (index, (_, block, span)) in positions.into_iter().enumerate() {
        blocks[block].spans[span].index = index;
    }
}

/// Drops whitespace-only runs and numbers the rest in reading order (top-to-bottom, then left-to-right).
fn collect_runs(page: &PageDict) -> Vec<Run> {
    let mut runs = Vec::new();
    for (block_idx, block) in page.blocks.iter().enumerate() {
        for (line_idx, line) in block.lines.iter().enumerate() {
            for raw in &line.spans {
                if raw.text.trim().is_empty() {
                    continue;
                }
                runs.push(Run {
                    block: block_idx,
                    line: line_idx,
                    span: span_from_raw(raw),
                });
            }
        }
    }

    let mut order = (0..runs.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        let a = &runs[a].span.bbox;
        let b = &runs[b].span.bbox;
        a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0))
    });
    for (index, position) in order.into_iter().enumerate() {
        runs[position].span.index = index;
    }
    runs
}

fn span_from_raw(raw: &RawSpan) -> Span {
    Span {
        text: raw.text.clone(),
        bbox: BoundingBox::from_array(raw.bbox),
        font: FontAttributes::from_flags(raw.font.as_str(), raw.size, raw.flags, raw.color),
        index: 0,
    }
}

fn span_blocks(mut runs: Vec<Run>, ids: &mut IdSequence) -> Vec<Block> {
    runs.sort_by_key(|run| run.span.index);
    runs.into_iter()
        .map(|run| Block {
            id: ids.next_block(),
            text: run.span.text.clone(),
            bbox: run.span.bbox,
            font: run.span.font.clone(),
            translated_text: None,
            line_count: 1,
            spans: Vec::new(),
        })
        .collect()
}

fn line_blocks(runs: Vec<Run>, ids: &mut IdSequence) -> Vec<Block> {
    group_consecutive(runs, |run| (run.block, run.line))
        .into_iter()
        .map(|line| {
            let text = line.iter().map(|run| run.span.text.as_str()).collect();
            unit_block(ids.next_block(), text, &line, 1, Vec::new())
        })
        .collect()
}

fn paragraph_blocks(runs: Vec<Run>, ids: &mut IdSequence, keep_spans: bool) -> Vec<Block> {
    group_consecutive(runs, |run| run.block)
        .into_iter()
        .map(|paragraph| {
            let lines = group_consecutive(paragraph.clone(), |run| run.line);
            let text = lines.iter().fold(String::new(), |acc, line| {
                let line_text = line
                    .iter()
                    .map(|run| run.span.text.as_str())
                    .collect::<String>();
                text::join_inline(&acc, &line_text)
            });
            let spans = if keep_spans {
                let mut spans = paragraph
                    .iter()
                    .map(|run| run.span.clone())
                    .collect::<Vec<_>>();
                spans.sort_by_key(|span| span.index);
                spans
            } else {
                Vec::new()
            };
            unit_block(ids.next_block(), text, &paragraph, lines.len(), spans)
        })
        .collect()
}

/// Box is the union of the runs; font is the first run's.
fn unit_block(
    id: crate::model::BlockId,
    text: String,
    runs: &[Run],
    line_count: usize,
    spans: Vec<Span>,
) -> Block {
    let bbox = runs
        .iter()
        .skip(1)
        .fold(runs[0].span.bbox, |acc, run| acc.union(&run.span.bbox));
    Block {
        id,
        text,
        bbox,
        font: runs[0].span.font.clone(),
        translated_text: None,
        line_count,
        spans,
    }
}

fn group_consecutive<K, F>(runs: Vec<Run>, key: F) -> Vec<Vec<Run>>
where
    K: PartialEq,
    F: Fn(&Run) -> K,
{
    let mut groups: Vec<Vec<Run>> = Vec::new();
    for run in runs {
        match groups.last_mut() {
            Some(group) if key(&group[0]) == key(&run) => group.push(run),
            _ => groups.push(vec![run]),
        }
    }
    groups
}
