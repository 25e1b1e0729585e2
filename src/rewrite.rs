use tracing::{debug, warn};

use crate::engine::{Align, BaselineRun, DocumentEngine};
use crate::error::{FontFault, LayoutFault, PlacementError};
use crate::font::{FontChoice, FontSet};
use crate::languages::contains_japanese;
use crate::layout::{FontLimits, LINE_HEIGHT, estimate_size, fit};
use crate::model::{Block, BoundingBox, FontAttributes, TranslationGroup};

/// What happened on one page.
#[derive(Debug, Default)]
pub struct RewriteReport {
    pub erased: usize,
    pub placed: usize,
    /// Units left untouched because their script font could not be loaded.
    pub font_faults: Vec<FontFault>,
}

#[derive(Debug)]
struct Placement {
    unit: String,
    bbox: BoundingBox,
    text: String,
    attrs: FontAttributes,
    font: FontChoice,
}

/// One replacement unit: every box it erases and every text it places.
#[derive(Debug, Default)]
struct Unit {
    erase: Vec<BoundingBox>,
    place: Vec<Placement>,
}

/// CJK face for text containing kana or ideographs, the built-in Latin face otherwise.
pub fn choose_font(text: &str, attrs: &FontAttributes, fonts: &FontSet) -> Result<FontChoice, FontFault> {
    if contains_japanese(text) {
        fonts.cjk()
    } else {
        Ok(fonts.latin(attrs.bold))
    }
}

/// Splits `text` across parts proportionally to their original character counts.
/// Every non-final part gets at least one character while any remain; the last part takes the rest.
pub fn split_proportionally(text: &str, lengths: &[usize]) -> Vec<String> {
    if lengths.is_empty() {
        return Vec::new();
    }
    let chars = text.chars().collect::<Vec<_>>();
    let total_translated = chars.len();
    let total_original = lengths.iter().sum::<usize>();
    let mut slices = Vec::with_capacity(lengths.len());
    let mut cursor = 0usize;
    for (i, length) in lengths.iter().enumerate() {
        let remaining = total_translated - cursor;
        let take = if i + 1 == lengths.len() {
            remaining
        } else if total_original == 0 {
            0
        } else {
            let share = (total_translated as f64 * (*length as f64 / total_original as f64)).round() as usize;
            share.max(1).min(remaining)
        };
        slices.push(chars[cursor..cursor + take].iter().collect());
        cursor += take;
    }
    slices
}

fn placement(
    unit: String,
    bbox: BoundingBox,
    text: String,
    attrs: &FontAttributes,
    fonts: &FontSet,
) -> Result<Placement, FontFault> {
    let font = choose_font(&text, attrs, fonts)?;
    Ok(Placement {
        unit,
        bbox,
        text,
        attrs: attrs.clone(),
        font,
    })
}

fn block_unit(block: &Block, fonts: &FontSet) -> Result<Unit, FontFault> {
    let text = block.display_text();
    if block.spans.is_empty() {
        return Ok(Unit {
            erase: vec![block.bbox],
            place: vec![placement(
                block.id.to_string(),
                block.bbox,
                text.to_string(),
                &block.font,
                fonts,
            )?],
        });
    }
    let lengths = block.spans.iter().map(|span| span.char_count()).collect::<Vec<_>>();
    let slices = split_proportionally(text, &lengths);
    let mut unit = Unit::default();
    for (span, slice) in block.spans.iter().zip(slices) {
        unit.erase.push(span.bbox);
        if slice.trim().is_empty() {
            continue;
        }
        unit.place.push(placement(
            format!("{} span {}", block.id, span.index),
            span.bbox,
            slice,
            &span.font,
            fonts,
        )?);
    }
    Ok(unit)
}

fn group_unit(group: &TranslationGroup<'_>, fonts: &FontSet) -> Result<Option<Unit>, FontFault> {
    let (Some(bbox), Some(first)) = (group.extended_bbox(), group.spans.first()) else {
        return Ok(None);
    };
    if group.translated_text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(Unit {
        erase: group.spans.iter().map(|span| span.bbox).collect(),
        place: vec![placement(
            format!("spans {}..={}", group.start_index, group.end_index),
            bbox,
            group.translated_text.clone(),
            &first.font,
            fonts,
        )?],
    }))
}

/// Replaces each block's text on `page` (0-based) with its translation.
pub fn replace_blocks(
    engine: &mut dyn DocumentEngine,
    page: usize,
    blocks: &[Block],
    fonts: &FontSet,
    limits: &FontLimits,
) -> Result<RewriteReport, LayoutFault> {
    let mut report = RewriteReport::default();
    let units = blocks
        .iter()
        .filter_map(|block| keep_unit(block_unit(block, fonts).map(Some), &mut report))
        .collect::<Vec<_>>();
    rewrite(engine, page, units, limits, report)
}

/// Places each group once at its extended box after erasing every member span.
pub fn replace_groups(
    engine: &mut dyn DocumentEngine,
    page: usize,
    groups: &[TranslationGroup<'_>],
    fonts: &FontSet,
    limits: &FontLimits,
) -> Result<RewriteReport, LayoutFault> {
    let mut report = RewriteReport::default();
    let units = groups
        .iter()
        .filter_map(|group| keep_unit(group_unit(group, fonts), &mut report))
        .collect::<Vec<_>>();
    rewrite(engine, page, units, limits, report)
}

fn keep_unit(unit: Result<Option<Unit>, FontFault>, report: &mut RewriteReport) -> Option<Unit> {
    match unit {
        Ok(unit) => unit,
        Err(fault) => {
            warn!("{}; leaving unit untouched", fault);
            report.font_faults.push(fault);
            None
        }
    }
}

fn rewrite(
    engine: &mut dyn DocumentEngine,
    page: usize,
    units: Vec<Unit>,
    limits: &FontLimits,
    mut report: RewriteReport,
) -> Result<RewriteReport, LayoutFault> {
    let placements = units.iter().flat_map(|unit| unit.place.iter());
    for placement in placements.clone() {
        if placement.bbox.is_degenerate() {
            return Err(layout_fault(page, placement, "degenerate box".to_string()));
        }
    }

    for bbox in units.iter().flat_map(|unit| unit.erase.iter()) {
        engine
            .add_redaction(page, *bbox, false)
            .map_err(|err| erase_fault(page, *bbox, err))?;
        report.erased += 1;
    }
    if report.erased > 0 {
        engine
            .apply_redactions(page)
            .map_err(|err| erase_fault(page, BoundingBox::new(0.0, 0.0, 0.0, 0.0), err))?;
    }

    for placement in placements {
        place(engine, page, placement, limits)?;
        report.placed += 1;
    }
    debug!(
        "page {}: erased {} boxes, placed {} units",
        page + 1,
        report.erased,
        report.placed
    );
    Ok(report)
}

fn place(
    engine: &mut dyn DocumentEngine,
    page: usize,
    placement: &Placement,
    limits: &FontLimits,
) -> Result<(), LayoutFault> {
    let size = estimate_size(&placement.text, &placement.bbox, placement.attrs.size, limits);
    let color = placement.attrs.normalized_color();
    if placement.font.is_external() {
        return place_lines(engine, page, placement, size, color, limits);
    }
    match engine.insert_text_box(
        page,
        placement.bbox,
        &placement.text,
        size,
        &placement.font,
        color,
        Align::Left,
    ) {
        Ok(()) => Ok(()),
        Err(PlacementError::LayoutOverflow) => {
            debug!("{} overflows at {:.1}pt; wrapping explicitly", placement.unit, size);
            place_lines(engine, page, placement, size, color, limits)
        }
        Err(PlacementError::Rejected(reason)) => Err(layout_fault(page, placement, reason)),
    }
}

/// Wraps at the fitted size and writes line by line: first baseline at box top + size.
fn place_lines(
    engine: &mut dyn DocumentEngine,
    page: usize,
    placement: &Placement,
    size: f32,
    color: [f32; 3],
    limits: &FontLimits,
) -> Result<(), LayoutFault> {
    let fitted = {
        let measure = |text: &str, size: f32| engine.measure_text_width(&placement.font, text, size);
        fit(&placement.text, &placement.bbox, size, &measure, limits)
    };
    let runs = fitted
        .lines
        .iter()
        .enumerate()
        .map(|(row, line)| BaselineRun {
            x: placement.bbox.x0,
            y: placement.bbox.y0 + fitted.size + row as f32 * fitted.size * LINE_HEIGHT,
            text: line.clone(),
        })
        .collect::<Vec<_>>();
    engine
        .write_baseline_text(page, &runs, &placement.font, fitted.size, color)
        .map_err(|err| layout_fault(page, placement, err.to_string()))
}

fn layout_fault(page: usize, placement: &Placement, reason: String) -> LayoutFault {
    LayoutFault {
        page: page + 1,
        unit: placement.unit.clone(),
        bbox: placement.bbox,
        reason,
    }
}

fn erase_fault(page: usize, bbox: BoundingBox, err: PlacementError) -> LayoutFault {
    LayoutFault {
        page: page + 1,
        unit: "redaction".to_string(),
        bbox,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOp, MemoryEngine, PageDict};
    use crate::font::ExternalFont;
    use crate::model::{BlockId, Span};

    fn attrs(size: f32) -> FontAttributes {
        FontAttributes {
            color: [255, 0, 0],
            ..FontAttributes::new("Helvetica", size)
        }
    }

    fn span(text: &str, bbox: BoundingBox, index: usize) -> Span {
        Span {
            text: text.to_string(),
            bbox,
            font: attrs(10.0),
            index,
        }
    }

    fn block(text: &str, translated: &str, bbox: BoundingBox, spans: Vec<Span>) -> Block {
        Block {
            id: BlockId(1),
            text: text.to_string(),
            bbox,
            font: attrs(10.0),
            translated_text: Some(translated.to_string()),
            line_count: 1,
            spans,
        }
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::from_pages(
            "doc.json",
            vec![PageDict {
                width: 600.0,
                height: 800.0,
                ..PageDict::default()
            }],
        )
    }

    fn text_ops(engine: &MemoryEngine) -> Vec<&EngineOp> {
        engine
            .ops()
            .iter()
            .filter(|op| matches!(op, EngineOp::TextBox { .. } | EngineOp::BaselineText { .. }))
            .collect()
    }

    #[test]
    fn proportional_split_follows_character_share() {
        assert_eq!(split_proportionally("abcdefghij", &[2, 8]), vec!["ab", "cdefghij"]);
        assert_eq!(split_proportionally("xy", &[5, 5, 5]), vec!["x", "y", ""]);
        assert_eq!(split_proportionally("こんにちは", &[1, 1]), vec!["こんに", "ちは"]);
        assert!(split_proportionally("abc", &[]).is_empty());
    }

    #[test]
    fn erasures_precede_placements() {
        let mut engine = engine();
        let blocks = vec![block(
            "Hello",
            "Howdy",
            BoundingBox::new(50.0, 100.0, 300.0, 130.0),
            Vec::new(),
        )];
        let report = replace_blocks(
            &mut engine,
            0,
            &blocks,
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!((report.erased, report.placed), (1, 1));
        let ops = engine.ops();
        assert!(matches!(ops[0], EngineOp::Redaction { fill: false, .. }));
        assert!(matches!(ops[1], EngineOp::ApplyRedactions { .. }));
        let EngineOp::TextBox { text, size, color, font, .. } = &ops[2] else {
            panic!("expected a text box, got {:?}", ops[2]);
        };
        assert_eq!(text, "Howdy");
        assert_eq!(*size, 10.0);
        assert_eq!(*color, [1.0, 0.0, 0.0]);
        assert_eq!(font, "Helvetica");
    }

    #[test]
    fn hybrid_blocks_place_slices_at_span_boxes() {
        let mut engine = engine();
        let first = BoundingBox::new(50.0, 100.0, 200.0, 115.0);
        let second = BoundingBox::new(50.0, 120.0, 300.0, 135.0);
        let blocks = vec![block(
            "ab cdefghij",
            "ABCDEFGHIJ",
            BoundingBox::new(50.0, 100.0, 300.0, 135.0),
            vec![span("ab", first, 0), span("cdefghij", second, 1)],
        )];
        let report = replace_blocks(
            &mut engine,
            0,
            &blocks,
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!((report.erased, report.placed), (2, 2));
        let placed = text_ops(&engine)
            .into_iter()
            .filter_map(|op| match op {
                EngineOp::TextBox { text, bbox, .. } => Some((text.as_str(), *bbox)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(placed, vec![("AB", first), ("CDEFGHIJ", second)]);
    }

    #[test]
    fn groups_place_once_at_extended_box() {
        let mut engine = engine();
        let spans = [
            span("Context", BoundingBox::new(50.0, 100.0, 90.0, 112.0), 0),
            span("tall", BoundingBox::new(95.0, 80.0, 400.0, 140.0), 1),
            span("Task", BoundingBox::new(100.0, 100.0, 130.0, 114.0), 2),
        ];
        let group = TranslationGroup {
            start_index: 0,
            end_index: 2,
            original_text: "Context tall Task".to_string(),
            translated_text: "Ctx".to_string(),
            spans: spans.iter().collect(),
        };
        let report = replace_groups(
            &mut engine,
            0,
            &[group],
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!((report.erased, report.placed), (3, 1));
        let ops = text_ops(&engine);
        assert_eq!(ops.len(), 1);
        let EngineOp::TextBox { bbox, .. } = ops[0] else {
            panic!("expected a text box");
        };
        assert_eq!(*bbox, BoundingBox::new(50.0, 100.0, 130.0, 114.0));
    }

    #[test]
    fn empty_groups_are_skipped() {
        let mut engine = engine();
        let spans = [span("Task", BoundingBox::new(10.0, 10.0, 40.0, 20.0), 0)];
        let mut group = TranslationGroup::singleton(&spans[0]);
        group.translated_text = "  ".to_string();
        let report = replace_groups(
            &mut engine,
            0,
            &[group],
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!((report.erased, report.placed), (0, 0));
        assert!(engine.ops().is_empty());
    }

    #[test]
    fn cjk_text_uses_baseline_writer() {
        let mut engine = engine();
        let fonts = FontSet::with_cjk(ExternalFont::named("Test Gothic"));
        let blocks = vec![block(
            "Task",
            "課題",
            BoundingBox::new(50.0, 100.0, 300.0, 130.0),
            Vec::new(),
        )];
        replace_blocks(&mut engine, 0, &blocks, &fonts, &FontLimits::default()).unwrap();
        let ops = text_ops(&engine);
        let EngineOp::BaselineText { runs, font, size, .. } = ops[0] else {
            panic!("expected baseline text");
        };
        assert_eq!(font, "Test Gothic");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "課題");
        assert_eq!(runs[0].x, 50.0);
        assert_eq!(runs[0].y, 100.0 + *size);
    }

    #[test]
    fn missing_cjk_font_leaves_unit_untouched() {
        let mut engine = engine();
        let blocks = vec![
            block("Task", "課題", BoundingBox::new(50.0, 100.0, 300.0, 130.0), Vec::new()),
            block("Hi", "Hello", BoundingBox::new(50.0, 200.0, 300.0, 230.0), Vec::new()),
        ];
        let report = replace_blocks(
            &mut engine,
            0,
            &blocks,
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!(report.font_faults.len(), 1);
        assert_eq!((report.erased, report.placed), (1, 1));
    }

    #[test]
    fn degenerate_box_fails_before_erasing() {
        let mut engine = engine();
        let blocks = vec![
            block("Hi", "Hello", BoundingBox::new(50.0, 200.0, 300.0, 230.0), Vec::new()),
            block("Flat", "Flat", BoundingBox::new(50.0, 100.0, 300.0, 100.0), Vec::new()),
        ];
        let err = replace_blocks(
            &mut engine,
            0,
            &blocks,
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err.page, 1);
        assert_eq!(err.unit, "block_000001");
        assert!(engine.ops().is_empty());
    }

    #[test]
    fn overflow_falls_back_to_wrapped_lines() {
        let mut engine = engine();
        let blocks = vec![block(
            "Short",
            "A considerably longer translated sentence",
            BoundingBox::new(50.0, 100.0, 110.0, 112.0),
            Vec::new(),
        )];
        let report = replace_blocks(
            &mut engine,
            0,
            &blocks,
            &FontSet::without_cjk(),
            &FontLimits::default(),
        )
        .unwrap();
        assert_eq!(report.placed, 1);
        let ops = text_ops(&engine);
        let EngineOp::BaselineText { runs, size, .. } = ops[0] else {
            panic!("expected baseline text, got {:?}", ops[0]);
        };
        assert_eq!(*size, 6.0);
        assert!(runs.len() > 1);
    }
}
