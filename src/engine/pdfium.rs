use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    Align, BaselineRun, DocumentEngine, DocumentMetadata, PageDict, RawBlock, RawLine, RawSpan,
    output_parent, pack_color,
};
use crate::error::{ExtractionFault, PlacementError, WriteFault};
use crate::font::{BuiltinFont, FontChoice};
use crate::layout::{LINE_HEIGHT, wrap_text};
use crate::model::{BoundingBox, DrawingInfo, ImageInfo};

const BOLD_FLAG: u32 = 1 << 4;
const ITALIC_FLAG: u32 = 1 << 1;

/// PDFium-backed engine. The library is bound once per process and kept alive for the document.
pub struct PdfiumEngine {
    path: PathBuf,
    document: PdfDocument<'static>,
    pending: HashMap<usize, Vec<(BoundingBox, bool)>>,
    fonts: HashMap<String, PdfFontToken>,
}

fn bind() -> Result<&'static Pdfium, ExtractionFault> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|err| ExtractionFault::Unsupported {
            reason: format!("failed to bind pdfium library: {}", err),
        })?;
    Ok(Box::leak(Box::new(Pdfium::new(bindings))))
}

impl PdfiumEngine {
    pub fn open(path: &Path) -> Result<Self, ExtractionFault> {
        if !path.exists() {
            return Err(ExtractionFault::NotFound(path.to_path_buf()));
        }
        let pdfium = bind()?;
        let document = pdfium.load_pdf_from_file(path, None).map_err(|err| match err {
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                ExtractionFault::Encrypted(path.to_path_buf())
            }
            other => ExtractionFault::Corrupt {
                reason: format!("failed to open {}: {}", path.display(), other),
            },
        })?;
        debug!("opened {} ({} pages)", path.display(), document.pages().len());
        Ok(Self {
            path: path.to_path_buf(),
            document,
            pending: HashMap::new(),
            fonts: HashMap::new(),
        })
    }

    fn page(&self, page: usize) -> Result<PdfPage<'static>, PlacementError> {
        let index = u16::try_from(page)
            .map_err(|_| PlacementError::Rejected(format!("page {} out of range", page)))?;
        self.document
            .pages()
            .get(index)
            .map_err(|err| PlacementError::Rejected(format!("page {}: {}", page, err)))
    }

    fn font_token(&mut self, font: &FontChoice) -> Result<PdfFontToken, PlacementError> {
        if let Some(token) = self.fonts.get(font.name()) {
            return Ok(*token);
        }
        let fonts = self.document.fonts_mut();
        let token = match font {
            FontChoice::Builtin(BuiltinFont::Helvetica) => fonts.helvetica(),
            FontChoice::Builtin(BuiltinFont::HelveticaBold) => fonts.helvetica_bold(),
            FontChoice::External(external) => {
                let data = external.data().ok_or_else(|| {
                    PlacementError::Rejected(format!("font '{}' has no data", external.family()))
                })?;
                fonts
                    .load_true_type_from_bytes(data, true)
                    .map_err(|err| PlacementError::Rejected(format!("font '{}': {}", external.family(), err)))?
            }
        };
        self.fonts.insert(font.name().to_string(), token);
        Ok(token)
    }

    /// Adds one text object with its baseline at `(x, baseline)` in top-down coordinates.
    #[allow(clippy::too_many_arguments)]
    fn place_line(
        &mut self,
        page: usize,
        x: f32,
        baseline: f32,
        text: &str,
        font: &FontChoice,
        size: f32,
        color: [f32; 3],
    ) -> Result<(), PlacementError> {
        let token = self.font_token(font)?;
        let mut target = self.page(page)?;
        let height = target.height().value;
        let mut object = PdfPageTextObject::new(&self.document, text, token, PdfPoints::new(size))
            .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        let packed = pack_color(color);
        object
            .set_fill_color(PdfColor::new(
                (packed >> 16) as u8,
                (packed >> 8) as u8,
                packed as u8,
                255,
            ))
            .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        object
            .translate(PdfPoints::new(x), PdfPoints::new(height - baseline))
            .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        target
            .objects_mut()
            .add_text_object(object)
            .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        Ok(())
    }
}

fn top_down(rect: &PdfRect, page_height: f32) -> BoundingBox {
    BoundingBox::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

fn object_rect(object: &PdfPageObject) -> Option<PdfRect> {
    object.bounds().ok().map(|quad| quad.to_rect())
}

fn text_span(object: &PdfPageTextObject, bbox: BoundingBox) -> RawSpan {
    let font = object.font();
    let name = font.name();
    let mut flags = 0;
    if name.contains("Bold") {
        flags |= BOLD_FLAG;
    }
    if name.contains("Italic") || name.contains("Oblique") {
        flags |= ITALIC_FLAG;
    }
    let color = object
        .fill_color()
        .map(|color| {
            ((color.red() as u32) << 16) | ((color.green() as u32) << 8) | color.blue() as u32
        })
        .unwrap_or(0);
    RawSpan {
        text: object.text(),
        bbox: bbox.to_array(),
        font: name,
        size: object.unscaled_font_size().value,
        flags,
        color,
    }
}

/// Lines share a baseline band; a block ends when the gap to the next line exceeds one line height.
fn group_spans(mut spans: Vec<RawSpan>) -> Vec<RawBlock> {
    spans.sort_by(|a, b| a.bbox[3].total_cmp(&b.bbox[3]).then(a.bbox[0].total_cmp(&b.bbox[0])));

    let mut lines: Vec<RawLine> = Vec::new();
    for span in spans {
        let band = span.size.max(1.0) * 0.5;
        match lines.last_mut() {
            Some(line)
                if line
                    .spans
                    .last()
                    .is_some_and(|last| (last.bbox[3] - span.bbox[3]).abs() <= band) =>
            {
                line.spans.push(span)
            }
            _ => lines.push(RawLine { spans: vec![span] }),
        }
    }

    let mut blocks: Vec<RawBlock> = Vec::new();
    for line in lines {
        let bbox = line_bbox(&line);
        let size = line.spans.first().map(|span| span.size).unwrap_or(12.0);
        match blocks.last_mut() {
            Some(block) if bbox.y0 - block.bbox[3] <= size * LINE_HEIGHT => {
                block.bbox = BoundingBox::from_array(block.bbox).union(&bbox).to_array();
                block.lines.push(line);
            }
            _ => blocks.push(RawBlock {
                bbox: bbox.to_array(),
                lines: vec![line],
            }),
        }
    }
    blocks
}

fn line_bbox(line: &RawLine) -> BoundingBox {
    line.spans
        .iter()
        .map(|span| BoundingBox::from_array(span.bbox))
        .reduce(|acc, bbox| acc.union(&bbox))
        .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
}

impl DocumentEngine for PdfiumEngine {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn metadata(&self) -> DocumentMetadata {
        let metadata = self.document.metadata();
        let value = |tag: PdfDocumentMetadataTagType| {
            metadata
                .get(tag)
                .map(|entry| entry.value().to_string())
                .filter(|value| !value.trim().is_empty())
        };
        DocumentMetadata {
            title: value(PdfDocumentMetadataTagType::Title),
            author: value(PdfDocumentMetadataTagType::Author),
        }
    }

    fn page_dict(&mut self, page: usize) -> Result<PageDict, ExtractionFault> {
        let fault = |reason: String| ExtractionFault::PageRead { page, reason };
        let index = u16::try_from(page).map_err(|err| fault(err.to_string()))?;
        let source = self
            .document
            .pages()
            .get(index)
            .map_err(|err| fault(err.to_string()))?;
        let height = source.height().value;

        let mut spans = Vec::new();
        let mut images = Vec::new();
        let mut drawings = Vec::new();
        for (position, object) in source.objects().iter().enumerate() {
            let Some(rect) = object_rect(&object) else {
                continue;
            };
            let bbox = top_down(&rect, height);
            if let Some(text) = object.as_text_object() {
                spans.push(text_span(text, bbox));
            } else if object.as_image_object().is_some() {
                images.push(ImageInfo {
                    id: format!("img_{}_{}", page, position),
                    bbox,
                    data: None,
                    image_type: "image".to_string(),
                    xref: position as u32,
                });
            } else if object.as_path_object().is_some() {
                drawings.push(DrawingInfo {
                    id: format!("path_{}_{}", page, position),
                    kind: "path".to_string(),
                    bbox,
                    stroke_color: None,
                    fill_color: None,
                    stroke_width: 0.0,
                });
            }
        }

        Ok(PageDict {
            width: source.width().value,
            height,
            rotation: source.rotation().map(|rotation| rotation.as_degrees() as i32).unwrap_or(0),
            blocks: group_spans(spans),
            images,
            drawings,
        })
    }

    fn add_redaction(&mut self, page: usize, bbox: BoundingBox, fill: bool) -> Result<(), PlacementError> {
        self.pending.entry(page).or_default().push((bbox, fill));
        Ok(())
    }

    fn apply_redactions(&mut self, page: usize) -> Result<(), PlacementError> {
        let boxes = self.pending.remove(&page).unwrap_or_default();
        if boxes.is_empty() {
            return Ok(());
        }
        let mut target = self.page(page)?;
        let height = target.height().value;

        let doomed = target
            .objects()
            .iter()
            .enumerate()
            .filter(|(_, object)| object.as_text_object().is_some())
            .filter_map(|(index, object)| {
                let (cx, cy) = top_down(&object_rect(&object)?, height).center();
                boxes
                    .iter()
                    .any(|(bbox, _)| bbox.contains_point(cx, cy))
                    .then_some(index)
            })
            .collect::<Vec<_>>();
        for index in doomed.iter().rev() {
            target
                .objects_mut()
                .remove_object_at_index(*index)
                .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        }

        for (bbox, _) in boxes.iter().filter(|(_, fill)| *fill) {
            let rect = PdfRect::new_from_values(height - bbox.y1, bbox.x0, height - bbox.y0, bbox.x1);
            target
                .objects_mut()
                .create_path_object_rect(rect, None, None, Some(PdfColor::WHITE))
                .map_err(|err| PlacementError::Rejected(err.to_string()))?;
        }
        debug!("page {}: removed {} text objects", page, doomed.len());
        Ok(())
    }

    fn insert_text_box(
        &mut self,
        page: usize,
        bbox: BoundingBox,
        text: &str,
        size: f32,
        font: &FontChoice,
        color: [f32; 3],
        align: Align,
    ) -> Result<(), PlacementError> {
        if bbox.is_degenerate() {
            return Err(PlacementError::Rejected(format!("degenerate box {}", bbox)));
        }
        let lines = wrap_text(text, bbox.width(), size, font);
        if lines.len() as f32 * size * LINE_HEIGHT > bbox.height() + f32::EPSILON {
            return Err(PlacementError::LayoutOverflow);
        }
        for (row, line) in lines.iter().enumerate() {
            let width = self.measure_text_width(font, line, size).min(bbox.width());
            let x = match align {
                Align::Left => bbox.x0,
                Align::Center => bbox.x0 + (bbox.width() - width) / 2.0,
                Align::Right => bbox.x1 - width,
            };
            let baseline = bbox.y0 + size + row as f32 * size * LINE_HEIGHT;
            self.place_line(page, x, baseline, line, font, size, color)?;
        }
        Ok(())
    }

    fn write_baseline_text(
        &mut self,
        page: usize,
        runs: &[BaselineRun],
        font: &FontChoice,
        size: f32,
        color: [f32; 3],
    ) -> Result<(), PlacementError> {
        for run in runs.iter().filter(|run| !run.text.is_empty()) {
            self.place_line(page, run.x, run.y, &run.text, font, size, color)?;
        }
        Ok(())
    }

    fn save(&mut self, path: &Path, compress: bool) -> Result<(), WriteFault> {
        let fault = |reason: String| WriteFault {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = output_parent(path) {
            std::fs::create_dir_all(&parent).map_err(|err| fault(err.to_string()))?;
        }
        if !compress {
            warn!("pdfium writes streams as-is; compress=false has no effect");
        }
        self.document
            .save_to_file(path)
            .map_err(|err| fault(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, bbox: [f32; 4]) -> RawSpan {
        RawSpan {
            text: text.to_string(),
            bbox,
            font: "Helvetica".to_string(),
            size: 10.0,
            flags: 0,
            color: 0,
        }
    }

    #[test]
    fn spans_group_into_lines_and_blocks() {
        let blocks = group_spans(vec![
            span("world", [60.0, 10.0, 100.0, 20.0]),
            span("Hello", [10.0, 10.0, 50.0, 20.0]),
            span("next line", [10.0, 22.0, 80.0, 32.0]),
            span("far below", [10.0, 200.0, 80.0, 210.0]),
        ]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines.len(), 2);
        assert_eq!(blocks[0].lines[0].spans[0].text, "Hello");
        assert_eq!(blocks[0].bbox, [10.0, 10.0, 100.0, 32.0]);
        assert_eq!(blocks[1].lines[0].spans[0].text, "far below");
    }
}
