use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    Align, BaselineRun, DocumentEngine, DocumentMetadata, PageDict, RawBlock, RawLine, RawSpan,
    output_parent, pack_color,
};
use crate::error::{ExtractionFault, PlacementError, WriteFault};
use crate::font::{BuiltinFont, FontChoice};
use crate::layout::{LINE_HEIGHT, wrap_text};
use crate::model::BoundingBox;

const BOLD_FLAG: u32 = 1 << 4;

/// Page-description file read by [`MemoryEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub pages: Vec<PageDict>,
}

/// Every mutating call, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineOp {
    Redaction {
        page: usize,
        bbox: BoundingBox,
        fill: bool,
    },
    ApplyRedactions {
        page: usize,
        removed: usize,
    },
    TextBox {
        page: usize,
        bbox: BoundingBox,
        text: String,
        size: f32,
        font: String,
        color: [f32; 3],
    },
    BaselineText {
        page: usize,
        runs: Vec<BaselineRun>,
        font: String,
        size: f32,
        color: [f32; 3],
    },
}

#[derive(Debug, Serialize)]
struct SavedDocument<'a> {
    title: Option<&'a str>,
    author: Option<&'a str>,
    pages: &'a [PageDict],
    operations: &'a [EngineOp],
}

/// Document engine over in-memory page dictionaries. Records what it is asked to do.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    path: PathBuf,
    document: MemoryDocument,
    pending: Vec<Vec<(BoundingBox, bool)>>,
    ops: Vec<EngineOp>,
}

impl MemoryEngine {
    pub fn new(path: impl Into<PathBuf>, document: MemoryDocument) -> Self {
        let pending = vec![Vec::new(); document.pages.len()];
        Self {
            path: path.into(),
            document,
            pending,
            ops: Vec::new(),
        }
    }

    pub fn from_pages(path: impl Into<PathBuf>, pages: Vec<PageDict>) -> Self {
        Self::new(
            path,
            MemoryDocument {
                pages,
                ..MemoryDocument::default()
            },
        )
    }

    pub fn load(path: &Path) -> Result<Self, ExtractionFault> {
        let content = fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ExtractionFault::NotFound(path.to_path_buf())
            } else {
                ExtractionFault::Corrupt {
                    reason: format!("failed to read {}: {}", path.display(), err),
                }
            }
        })?;
        let document: MemoryDocument =
            serde_json::from_str(&content).map_err(|err| ExtractionFault::Corrupt {
                reason: format!("failed to parse {}: {}", path.display(), err),
            })?;
        if document.encrypted {
            return Err(ExtractionFault::Encrypted(path.to_path_buf()));
        }
        Ok(Self::new(path, document))
    }

    pub fn ops(&self) -> &[EngineOp] {
        &self.ops
    }

    pub fn page(&self, page: usize) -> Option<&PageDict> {
        self.document.pages.get(page)
    }

    fn page_mut(&mut self, page: usize) -> Result<&mut PageDict, PlacementError> {
        self.document
            .pages
            .get_mut(page)
            .ok_or_else(|| PlacementError::Rejected(format!("page {} out of range", page)))
    }

    fn push_text(&mut self, page: usize, spans: Vec<RawSpan>) -> Result<(), PlacementError> {
        if spans.is_empty() {
            return Ok(());
        }
        let bbox = spans
            .iter()
            .map(|span| BoundingBox::from_array(span.bbox))
            .reduce(|acc, bbox| acc.union(&bbox))
            .map(BoundingBox::to_array)
            .unwrap_or_default();
        let lines = spans.into_iter().map(|span| RawLine { spans: vec![span] }).collect();
        self.page_mut(page)?.blocks.push(RawBlock { bbox, lines });
        Ok(())
    }
}

fn check_box(bbox: &BoundingBox) -> Result<(), PlacementError> {
    if bbox.is_degenerate() {
        return Err(PlacementError::Rejected(format!("degenerate box {}", bbox)));
    }
    Ok(())
}

fn font_flags(font: &FontChoice) -> u32 {
    match font {
        FontChoice::Builtin(BuiltinFont::HelveticaBold) => BOLD_FLAG,
        _ => 0,
    }
}

impl DocumentEngine for MemoryEngine {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.document.pages.len()
    }

    fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.document.title.clone(),
            author: self.document.author.clone(),
        }
    }

    fn page_dict(&mut self, page: usize) -> Result<PageDict, ExtractionFault> {
        self.document
            .pages
            .get(page)
            .cloned()
            .ok_or_else(|| ExtractionFault::PageRead {
                page,
                reason: format!("document has {} pages", self.document.pages.len()),
            })
    }

    fn add_redaction(&mut self, page: usize, bbox: BoundingBox, fill: bool) -> Result<(), PlacementError> {
        let pending = self
            .pending
            .get_mut(page)
            .ok_or_else(|| PlacementError::Rejected(format!("page {} out of range", page)))?;
        pending.push((bbox, fill));
        self.ops.push(EngineOp::Redaction { page, bbox, fill });
        Ok(())
    }

    fn apply_redactions(&mut self, page: usize) -> Result<(), PlacementError> {
        let boxes = self
            .pending
            .get_mut(page)
            .map(std::mem::take)
            .ok_or_else(|| PlacementError::Rejected(format!("page {} out of range", page)))?;
        let target = self.page_mut(page)?;
        let mut removed = 0usize;
        for block in &mut target.blocks {
            for line in &mut block.lines {
                line.spans.retain(|span| {
                    let (cx, cy) = BoundingBox::from_array(span.bbox).center();
                    let hit = boxes.iter().any(|(bbox, _)| bbox.contains_point(cx, cy));
                    if hit {
                        removed += 1;
                    }
                    !hit
                });
            }
            block.lines.retain(|line| !line.spans.is_empty());
        }
        target.blocks.retain(|block| !block.lines.is_empty());
        debug!("page {}: {} redactions removed {} spans", page, boxes.len(), removed);
        self.ops.push(EngineOp::ApplyRedactions { page, removed });
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
        check_box(&bbox)?;
        let lines = wrap_text(text, bbox.width(), size, font);
        if lines.len() as f32 * size * LINE_HEIGHT > bbox.height() + f32::EPSILON {
            return Err(PlacementError::LayoutOverflow);
        }
        let mut spans = Vec::with_capacity(lines.len());
        for (row, line) in lines.iter().enumerate() {
            let width = font.measure(line, size).min(bbox.width());
            let x0 = match align {
                Align::Left => bbox.x0,
                Align::Center => bbox.x0 + (bbox.width() - width) / 2.0,
                Align::Right => bbox.x1 - width,
            };
            let y0 = bbox.y0 + row as f32 * size * LINE_HEIGHT;
            spans.push(RawSpan {
                text: line.clone(),
                bbox: [x0, y0, x0 + width, y0 + size],
                font: font.name().to_string(),
                size,
                flags: font_flags(font),
                color: pack_color(color),
            });
        }
        self.push_text(page, spans)?;
        self.ops.push(EngineOp::TextBox {
            page,
            bbox,
            text: text.to_string(),
            size,
            font: font.name().to_string(),
            color,
        });
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
        let spans = runs
            .iter()
            .filter(|run| !run.text.is_empty())
            .map(|run| RawSpan {
                text: run.text.clone(),
                bbox: [run.x, run.y - size, run.x + font.measure(&run.text, size), run.y],
                font: font.name().to_string(),
                size,
                flags: font_flags(font),
                color: pack_color(color),
            })
            .collect::<Vec<_>>();
        self.push_text(page, spans)?;
        self.ops.push(EngineOp::BaselineText {
            page,
            runs: runs.to_vec(),
            font: font.name().to_string(),
            size,
            color,
        });
        Ok(())
    }

    fn save(&mut self, path: &Path, compress: bool) -> Result<(), WriteFault> {
        let fault = |reason: String| WriteFault {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = output_parent(path) {
            fs::create_dir_all(&parent).map_err(|err| fault(err.to_string()))?;
        }
        let saved = SavedDocument {
            title: self.document.title.as_deref(),
            author: self.document.author.as_deref(),
            pages: &self.document.pages,
            operations: &self.ops,
        };
        let encoded = if compress {
            serde_json::to_string(&saved)
        } else {
            serde_json::to_string_pretty(&saved)
        }
        .map_err(|err| fault(err.to_string()))?;
        fs::write(path, encoded).map_err(|err| fault(err.to_string()))?;
        debug!("saved {} pages to {}", self.document.pages.len(), path.display());
        Ok(())
    }
}
