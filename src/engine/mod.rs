use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ExtractionFault, PlacementError, WriteFault};
use crate::font::FontChoice;
use crate::model::{BoundingBox, DrawingInfo, ImageInfo};

pub mod memory;
#[cfg(feature = "pdf")]
pub mod pdfium;

pub use memory::{EngineOp, MemoryEngine};

/// Positioned text as reported by the engine for one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageDict {
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub rotation: i32,
    #[serde(default)]
    pub blocks: Vec<RawBlock>,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    #[serde(default)]
    pub drawings: Vec<DrawingInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub bbox: [f32; 4],
    #[serde(default)]
    pub lines: Vec<RawLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    #[serde(default)]
    pub spans: Vec<RawSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpan {
    pub text: String,
    pub bbox: [f32; 4],
    #[serde(default)]
    pub font: String,
    #[serde(default = "default_span_size")]
    pub size: f32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub color: u32,
}

fn default_span_size() -> f32 {
    12.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// One line for the baseline writer; `y` is the baseline in top-down page coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRun {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

/// Document engine: parses pages, erases glyphs and places text. Pages are 0-based.
pub trait DocumentEngine {
    fn path(&self) -> &Path;

    fn page_count(&self) -> usize;

    fn metadata(&self) -> DocumentMetadata;

    fn page_dict(&mut self, page: usize) -> Result<PageDict, ExtractionFault>;

    /// Queues an erasure. `fill = false` removes glyphs and keeps whatever is drawn underneath.
    fn add_redaction(&mut self, page: usize, bbox: BoundingBox, fill: bool) -> Result<(), PlacementError>;

    /// Applies every queued erasure on the page at once.
    fn apply_redactions(&mut self, page: usize) -> Result<(), PlacementError>;

    #[allow(clippy::too_many_arguments)]
    fn insert_text_box(
        &mut self,
        page: usize,
        bbox: BoundingBox,
        text: &str,
        size: f32,
        font: &FontChoice,
        color: [f32; 3],
        align: Align,
    ) -> Result<(), PlacementError>;

    /// Appends the runs and commits them to the page in one color.
    fn write_baseline_text(
        &mut self,
        page: usize,
        runs: &[BaselineRun],
        font: &FontChoice,
        size: f32,
        color: [f32; 3],
    ) -> Result<(), PlacementError>;

    fn measure_text_width(&self, font: &FontChoice, text: &str, size: f32) -> f32 {
        font.measure(text, size)
    }

    fn save(&mut self, path: &Path, compress: bool) -> Result<(), WriteFault>;
}

/// Opens `path` with the engine matching its extension.
pub fn open_document(path: &Path) -> Result<Box<dyn DocumentEngine>, ExtractionFault> {
    if !path.exists() {
        return Err(ExtractionFault::NotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "json" => Ok(Box::new(MemoryEngine::load(path)?)),
        "pdf" => open_pdf(path),
        other => Err(ExtractionFault::Unsupported {
            reason: format!("unknown document type '{}' ({})", other, path.display()),
        }),
    }
}

#[cfg(feature = "pdf")]
fn open_pdf(path: &Path) -> Result<Box<dyn DocumentEngine>, ExtractionFault> {
    Ok(Box::new(pdfium::PdfiumEngine::open(path)?))
}

#[cfg(not(feature = "pdf"))]
fn open_pdf(path: &Path) -> Result<Box<dyn DocumentEngine>, ExtractionFault> {
    Err(ExtractionFault::Unsupported {
        reason: format!(
            "PDF support not enabled. Rebuild with --features pdf to open {}",
            path.display()
        ),
    })
}

/// Packs a 0..1 color into `0xRRGGBB`.
pub(crate) fn pack_color(color: [f32; 3]) -> u32 {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    (channel(color[0]) << 16) | (channel(color[1]) << 8) | channel(color[2])
}

pub(crate) fn output_parent(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
