use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::engine::{DocumentEngine, open_document};
use crate::error::{ExtractionFault, PipelineError, WriteFault};
use crate::extract::{ExtractionMode, Extractor};
use crate::font::FontSet;
use crate::languages::{Direction, Language, detect_language};
use crate::layout::{FontLimits, adjusted_font_size};
use crate::model::{Document, IdSequence, LayoutStatistics, OVERFLOW_RISK_RATIO, Page, TranslationGroup};
use crate::providers::TranslationService;
use crate::rewrite::{RewriteReport, replace_blocks, replace_groups};
use crate::settings::Settings;
use crate::translator::Translator;

pub type ProgressFn = Box<dyn FnMut(usize, usize, &str) + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Fixed direction. `None` (or `auto_detect`) detects the source language from the text.
    pub direction: Option<Direction>,
    pub auto_detect: bool,
    pub mode: ExtractionMode,
    pub merge_overlapping: bool,
    /// Let the service regroup spans per page. Implies hybrid extraction.
    pub group_spans: bool,
    pub output_dir: Option<PathBuf>,
    pub dump_layout: Option<PathBuf>,
    pub compress: bool,
    pub limits: FontLimits,
    pub max_file_size: u64,
    pub max_pages: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            direction: None,
            auto_detect: false,
            mode: ExtractionMode::Hybrid,
            merge_overlapping: true,
            group_spans: false,
            output_dir: None,
            dump_layout: None,
            compress: true,
            limits: FontLimits::default(),
            max_file_size: 100 * 1024 * 1024,
            max_pages: 100,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.extraction_mode,
            merge_overlapping: settings.merge_overlapping,
            group_spans: settings.group_spans,
            output_dir: settings.output_dir.clone(),
            compress: settings.compress,
            limits: settings.font_limits(),
            max_file_size: settings.max_file_size,
            max_pages: settings.max_pages,
            ..Self::default()
        }
    }

    fn auto(&self) -> bool {
        self.auto_detect || self.direction.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub output: PathBuf,
    pub direction: Direction,
    pub pages: usize,
    pub blocks: usize,
    pub erased: usize,
    pub placed: usize,
    pub font_faults: usize,
    pub statistics: LayoutStatistics,
    pub elapsed: Duration,
}

/// `<dir>/<stem>_<target>.<ext>`, or `_translated` when the direction was detected.
/// `dir` defaults to the input's directory and `ext` to `pdf`.
pub fn output_path(input: &Path, output_dir: Option<&Path>, target: Language, auto: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let suffix = if auto { "translated" } else { target.code() };
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .unwrap_or_else(|| "pdf".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}_{}.{}", stem, suffix, extension))
}

/// Opens, extracts, translates, rewrites and saves one document. Pages run one at a time.
pub struct Pipeline<S> {
    translator: Translator<S>,
    fonts: FontSet,
    options: PipelineOptions,
    progress: Option<ProgressFn>,
}

impl<S> Pipeline<S>
where
    S: TranslationService,
{
    pub fn new(translator: Translator<S>, fonts: FontSet, options: PipelineOptions) -> Self {
        Self {
            translator,
            fonts,
            options,
            progress: None,
        }
    }

    /// Called with `(current_page, total_pages, message)`; pages are 1-based.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(usize, usize, &str) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Applies the file-size limit, then opens the document with the engine for its type.
    pub fn open(&self, path: &Path) -> Result<Box<dyn DocumentEngine>, ExtractionFault> {
        let metadata = fs::metadata(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ExtractionFault::NotFound(path.to_path_buf()),
            _ => ExtractionFault::Corrupt {
                reason: format!("failed to stat {}: {}", path.display(), err),
            },
        })?;
        if metadata.len() > self.options.max_file_size {
            return Err(ExtractionFault::LimitExceeded {
                reason: format!(
                    "{} is {} bytes, limit is {}",
                    path.display(),
                    metadata.len(),
                    self.options.max_file_size
                ),
            });
        }
        open_document(path)
    }

    /// Runs the whole pipeline. `output` overrides the generated output path.
    pub async fn run(
        &mut self,
        engine: &mut dyn DocumentEngine,
        output: Option<&Path>,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let page_count = engine.page_count();
        if page_count > self.options.max_pages {
            return Err(ExtractionFault::LimitExceeded {
                reason: format!(
                    "document has {} pages, limit is {}",
                    page_count, self.options.max_pages
                ),
            }
            .into());
        }
        info!("processing {} ({} pages)", engine.path().display(), page_count);

        let mut document = self.extract(engine)?;
        let direction = self.resolve_direction(&document);
        document.source_language = Some(direction.source());
        document.target_language = Some(direction.target());
        info!(
            "direction: {} ({} -> {})",
            direction,
            direction.source().name(),
            direction.target().name()
        );

        let output = match output {
            Some(path) => path.to_path_buf(),
            None => output_path(
                engine.path(),
                self.options.output_dir.as_deref(),
                direction.target(),
                self.options.auto(),
            ),
        };

        let mut reports = Vec::with_capacity(page_count);
        if self.options.group_spans {
            for page in document.pages.iter_mut() {
                self.report_progress(page.number, page_count, "translating span groups");
                let records = {
                    let spans = page.spans();
                    let groups = self.translator.translate_grouped(&spans, direction).await?;
                    groups.iter().map(TranslationGroup::record).collect::<Vec<_>>()
                };
                debug!("page {}: {} groups", page.number, records.len());
                page.groups = records;
            }
            log_statistics(&document, &self.options.limits);
            for page in &document.pages {
                self.report_progress(page.number, page_count, "rewriting");
                let groups = page.translation_groups();
                reports.push(self.rewrite_groups(engine, page, &groups)?);
            }
        } else {
            for page in document.pages.iter_mut() {
                self.report_progress(page.number, page_count, "translating");
                let translated = self.translator.translate_blocks(&mut page.blocks, direction).await?;
                debug!("page {}: translated {} blocks", page.number, translated);
            }
            log_statistics(&document, &self.options.limits);
            for page in &document.pages {
                self.report_progress(page.number, page_count, "rewriting");
                reports.push(self.rewrite_blocks(engine, page)?);
            }
        }

        if let Some(path) = self.options.dump_layout.as_deref() {
            dump_layout(&document, path)?;
        }
        engine.save(&output, self.options.compress)?;

        let statistics = document.statistics();
        let summary = RunSummary {
            output,
            direction,
            pages: page_count,
            blocks: statistics.total_blocks,
            erased: reports.iter().map(|report| report.erased).sum(),
            placed: reports.iter().map(|report| report.placed).sum(),
            font_faults: reports.iter().map(|report| report.font_faults.len()).sum(),
            statistics,
            elapsed: started.elapsed(),
        };
        if summary.font_faults > 0 {
            warn!("{} units were left untouched for lack of a font", summary.font_faults);
        }
        info!(
            "wrote {} in {:.1}s",
            summary.output.display(),
            summary.elapsed.as_secs_f32()
        );
        Ok(summary)
    }

    fn extract(&self, engine: &mut dyn DocumentEngine) -> Result<Document, ExtractionFault> {
        let mode = if self.options.group_spans {
            ExtractionMode::Hybrid
        } else {
            self.options.mode
        };
        let extractor = Extractor::new(mode).with_merge(self.options.merge_overlapping);
        let mut ids = IdSequence::new();
        let page_count = engine.page_count();
        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let dict = engine.page_dict(index)?;
            let blocks = extractor.extract(&dict, &mut ids);
            debug!("page {}: {} blocks", index + 1, blocks.len());
            pages.push(Page {
                number: index + 1,
                width: dict.width,
                height: dict.height,
                rotation: dict.rotation,
                blocks,
                images: dict.images,
                drawings: dict.drawings,
                groups: Vec::new(),
            });
        }
        let metadata = engine.metadata();
        Ok(Document {
            file: engine.path().to_path_buf(),
            page_count,
            title: metadata.title,
            author: metadata.author,
            pages,
            source_language: None,
            target_language: None,
        })
    }

    fn resolve_direction(&self, document: &Document) -> Direction {
        match self.options.direction {
            Some(direction) if !self.options.auto_detect => direction,
            _ => {
                let detected = detect_language(&document.all_text());
                info!("detected source language: {}", detected.name());
                Direction::from_source(detected)
            }
        }
    }

    fn rewrite_blocks(&self, engine: &mut dyn DocumentEngine, page: &Page) -> Result<RewriteReport, PipelineError> {
        Ok(replace_blocks(
            engine,
            page.number - 1,
            &page.blocks,
            &self.fonts,
            &self.options.limits,
        )?)
    }

    fn rewrite_groups(
        &self,
        engine: &mut dyn DocumentEngine,
        page: &Page,
        groups: &[TranslationGroup<'_>],
    ) -> Result<RewriteReport, PipelineError> {
        Ok(replace_groups(
            engine,
            page.number - 1,
            groups,
            &self.fonts,
            &self.options.limits,
        )?)
    }

    fn report_progress(&mut self, current: usize, total: usize, message: &str) {
        debug!("[{}/{}] {}", current, total, message);
        if let Some(progress) = self.progress.as_mut() {
            progress(current, total, message);
        }
    }
}

fn log_statistics(document: &Document, limits: &FontLimits) {
    let stats = document.statistics();
    info!(
        "layout: {} pages, {} blocks, {} images, expansion avg {:.2} max {:.2}",
        stats.total_pages,
        stats.total_blocks,
        stats.total_images,
        stats.avg_expansion_ratio,
        stats.max_expansion_ratio
    );
    if stats.blocks_needing_adjustment > 0 {
        warn!(
            "{} blocks expand beyond {:.1}x (pages {:?})",
            stats.blocks_needing_adjustment, OVERFLOW_RISK_RATIO, stats.pages_with_overflow_risk
        );
    }
    for block in document
        .pages
        .iter()
        .flat_map(|page| page.blocks.iter())
        .filter(|block| block.expansion_ratio() > OVERFLOW_RISK_RATIO)
    {
        debug!(
            "{}: ratio {:.2}, suggested size {:.1}pt",
            block.id,
            block.expansion_ratio(),
            adjusted_font_size(block, limits)
        );
    }
    for (page, group) in document.pages.iter().flat_map(|page| {
        page.groups
            .iter()
            .filter(|group| group.expansion_ratio() > OVERFLOW_RISK_RATIO)
            .map(move |group| (page.number, group))
    }) {
        debug!(
            "page {} spans {}..={}: ratio {:.2}",
            page,
            group.start_index,
            group.end_index,
            group.expansion_ratio()
        );
    }
}

fn dump_layout(document: &Document, path: &Path) -> Result<(), WriteFault> {
    let fault = |reason: String| WriteFault {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| fault(err.to_string()))?;
    }
    let encoded = serde_json::to_string_pretty(document).map_err(|err| fault(err.to_string()))?;
    fs::write(path, encoded).map_err(|err| fault(err.to_string()))?;
    info!("layout written to {}", path.display());
    Ok(())
}
