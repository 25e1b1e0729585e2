use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::error::FontFault;
use crate::layout::{TextMeasure, estimate_text_width};

/// Latin faces every document engine provides without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFont {
    Helvetica,
    HelveticaBold,
}

impl BuiltinFont {
    pub fn for_weight(bold: bool) -> Self {
        if bold {
            BuiltinFont::HelveticaBold
        } else {
            BuiltinFont::Helvetica
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFont::Helvetica => "Helvetica",
            BuiltinFont::HelveticaBold => "Helvetica-Bold",
        }
    }
}

/// A font file (or system face) used for scripts the builtin faces cannot render.
#[derive(Clone)]
pub struct ExternalFont {
    family: String,
    path: Option<PathBuf>,
    metrics: Option<FontMetrics>,
}

impl fmt::Debug for ExternalFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFont")
            .field("family", &self.family)
            .field("path", &self.path)
            .field("has_metrics", &self.metrics.is_some())
            .finish()
    }
}

impl ExternalFont {
    /// A face known only by name; widths fall back to estimates.
    pub fn named(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            path: None,
            metrics: None,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.metrics.as_ref().map(|metrics| metrics.data.as_slice())
    }

    pub fn measure(&self, text: &str, size: f32) -> f32 {
        measure_text_width(text, size, self.metrics.as_ref())
    }
}

#[derive(Debug, Clone)]
pub enum FontChoice {
    Builtin(BuiltinFont),
    External(Arc<ExternalFont>),
}

impl FontChoice {
    pub fn name(&self) -> &str {
        match self {
            FontChoice::Builtin(font) => font.name(),
            FontChoice::External(font) => font.family(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, FontChoice::External(_))
    }

    pub fn measure(&self, text: &str, size: f32) -> f32 {
        match self {
            FontChoice::Builtin(_) => estimate_text_width(text, size),
            FontChoice::External(font) => font.measure(text, size),
        }
    }
}

impl TextMeasure for FontChoice {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        self.measure(text, size)
    }
}

#[derive(Clone)]
struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    face_index: u32,
}

/// Where to look for the CJK face, in order.
#[derive(Debug, Clone, Default)]
pub struct FontSources {
    pub font_dir: Option<PathBuf>,
    pub japanese_font: Option<String>,
    pub system_paths: Vec<PathBuf>,
    pub families: Vec<String>,
}

impl FontSources {
    pub fn with_system_defaults(mut self) -> Self {
        self.system_paths = default_system_paths();
        self
    }
}

pub fn default_system_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
        "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
        "/usr/share/fonts/truetype/takao-gothic/TakaoGothic.ttf",
        "/app/fonts/NotoSansJP-Regular.ttf",
        "/System/Library/Fonts/ヒラギノ角ゴシック W3.ttc",
        "/Library/Fonts/Arial Unicode.ttf",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect::<Vec<_>>();
    if let Ok(windir) = std::env::var("WINDIR") {
        let fonts = Path::new(&windir).join("Fonts");
        for name in ["meiryo.ttc", "msgothic.ttc", "YuGothR.ttc"] {
            paths.push(fonts.join(name));
        }
    }
    paths
}

/// Per-run font table. The CJK face is resolved once, on first use.
pub struct FontSet {
    sources: FontSources,
    cjk: OnceLock<Result<Arc<ExternalFont>, FontFault>>,
}

impl FontSet {
    pub fn new(sources: FontSources) -> Self {
        Self {
            sources,
            cjk: OnceLock::new(),
        }
    }

    /// A set whose CJK face is already known.
    pub fn with_cjk(font: ExternalFont) -> Self {
        let cjk = OnceLock::new();
        let _ = cjk.set(Ok(Arc::new(font)));
        Self {
            sources: FontSources::default(),
            cjk,
        }
    }

    /// A set where CJK text cannot be placed.
    pub fn without_cjk() -> Self {
        let cjk = OnceLock::new();
        let _ = cjk.set(Err(FontFault {
            family: "cjk".to_string(),
            reason: "no CJK font configured".to_string(),
        }));
        Self {
            sources: FontSources::default(),
            cjk,
        }
    }

    pub fn latin(&self, bold: bool) -> FontChoice {
        FontChoice::Builtin(BuiltinFont::for_weight(bold))
    }

    pub fn cjk(&self) -> Result<FontChoice, FontFault> {
        self.cjk
            .get_or_init(|| resolve_cjk_font(&self.sources).map(Arc::new))
            .clone()
            .map(FontChoice::External)
    }
}

pub fn resolve_cjk_font(sources: &FontSources) -> Result<ExternalFont, FontFault> {
    if let (Some(dir), Some(name)) = (&sources.font_dir, &sources.japanese_font) {
        let path = dir.join(name);
        if path.exists() {
            return load_font_file(&path);
        }
        warn!("configured font not found: {}", path.display());
    }
    for path in &sources.system_paths {
        if path.exists() {
            match load_font_file(path) {
                Ok(font) => return Ok(font),
                Err(err) => debug!("skipping {}: {}", path.display(), err),
            }
        }
    }
    if !sources.families.is_empty() {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        for family in &sources.families {
            if let Ok(font) = load_font_from_family(&db, family) {
                return Ok(font);
            }
        }
    }
    Err(FontFault {
        family: sources
            .japanese_font
            .clone()
            .unwrap_or_else(|| "cjk".to_string()),
        reason: "no Japanese-capable font found".to_string(),
    })
}

pub fn load_font_file(path: &Path) -> Result<ExternalFont, FontFault> {
    let fault = |reason: String| FontFault {
        family: path.display().to_string(),
        reason,
    };
    let data = std::fs::read(path).map_err(|err| fault(format!("failed to read font: {}", err)))?;
    let (metrics, family) = load_metrics_from_data(data, None).map_err(fault)?;
    let family = family.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cjk".to_string())
    });
    debug!("loaded font {} from {}", family, path.display());
    Ok(ExternalFont {
        family,
        path: Some(path.to_path_buf()),
        metrics: Some(metrics),
    })
}

fn load_font_from_family(db: &fontdb::Database, family: &str) -> Result<ExternalFont, FontFault> {
    let fault = |reason: &str| FontFault {
        family: family.to_string(),
        reason: reason.to_string(),
    };
    let families = [fontdb::Family::Name(family)];
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db.query(&query).ok_or_else(|| fault("font not found"))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| fault("failed to load font data"))?;
    let path = db.face(id).and_then(|face| match &face.source {
        fontdb::Source::File(path) => Some(path.clone()),
        _ => None,
    });
    let (metrics, resolved) = load_metrics_from_data(data, Some(family)).map_err(|err| fault(&err))?;
    Ok(ExternalFont {
        family: resolved.unwrap_or_else(|| family.to_string()),
        path,
        metrics: Some(metrics),
    })
}

fn load_metrics_from_data(
    data: Vec<u8>,
    preferred_family: Option<&str>,
) -> Result<(FontMetrics, Option<String>), String> {
    let data = Arc::new(data);
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(&data, index) {
            let family = extract_family_name(&face);
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            let metrics = FontMetrics {
                data: Arc::clone(&data),
                units_per_em,
                space_advance,
                face_index: index,
            };
            if let (Some(preferred), Some(found)) = (preferred_family, &family)
                && found.eq_ignore_ascii_case(preferred)
            {
                return Ok((metrics, family));
            }
            if fallback.is_none() {
                fallback = Some((metrics, family));
            }
        }
    }
    fallback.ok_or_else(|| "failed to parse font data".to_string())
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

fn measure_text_width(text: &str, size: f32, metrics: Option<&FontMetrics>) -> f32 {
    if let Some(metrics) = metrics
        && let Ok(face) = Face::parse(&metrics.data, metrics.face_index)
    {
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(metrics.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        return advance as f32 * (size / metrics.units_per_em.max(1) as f32);
    }
    estimate_text_width(text, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_selects_bold_builtin() {
        let fonts = FontSet::without_cjk();
        assert_eq!(fonts.latin(true).name(), "Helvetica-Bold");
        assert_eq!(fonts.latin(false).name(), "Helvetica");
    }

    #[test]
    fn missing_cjk_font_is_a_font_fault() {
        let fonts = FontSet::without_cjk();
        let err = fonts.cjk().unwrap_err();
        assert_eq!(err.family, "cjk");
    }

    #[test]
    fn named_font_measures_with_estimates() {
        let fonts = FontSet::with_cjk(ExternalFont::named("Noto Sans CJK JP"));
        let choice = fonts.cjk().unwrap();
        assert!(choice.is_external());
        assert_eq!(choice.name(), "Noto Sans CJK JP");
        assert_eq!(choice.measure("日本", 10.0), 20.0);
    }

    #[test]
    fn unresolvable_sources_report_configured_family() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FontSources {
            font_dir: Some(dir.path().to_path_buf()),
            japanese_font: Some("Missing.ttf".to_string()),
            system_paths: vec![dir.path().join("nope.ttc")],
            families: Vec::new(),
        };
        let err = resolve_cjk_font(&sources).unwrap_err();
        assert_eq!(err.family, "Missing.ttf");
    }

    #[test]
    fn garbage_font_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(load_font_file(&path).is_err());
    }
}
