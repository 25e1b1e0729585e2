use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigFault;
use crate::extract::ExtractionMode;
use crate::font::FontSources;
use crate::layout::{FontLimits, MAX_FONT_SIZE, MIN_FONT_SIZE};
use crate::providers::{DEFAULT_MODEL, RetryPolicy};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const API_KEY_PREFIX: &str = "sk-ant-";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub retry_multiplier: f64,
    pub retry_max_delay: Duration,
    pub output_dir: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_pages: usize,
    pub compress: bool,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub font_dir: Option<PathBuf>,
    pub japanese_font: Option<String>,
    pub cjk_families: Vec<String>,
    pub extraction_mode: ExtractionMode,
    pub merge_overlapping: bool,
    pub group_spans: bool,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_multiplier: 2.0,
            retry_max_delay: Duration::from_secs(60),
            output_dir: None,
            max_file_size: 100 * 1024 * 1024,
            max_pages: 100,
            compress: true,
            min_font_size: MIN_FONT_SIZE,
            max_font_size: MAX_FONT_SIZE,
            font_dir: None,
            japanese_font: None,
            cjk_families: Vec::new(),
            extraction_mode: ExtractionMode::Hybrid,
            merge_overlapping: true,
            group_spans: false,
            log_level: None,
            log_file: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    api: Option<ApiSection>,
    retry: Option<RetrySection>,
    pdf: Option<PdfSection>,
    font: Option<FontSection>,
    extraction: Option<ExtractionSection>,
    log: Option<LogSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    max_retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySection {
    base_delay: Option<f64>,
    multiplier: Option<f64>,
    max_delay: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfSection {
    output_dir: Option<PathBuf>,
    max_file_size: Option<u64>,
    max_pages: Option<usize>,
    compress: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSection {
    min_size: Option<f32>,
    max_size: Option<f32>,
    font_dir: Option<PathBuf>,
    japanese_font: Option<String>,
    cjk_families: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionSection {
    mode: Option<ExtractionMode>,
    merge_overlapping: Option<bool>,
    group_spans: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LogSection {
    level: Option<String>,
    file: Option<PathBuf>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    load_settings_with_env(extra_path, home_dir(), |name| std::env::var(name).ok())
}

/// Embedded defaults, then `./settings.toml`, `./settings.local.toml`, the same pair under `home`,
/// then `extra_path`. Environment variables from `env` win over every file.
pub fn load_settings_with_env<F>(extra_path: Option<&Path>, home: Option<PathBuf>, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).context("failed to parse embedded settings")?;
    settings.merge(defaults);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home {
        ensure_home_settings_file(&home)?;
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    settings.apply_env(env)?;
    Ok(settings)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigFault> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigFault::Invalid(format!("{} must be a number, got '{}'", name, value)))
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(api) = incoming.api {
            if let Some(key) = non_blank(api.key) {
                self.api_key = Some(key);
            }
            if let Some(model) = non_blank(api.model) {
                self.model = model;
            }
            if let Some(max_tokens) = api.max_tokens {
                self.max_tokens = max_tokens;
            }
            if let Some(temperature) = api.temperature {
                self.temperature = temperature;
            }
            if let Some(timeout) = api.timeout
                && timeout > 0
            {
                self.timeout = Duration::from_secs(timeout);
            }
            if let Some(retries) = api.max_retries {
                self.max_retries = retries;
            }
        }
        if let Some(retry) = incoming.retry {
            if let Some(delay) = retry.base_delay {
                self.retry_base_delay = secs(delay);
            }
            if let Some(multiplier) = retry.multiplier
                && multiplier >= 1.0
            {
                self.retry_multiplier = multiplier;
            }
            if let Some(delay) = retry.max_delay {
                self.retry_max_delay = secs(delay);
            }
        }
        if let Some(pdf) = incoming.pdf {
            if let Some(dir) = pdf.output_dir {
                self.output_dir = Some(dir);
            }
            if let Some(size) = pdf.max_file_size {
                self.max_file_size = size;
            }
            if let Some(pages) = pdf.max_pages {
                self.max_pages = pages;
            }
            if let Some(compress) = pdf.compress {
                self.compress = compress;
            }
        }
        if let Some(font) = incoming.font {
            if let Some(size) = font.min_size {
                self.min_font_size = size;
            }
            if let Some(size) = font.max_size {
                self.max_font_size = size;
            }
            if let Some(dir) = font.font_dir {
                self.font_dir = Some(dir);
            }
            if let Some(name) = non_blank(font.japanese_font) {
                self.japanese_font = Some(name);
            }
            if let Some(families) = font.cjk_families {
                self.cjk_families = families;
            }
        }
        if let Some(extraction) = incoming.extraction {
            if let Some(mode) = extraction.mode {
                self.extraction_mode = mode;
            }
            if let Some(merge) = extraction.merge_overlapping {
                self.merge_overlapping = merge;
            }
            if let Some(group) = extraction.group_spans {
                self.group_spans = group;
            }
        }
        if let Some(log) = incoming.log {
            if let Some(level) = non_blank(log.level) {
                self.log_level = Some(level);
            }
            if let Some(file) = log.file {
                self.log_file = Some(file);
            }
        }
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigFault>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_blank(env(name));
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(model) = var("CLAUDE_MODEL") {
            self.model = model;
        }
        if let Some(value) = var("MAX_TOKENS") {
            self.max_tokens = parse_env("MAX_TOKENS", &value)?;
        }
        if let Some(value) = var("TEMPERATURE") {
            self.temperature = parse_env("TEMPERATURE", &value)?;
        }
        if let Some(value) = var("API_TIMEOUT") {
            self.timeout = Duration::from_secs(parse_env("API_TIMEOUT", &value)?);
        }
        if let Some(value) = var("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &value)?;
        }
        if let Some(dir) = var("OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = var("MAX_FILE_SIZE") {
            self.max_file_size = parse_env("MAX_FILE_SIZE", &value)?;
        }
        if let Some(value) = var("MAX_PAGES") {
            self.max_pages = parse_env("MAX_PAGES", &value)?;
        }
        if let Some(dir) = var("FONT_DIR") {
            self.font_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = var("JAPANESE_FONT") {
            self.japanese_font = Some(name);
        }
        if let Some(value) = var("MIN_FONT_SIZE") {
            self.min_font_size = parse_env("MIN_FONT_SIZE", &value)?;
        }
        if let Some(value) = var("MAX_FONT_SIZE") {
            self.max_font_size = parse_env("MAX_FONT_SIZE", &value)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(file) = var("LOG_FILE") {
            self.log_file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigFault> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ConfigFault::MissingApiKey);
        };
        if !key.starts_with(API_KEY_PREFIX) {
            return Err(ConfigFault::Invalid(format!(
                "ANTHROPIC_API_KEY must start with '{}'",
                API_KEY_PREFIX
            )));
        }
        if !(1..=100_000).contains(&self.max_tokens) {
            return Err(ConfigFault::Invalid(format!(
                "max_tokens must be between 1 and 100000, got {}",
                self.max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigFault::Invalid(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        if !self.min_font_size.is_finite()
            || !self.max_font_size.is_finite()
            || self.min_font_size <= 0.0
            || self.min_font_size > self.max_font_size
        {
            return Err(ConfigFault::Invalid(format!(
                "font sizes must satisfy 0 < min ({}) <= max ({})",
                self.min_font_size, self.max_font_size
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: self.retry_base_delay,
            multiplier: self.retry_multiplier,
            max_delay: self.retry_max_delay,
        }
    }

    /// Bound for one unit's whole retried call: every attempt's request timeout plus the longest waits.
    pub fn unit_timeout(&self) -> Duration {
        let attempts = self.max_retries.max(1) as u32;
        self.timeout
            .saturating_mul(attempts)
            .saturating_add(self.retry_max_delay.saturating_mul(attempts - 1))
    }

    pub fn font_limits(&self) -> FontLimits {
        FontLimits {
            min: self.min_font_size,
            max: self.max_font_size,
        }
    }

    pub fn font_sources(&self) -> FontSources {
        FontSources {
            font_dir: self.font_dir.clone(),
            japanese_font: self.japanese_font.clone(),
            system_paths: Vec::new(),
            families: self.cjk_families.clone(),
        }
        .with_system_defaults()
    }
}

fn ensure_home_settings_file(home: &Path) -> Result<()> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".llm-pdf-translator"))
        }
    })
}
