use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use llm_pdf_translator::error::{EXIT_SUCCESS, PipelineError};
use llm_pdf_translator::font::FontSet;
use llm_pdf_translator::{
    ClaudeTranslator, Direction, ExtractionMode, Pipeline, PipelineOptions, RunSummary, Translator,
    logging, settings,
};

#[derive(Parser, Debug)]
#[command(
    name = "llm-pdf-translator",
    version,
    about = "Translate PDF documents between Japanese and English while keeping their layout"
)]
struct Cli {
    /// Document to translate
    input_file: PathBuf,

    /// Output file (default: <input>_<target>.pdf next to the input or in the configured output_dir)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Translation direction
    #[arg(short = 'd', long = "direction", value_enum)]
    direction: Option<Direction>,

    /// Detect the source language from the document text
    #[arg(short = 'a', long = "auto-detect")]
    auto_detect: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Also write logs to this file
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Extraction granularity
    #[arg(long = "mode", value_enum)]
    mode: Option<ExtractionMode>,

    /// Keep overlapping duplicate blocks
    #[arg(long = "no-merge")]
    no_merge: bool,

    /// Let the translation service regroup spans into semantic units
    #[arg(long = "group-spans")]
    group_spans: bool,

    /// Write the extracted and translated layout as JSON
    #[arg(long = "dump-layout")]
    dump_layout: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => {
            info!(
                "done: {} pages, {} units placed -> {}",
                summary.pages,
                summary.placed,
                summary.output.display()
            );
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary, PipelineError> {
    let settings = settings::load_settings(cli.read_settings.as_deref())?;
    let log_file = cli.log_file.clone().or_else(|| settings.log_file.clone());
    logging::init(cli.verbose, settings.log_level.as_deref(), log_file.as_deref())?;
    settings.validate()?;

    let key = settings.api_key.clone().unwrap_or_default();
    let service = ClaudeTranslator::new(key)
        .with_model(settings.model.clone())
        .with_max_tokens(settings.max_tokens)
        .with_temperature(settings.temperature)
        .with_timeout(settings.timeout);
    let translator = Translator::new(service)
        .with_policy(settings.retry_policy())
        .with_unit_timeout(Some(settings.unit_timeout()));

    let mut options = PipelineOptions::from_settings(&settings);
    options.direction = cli.direction;
    options.auto_detect = cli.auto_detect;
    if let Some(mode) = cli.mode {
        options.mode = mode;
    }
    if cli.no_merge {
        options.merge_overlapping = false;
    }
    if cli.group_spans {
        options.group_spans = true;
    }
    options.dump_layout = cli.dump_layout.clone();

    info!("llm-pdf-translator {}", env!("CARGO_PKG_VERSION"));
    info!(
        "input: {}, model: {}, mode: {}",
        cli.input_file.display(),
        settings.model,
        options.mode.as_str()
    );

    let mut pipeline = Pipeline::new(translator, FontSet::new(settings.font_sources()), options)
        .with_progress(|current, total, message| info!("[{}/{}] {}", current, total, message));
    let mut engine = pipeline.open(&cli.input_file)?;
    pipeline.run(engine.as_mut(), cli.output.as_deref()).await
}
