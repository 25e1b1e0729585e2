pub mod engine;
pub mod error;
pub mod extract;
pub mod font;
pub mod languages;
pub mod layout;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod rewrite;
pub mod settings;
pub mod translations;
pub mod translator;

#[cfg(test)]
mod test_util;

pub use engine::{DocumentEngine, MemoryEngine, open_document};
pub use error::PipelineError;
pub use extract::{ExtractionMode, Extractor};
pub use languages::{Direction, Language};
pub use pipeline::{Pipeline, PipelineOptions, RunSummary};
pub use providers::{ClaudeTranslator, TranslationService};
pub use translator::Translator;
