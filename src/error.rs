use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::BoundingBox;

/// Failures opening or reading the input document. Fatal for the document.
#[derive(Error, Debug)]
pub enum ExtractionFault {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("document is encrypted: {}", .0.display())]
    Encrypted(PathBuf),

    #[error("document is corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("failed to read page {page}: {reason}")]
    PageRead { page: usize, reason: String },

    #[error("unsupported input: {reason}")]
    Unsupported { reason: String },

    #[error("input exceeds limits: {reason}")]
    LimitExceeded { reason: String },
}

/// Discriminant of [`TranslationFault`], used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    RateLimited,
    ConnectionFailed,
    Unauthenticated,
    Other,
}

impl FaultKind {
    pub fn is_transient(self) -> bool {
        matches!(self, FaultKind::RateLimited | FaultKind::ConnectionFailed)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationFault {
    #[error("rate limited by translation service: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("translation service unreachable: {0}")]
    ConnectionFailed(String),

    #[error("translation service rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("translation failed: {0}")]
    Other(String),
}

impl TranslationFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            TranslationFault::RateLimited { .. } => FaultKind::RateLimited,
            TranslationFault::ConnectionFailed(_) => FaultKind::ConnectionFailed,
            TranslationFault::Unauthenticated(_) => FaultKind::Unauthenticated,
            TranslationFault::Other(_) => FaultKind::Other,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationFault::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A placement primitive rejected the computed geometry.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("layout failed on page {page} for {unit} at {bbox}: {reason}")]
pub struct LayoutFault {
    pub page: usize,
    pub unit: String,
    pub bbox: BoundingBox,
    pub reason: String,
}

/// A required script font could not be loaded. Scoped to the units that needed it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("font '{family}' unavailable: {reason}")]
pub struct FontFault {
    pub family: String,
    pub reason: String,
}

#[derive(Error, Debug)]
#[error("failed to write {}: {reason}", path.display())]
pub struct WriteFault {
    pub path: PathBuf,
    pub reason: String,
}

/// Errors reported by the engine's text insertion primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("text does not fit the target box")]
    LayoutOverflow,

    #[error("placement rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigFault {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error surfaced to the CLI. Every variant maps to exactly one exit code.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionFault),

    #[error(transparent)]
    Translation(#[from] TranslationFault),

    #[error(transparent)]
    Layout(#[from] LayoutFault),

    #[error(transparent)]
    Write(#[from] WriteFault),

    #[error(transparent)]
    Config(#[from] ConfigFault),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FILE_NOT_FOUND: u8 = 1;
pub const EXIT_READ_ERROR: u8 = 2;
pub const EXIT_CONNECTION_ERROR: u8 = 3;
pub const EXIT_AUTH_ERROR: u8 = 4;
pub const EXIT_WRITE_ERROR: u8 = 5;
pub const EXIT_UNKNOWN_ERROR: u8 = 99;

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Extraction(ExtractionFault::NotFound(_)) => EXIT_FILE_NOT_FOUND,
            PipelineError::Extraction(_) => EXIT_READ_ERROR,
            PipelineError::Translation(fault) => match fault.kind() {
                FaultKind::RateLimited | FaultKind::ConnectionFailed => EXIT_CONNECTION_ERROR,
                FaultKind::Unauthenticated => EXIT_AUTH_ERROR,
                FaultKind::Other => EXIT_UNKNOWN_ERROR,
            },
            PipelineError::Write(_) => EXIT_WRITE_ERROR,
            PipelineError::Config(ConfigFault::MissingApiKey) => EXIT_AUTH_ERROR,
            PipelineError::Config(_) | PipelineError::Layout(_) | PipelineError::Unexpected(_) => {
                EXIT_UNKNOWN_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_fault_classes() {
        let cases: Vec<(PipelineError, u8)> = vec![
            (ExtractionFault::NotFound(PathBuf::from("a.pdf")).into(), 1),
            (ExtractionFault::Encrypted(PathBuf::from("a.pdf")).into(), 2),
            (
                ExtractionFault::LimitExceeded {
                    reason: "120 pages".to_string(),
                }
                .into(),
                2,
            ),
            (
                ExtractionFault::PageRead {
                    page: 3,
                    reason: "bad stream".to_string(),
                }
                .into(),
                2,
            ),
            (
                TranslationFault::RateLimited {
                    message: "slow down".to_string(),
                    retry_after: None,
                }
                .into(),
                3,
            ),
            (TranslationFault::ConnectionFailed("reset".to_string()).into(), 3),
            (TranslationFault::Unauthenticated("401".to_string()).into(), 4),
            (TranslationFault::Other("500".to_string()).into(), 99),
            (
                WriteFault {
                    path: PathBuf::from("/ro/out.pdf"),
                    reason: "read-only".to_string(),
                }
                .into(),
                5,
            ),
            (ConfigFault::MissingApiKey.into(), 4),
            (ConfigFault::Invalid("temperature".to_string()).into(), 99),
        ];
        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{}", error);
        }
    }

    #[test]
    fn only_rate_limit_and_connection_are_transient() {
        assert!(FaultKind::RateLimited.is_transient());
        assert!(FaultKind::ConnectionFailed.is_transient());
        assert!(!FaultKind::Unauthenticated.is_transient());
        assert!(!FaultKind::Other.is_transient());
    }

    #[test]
    fn layout_fault_names_unit_and_box() {
        let fault = LayoutFault {
            page: 2,
            unit: "block_000004".to_string(),
            bbox: BoundingBox::new(10.0, 10.0, 10.0, 30.0),
            reason: "degenerate box".to_string(),
        };
        assert_eq!(
            fault.to_string(),
            "layout failed on page 2 for block_000004 at (10.0, 10.0, 10.0, 30.0): degenerate box"
        );
    }
}
