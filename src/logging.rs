use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

/// Console output at the configured level (DEBUG when verbose) plus an optional ANSI-free
/// DEBUG file log. A second call keeps the first subscriber.
pub fn init(verbose: bool, level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        level.map(level_from_name).unwrap_or(LevelFilter::INFO)
    };
    let console = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(console_level);

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
            }
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(handle))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    let _ = registry().with(console).with(file).try_init();
    Ok(())
}

/// Maps a configured level name onto a filter; unknown names mean INFO.
pub fn level_from_name(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "critical" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(level_from_name("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(level_from_name("warning"), LevelFilter::WARN);
        assert_eq!(level_from_name("CRITICAL"), LevelFilter::ERROR);
        assert_eq!(level_from_name("chatty"), LevelFilter::INFO);
    }

    #[test]
    fn file_log_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");
        init(false, Some("warn"), Some(&path)).unwrap();
        init(true, None, None).unwrap();
        assert!(path.exists());
    }
}
