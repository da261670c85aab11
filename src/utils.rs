//! # Utility Functions and Helper Module
//!
//! Helpers shared by both drivers:
//!
//! - **Parsing**: comma-separated option lists and sample-rate validation
//! - **Paths**: `~` expansion and output directory preparation
//! - **Interaction**: confirmation prompts that are skipped with `--silent`
//! - **Formatting**: human-readable durations and echoed command lines
//!
//! ## Usage Examples
//!
//! ```rust
//! use tracebench::utils::*;
//! use std::time::Duration;
//!
//! let rates: Vec<u64> = parse_list("100,,200", "openloop").unwrap();
//! assert_eq!(rates, vec![100, 200]);
//!
//! assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
//! ```

use crate::cli::ConfigError;
use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Parse a comma-separated list, ignoring empty items
///
/// `option` names the command-line option in the error message.
pub fn parse_list<T: FromStr>(value: &str, option: &'static str) -> Result<Vec<T>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>().map_err(|_| ConfigError::InvalidListItem {
                option,
                value: item.to_string(),
            })
        })
        .collect()
}

/// Check that a sample rate is a non-negative number
///
/// The value itself is kept as text: it is passed verbatim to the external
/// binaries and appears verbatim in experiment names.
pub fn validate_sample_rate(rate: &str) -> Result<(), ConfigError> {
    match rate.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(()),
        _ => Err(ConfigError::InvalidSampleRate(rate.to_string())),
    }
}

/// Expand a leading `~` to the current user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Ask the operator to press return before continuing
///
/// Returns an error if stdin is closed, which aborts the run the same way
/// CTRL-C would.
pub fn confirm(prompt: &str) -> Result<()> {
    println!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read confirmation from stdin")?;
    if read == 0 {
        return Err(anyhow!("Aborted: no confirmation received"));
    }
    Ok(())
}

/// Create the given directories, asking first unless `silent` is set
pub fn prepare_dirs(dirs: &[&Path], silent: bool) -> Result<()> {
    let missing: Vec<&Path> = dirs.iter().copied().filter(|d| !d.is_dir()).collect();
    if missing.is_empty() {
        return Ok(());
    }

    for dir in &missing {
        info!("Directory {} does not exist.", dir.display());
    }
    if !silent {
        confirm("Press <return> to create it or CTRL-C to abort")?;
    }
    for dir in missing {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Format a duration as hours, minutes and seconds
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Render a command as a single shell-like line for echoing
pub fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
