//! # Result Extractor
//!
//! Recovers an experiment's metrics as a fixed-schema [`ClientReport`].
//! Consumers go through the [`ReportSource`] trait; [`ClientLogReport`] is the
//! adapter for the external client's free-text output.
//!
//! ## Client log format
//!
//! The client prints a progress line every second and a summary on exit:
//!
//! ```text
//! 5231 requests/s (5231 total)
//! ...
//! Total requests: 1000
//! overall throughput: 523.4 requests/s
//! Average / Max / Min latency of a request is: 12.3/45.6/1.1 ms
//! ```
//!
//! The last occurrence of each summary line wins, so logs that print running
//! totals before the final summary are handled. The secondary throughput is the
//! mean of the most recent twelve progress samples with the first two and last
//! two of them discarded.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TOTAL_REQUESTS_PREFIX: &str = "Total requests: ";
const THROUGHPUT_PREFIX: &str = "overall throughput: ";
const LATENCY_PREFIX: &str = "Average / Max / Min latency of a request is: ";
const PROGRESS_SUFFIX: &str = " total)";

/// Number of trailing progress samples considered
pub const PROGRESS_WINDOW: usize = 12;
/// Samples dropped at each end of the window (warm-up and cool-down)
pub const PROGRESS_TRIM: usize = 2;

/// Client log file name inside an experiment's output directory
pub const CLIENT_LOG: &str = "client.out";

/// Metrics of one experiment; a field is `None` when the client never reported it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientReport {
    pub total_requests: Option<u64>,
    pub throughput: Option<f64>,
    pub throughput2: Option<f64>,
    pub latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub min_latency: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {field} in line '{line}'")]
    Malformed { field: &'static str, line: String },
}

/// Something that can produce the report of a finished experiment
pub trait ReportSource {
    /// Read the report of the experiment whose logs are in `outdir`
    fn read_report(&self, outdir: &Path) -> Result<ClientReport, ExtractError>;
}

/// Reads `client.out` and scans it for the client's summary and progress lines
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientLogReport;

impl ReportSource for ClientLogReport {
    fn read_report(&self, outdir: &Path) -> Result<ClientReport, ExtractError> {
        let path = outdir.join(CLIENT_LOG);
        let bytes = std::fs::read(&path).map_err(|source| ExtractError::Unreadable {
            path: path.clone(),
            source,
        })?;
        parse_client_log(&String::from_utf8_lossy(&bytes))
    }
}

/// Text after `prefix` on the last line that starts with it
fn find_last<'a>(lines: &[&'a str], prefix: &str) -> Option<&'a str> {
    lines
        .iter()
        .rev()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
}

fn first_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

fn malformed(field: &'static str, line: &str) -> ExtractError {
    ExtractError::Malformed {
        field,
        line: line.to_string(),
    }
}

fn parse_float(field: &'static str, token: &str, line: &str) -> Result<f64, ExtractError> {
    token.parse::<f64>().map_err(|_| malformed(field, line))
}

/// Mean of the trimmed progress window, or `None` with fewer than twelve samples
pub fn windowed_mean(samples: &[u64]) -> Option<f64> {
    if samples.len() < PROGRESS_WINDOW {
        return None;
    }
    let window = &samples[samples.len() - PROGRESS_WINDOW..];
    let kept = &window[PROGRESS_TRIM..PROGRESS_WINDOW - PROGRESS_TRIM];
    let sum: u64 = kept.iter().sum();
    Some(sum as f64 / kept.len() as f64)
}

/// Extract a report from the full text of a client log
pub fn parse_client_log(text: &str) -> Result<ClientReport, ExtractError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut report = ClientReport::default();

    if let Some(rest) = find_last(&lines, TOTAL_REQUESTS_PREFIX) {
        let total = rest
            .parse::<u64>()
            .map_err(|_| malformed("total requests", rest))?;
        report.total_requests = Some(total);
    }

    if let Some(rest) = find_last(&lines, THROUGHPUT_PREFIX) {
        report.throughput = Some(parse_float("throughput", first_token(rest), rest)?);
    }

    if let Some(rest) = find_last(&lines, LATENCY_PREFIX) {
        let parts: Vec<&str> = first_token(rest).split('/').collect();
        if parts.len() < 3 {
            return Err(malformed("latency", rest));
        }
        report.latency = Some(parse_float("average latency", parts[0], rest)?);
        report.max_latency = Some(parse_float("max latency", parts[1], rest)?);
        report.min_latency = Some(parse_float("min latency", parts[2], rest)?);
    }

    let samples = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| line.ends_with(PROGRESS_SUFFIX))
        .map(|line| {
            first_token(line)
                .parse::<u64>()
                .map_err(|_| malformed("progress sample", line))
        })
        .collect::<Result<Vec<u64>, _>>()?;
    report.throughput2 = windowed_mean(&samples);

    Ok(report)
}
