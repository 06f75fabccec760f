//! Result ordering and the `txt` / `csv` report.

use crate::error::OutputError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Column names of the csv report, in order.
const CSV_HEADER: [&str; 5] = ["link", "tls", "delay", "download", "upload"];

/// Measurement for one reachable link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Link as given on input
    pub link: String,
    /// Security mode (`none`, `tls`, `reality`)
    pub tls: String,
    /// Real delay in milliseconds
    pub delay: u64,
    /// Download throughput in Mbit/s; zero when not measured
    pub download: f32,
    /// Upload throughput in Mbit/s; zero when not measured
    pub upload: f32,
}

/// Report layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Links separated by a blank line
    #[default]
    Txt,
    /// `link,tls,delay,download,upload` rows
    Csv,
}

/// True when `a` should be listed before `b`.
///
/// `a` is ahead when it is faster without being slower in either throughput
/// direction, or when the delays tie and its link sorts first. Two results can
/// each fail to be ahead of the other, so this is not a total order.
pub fn is_ahead(a: &ProbeResult, b: &ProbeResult) -> bool {
    (a.delay < b.delay && a.download >= b.download && a.upload >= b.upload)
        || (a.delay == b.delay && a.link < b.link)
}

/// Orders results with [`is_ahead`].
///
/// Stable insertion sort: an element only moves past a neighbour it is ahead
/// of, so pairs with no preference keep their input order.
pub fn sort_results(results: &mut [ProbeResult]) {
    for i in 1..results.len() {
        let mut j = i;
        while j > 0 && is_ahead(&results[j], &results[j - 1]) {
            results.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Output path: the explicit one, else `valid.txt` / `valid.csv`.
pub fn resolve_output_path(format: ReportFormat, out: Option<PathBuf>) -> PathBuf {
    out.unwrap_or_else(|| match format {
        ReportFormat::Txt => PathBuf::from("valid.txt"),
        ReportFormat::Csv => PathBuf::from("valid.csv"),
    })
}

fn render_csv(results: &[ProbeResult]) -> Result<String, OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for result in results {
        writer.serialize(result)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Renders the report body.
///
/// # Errors
///
/// Returns `OutputError::Csv` if a row cannot be serialized.
pub(crate) fn render(format: ReportFormat, results: &[ProbeResult]) -> Result<String, OutputError> {
    match format {
        ReportFormat::Txt => Ok(results
            .iter()
            .map(|r| r.link.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")),
        ReportFormat::Csv => render_csv(results),
    }
}

/// Writes the report to `path` and returns the number of results written.
///
/// # Errors
///
/// Returns `OutputError::WriteFailed` if the file cannot be written.
pub fn write_report(
    path: &Path,
    format: ReportFormat,
    results: &[ProbeResult],
) -> Result<usize, OutputError> {
    let body = render(format, results)?;
    std::fs::write(path, body).map_err(|source| OutputError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(results.len())
}
