//! Transcript export for the asker.
//!
//! On restart the asker may save the finished conversation as a small JSON
//! document named after the export time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Saved record of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Export time, Unix epoch milliseconds.
    pub date: u64,
    pub prompt: String,
    pub response: String,
}

/// When to write a transcript on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportPolicy {
    /// Ask the user each time.
    #[default]
    Ask,
    Always,
    Never,
}

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// ISO-8601 file stem for an epoch-millisecond timestamp,
/// e.g. `2023-11-14T22:13:20.000Z`.
pub fn file_stem(date_ms: u64) -> String {
    let when = i64::try_from(date_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default();
    when.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write `transcript` into `dir` and return the file path.
pub fn write_transcript(dir: &Path, transcript: &Transcript) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", file_stem(transcript.date)));
    let json = serde_json::to_string(transcript)?;
    std::fs::write(&path, json)?;
    tracing::info!(path = %path.display(), "transcript exported");
    Ok(path)
}
