//! Report artifacts on disk.
//!
//! Each run writes its report under a generated filename of the form
//! `{label}_{short_name}_{mode}_{YYYYmmdd_HHMMSS}_{suffix}.md`, where
//! `short_name` comes from the uploaded filename and `suffix` keeps two runs
//! started in the same second apart. Reports are served back by filename
//! for download.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::modes::AnalysisMode;

/// Maximum characters of the source stem kept in a report filename.
const SHORT_NAME_CHARS: usize = 24;

pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    /// Opens (creating if needed) the output directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a report, returning its full path.
    pub async fn write(&self, filename: &str, text: &str) -> Result<PathBuf> {
        if !is_safe_filename(filename) {
            anyhow::bail!("refusing to write report with unsafe name: {}", filename);
        }
        let path = self.dir.join(filename);
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }

    /// Reads back a report by filename. `Ok(None)` when it does not exist.
    pub async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        if !is_safe_filename(filename) {
            anyhow::bail!("invalid report name: {}", filename);
        }
        let path = self.dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read report: {}", path.display())),
        }
    }
}

/// Builds a fresh report filename.
pub fn report_filename(
    label: &str,
    source_filename: &str,
    mode: AnalysisMode,
    now: DateTime<Local>,
) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}_{}.md",
        sanitize(label),
        short_name(source_filename),
        mode.as_str(),
        now.format("%Y%m%d_%H%M%S"),
        &suffix[..6]
    )
}

/// The file stem of `source_filename`, sanitized and truncated.
pub fn short_name(source_filename: &str) -> String {
    // Browsers may send a full client-side path; keep only the last segment.
    let base = source_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_filename);
    let stem = match base.rfind('.') {
        Some(pos) if pos > 0 => &base[..pos],
        _ => base,
    };
    let cleaned: String = sanitize(stem).chars().take(SHORT_NAME_CHARS).collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Keeps letters and digits (any script), `-` and `_`; everything else becomes `_`.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_underscore = false;
    for c in s.chars() {
        if c.is_alphanumeric() || c == '-' {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out
}

/// True when `name` is a single path component without traversal.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name != "."
        && !name.contains("..")
}
