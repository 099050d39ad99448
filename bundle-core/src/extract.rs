//! ZIP extraction onto disk.
//!
//! Entry names are reduced to their normal path components before being joined to
//! the destination, so `../` prefixes and absolute paths in a hostile archive land
//! inside the destination or are dropped.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::contract::{BoxError, ExtractSummary, Extractor};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("I/O error during extraction: {0}")]
    Io(#[from] io::Error),
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive entry {0} is encrypted")]
    Encrypted(String),
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Unpacks ZIP archives on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct ZipExtractor;

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for ZipExtractor {
    async fn extract(&self, archive: &Path, destination: &Path) -> Result<ExtractSummary, BoxError> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();
        let summary = tokio::task::spawn_blocking(move || extract_zip(&archive, &destination))
            .await
            .map_err(ExtractError::from)??;
        Ok(summary)
    }
}

/// Extract every entry of the ZIP at `archive` below `destination`.
pub fn extract_zip(archive: &Path, destination: &Path) -> Result<ExtractSummary, ExtractError> {
    info!(archive = %archive.display(), destination = %destination.display(), "Extracting archive");
    let reader = BufReader::new(File::open(archive)?);
    let mut zip = ZipArchive::new(reader)?;
    fs::create_dir_all(destination)?;

    let mut summary = ExtractSummary::default();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let raw_name = entry.name().to_string();

        let Some(relative) = sanitize_entry_name(&raw_name) else {
            warn!(entry = %raw_name, "Skipping archive entry with unusable name");
            summary.skipped.push(raw_name);
            continue;
        };
        if entry.encrypted() {
            return Err(ExtractError::Encrypted(raw_name));
        }

        let target = destination.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            summary.directories += 1;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let written = io::copy(&mut entry, &mut out)?;
        debug!(entry = %relative.display(), bytes = written, "Extracted entry");
        summary.files += 1;
    }

    info!(
        files = summary.files,
        directories = summary.directories,
        skipped = summary.skipped.len(),
        "Archive extracted"
    );
    Ok(summary)
}

/// Keep only the normal components of an entry name; `None` if nothing is left.
fn sanitize_entry_name(name: &str) -> Option<PathBuf> {
    let sanitized: PathBuf = Path::new(name)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if sanitized.as_os_str().is_empty() {
        None
    } else {
        Some(sanitized)
    }
}
