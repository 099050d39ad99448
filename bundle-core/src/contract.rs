#![allow(unused)]

//! # contract: seams between the job pipeline and its collaborators
//!
//! The pipeline in [`crate::pipeline`] only talks to the outside world through the
//! four traits defined here:
//! - [`Extractor`]: unpack an uploaded archive into a directory
//! - [`Renderer`]: turn a self-contained HTML document into PDF bytes
//! - [`Merger`]: concatenate the rendered PDF with the PDFs found in the archive
//! - [`RemoteStore`]: keep a copy of the final PDF somewhere outside the host
//!
//! Concrete implementations live in [`crate::extract`], [`crate::render`],
//! [`crate::merge`] and in the binary crate (Google Drive).
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; the generated `Mock*` types are
//!   exported behind the default `test-export-mocks` feature so that the binary
//!   crate's tests can use them too.
//!
//! ## Errors
//! - All methods return boxed errors. Callers translate them into a
//!   [`crate::pipeline::PipelineError`] variant naming the stage that failed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use mockall::{automock, predicate::*};

use crate::aggregate::SkippedEntry;
use crate::config::PageSize;

/// Error type shared by all collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What an extraction run wrote to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Number of regular files written.
    pub files: usize,
    /// Number of directories created from explicit directory entries.
    pub directories: usize,
    /// Entries that were not written (unsafe names), by raw archive name.
    pub skipped: Vec<String>,
}

/// Reference to a file kept by a [`RemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
}

/// Result of a merge: the concatenated document and the attachments left out of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    pub pdf: Vec<u8>,
    /// Attachments that could not be loaded, in merge-list order.
    pub skipped: Vec<SkippedEntry>,
}

/// Trait for unpacking an archive into a destination directory.
///
/// Implementations must have written every entry before returning `Ok`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, archive: &Path, destination: &Path) -> Result<ExtractSummary, BoxError>;
}

/// Trait for HTML → PDF rendering.
///
/// The document handed over is complete and does not reference remote resources.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, html: &str, page_size: PageSize) -> Result<Vec<u8>, BoxError>;
}

/// Trait for PDF concatenation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Merger: Send + Sync {
    /// Concatenate `first` followed by every file of `rest`, in order.
    ///
    /// A file of `rest` that is not a loadable PDF is left out and reported in
    /// [`Merged::skipped`]; only an unusable `first` fails the merge.
    async fn merge(&self, first: Vec<u8>, rest: Vec<PathBuf>) -> Result<Merged, BoxError>;
}

/// Trait for keeping a copy of the final PDF in remote storage.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store `content` under `file_name` in the store's fixed destination.
    async fn store(&self, file_name: &str, content: Vec<u8>) -> Result<StoredFile, BoxError>;
}
