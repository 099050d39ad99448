use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// A file extension the aggregator picks up, and the highlight.js language used for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceKind {
    pub extension: String,
    pub language: String,
}

impl SourceKind {
    pub fn new(extension: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            language: language.into(),
        }
    }
}

/// Traversal and formatting options for the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    pub sources: Vec<SourceKind>,
    /// Directories nested deeper than this below the extraction root are skipped.
    pub max_depth: usize,
    /// Directory holding `default-dark.min.css` and `highlight.min.js`.
    pub assets_dir: PathBuf,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            sources: vec![SourceKind::new("java", "java")],
            max_depth: 64,
            assets_dir: PathBuf::from("./client"),
        }
    }
}

impl AggregateOptions {
    /// The source kind matching `file_name`, if any.
    pub fn source_kind_for(&self, file_name: &str) -> Option<&SourceKind> {
        self.sources.iter().find(|kind| {
            file_name
                .strip_suffix(kind.extension.as_str())
                .is_some_and(|stem| stem.ends_with('.'))
        })
    }
}

/// Paper format handed to the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in inches.
    pub fn inches(self) -> (f64, f64) {
        match self {
            PageSize::A4 => (8.27, 11.69),
            PageSize::Letter => (8.5, 11.0),
        }
    }

    /// Name understood by `wkhtmltopdf --page-size`.
    pub fn name(self) -> &'static str {
        match self {
            PageSize::A4 => "A4",
            PageSize::Letter => "Letter",
        }
    }
}

/// Which rendering engine to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    #[default]
    Chromium,
    Wkhtmltopdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: RenderBackend,
    /// Explicit browser binary; when unset chromiumoxide looks one up.
    pub chrome_executable: Option<PathBuf>,
    pub wkhtmltopdf: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackend::Chromium,
            chrome_executable: None,
            wkhtmltopdf: PathBuf::from("wkhtmltopdf"),
        }
    }
}

/// Per-job pipeline settings. Built once at start-up and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent of the `uploads/`, `extracted/` and `output/` directories.
    pub storage_root: PathBuf,
    pub page_size: PageSize,
    pub render_timeout_secs: u64,
    pub merge_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    /// Leave `output/<job-file>/<team>.pdf` on disk after the job.
    pub keep_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("."),
            page_size: PageSize::A4,
            render_timeout_secs: 120,
            merge_timeout_secs: 60,
            upload_timeout_secs: 60,
            keep_output: false,
        }
    }
}

impl PipelineConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_root.join("uploads")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.storage_root.join("extracted")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.storage_root.join("output")
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            storage_root = %self.storage_root.display(),
            page_size = ?self.page_size,
            render_timeout_secs = self.render_timeout_secs,
            merge_timeout_secs = self.merge_timeout_secs,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
