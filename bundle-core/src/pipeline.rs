//! High-level pipeline: orchestrates extract → aggregate → render → merge → store for one job.
//!
//! This module provides the per-job orchestration used by both the HTTP service and
//! the offline `bundle` command. A job runs strictly in sequence:
//!   - the uploaded archive is extracted into the job's workspace
//!   - the extracted tree is aggregated into plaintext and HTML documents
//!   - the plain HTML is rendered to PDF and merged with the PDFs found in the archive
//!   - the job's directories are removed (the final PDF stays in memory)
//!   - a copy of the final PDF is sent to remote storage, if one is configured
//!
//! The remote copy runs as a detached task: [`Pipeline::run`] returns as soon as the
//! final PDF exists, so a slow remote store never delays the response. Callers that
//! must see the outcome (the offline `bundle` command) await
//! [`RemoteTask::outcome`]; everyone else drops the handle and the task finishes on
//! its own, logging the result.
//!
//! # Error Handling
//! Extraction, aggregation, rendering and merging failures end the job with a
//! [`PipelineError`] naming the stage. Rendering and merging are bounded by the
//! configured timeouts. A PDF in the archive that cannot be loaded is skipped and
//! listed in [`JobReport::skipped`]. A failed remote upload only shows up as
//! [`RemoteUpload::Failed`].
//!
//! # Navigation
//! - Main entrypoints: [`Pipeline::open_job`], [`Pipeline::open_workspace`], [`Pipeline::run`],
//!   [`Pipeline::run_archive`]
//! - Supporting types: [`JobServices`], [`JobReport`], [`RemoteTask`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::aggregate::{AggregateError, AggregateOutput, Aggregator, SkippedEntry};
use crate::config::PipelineConfig;
use crate::contract::{BoxError, Extractor, Merger, RemoteStore, Renderer, StoredFile};
use crate::job::{Job, JobWorkspace, HIGHLIGHTED_HTML_FILE, PLAINTEXT_FILE, PLAIN_HTML_FILE};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot prepare job directories: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("cannot store uploaded archive: {0}")]
    Intake(#[source] std::io::Error),
    #[error("archive extraction failed: {0}")]
    Extract(#[source] BoxError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("cannot write job output: {0}")]
    Output(#[source] std::io::Error),
    #[error("PDF rendering failed: {0}")]
    Render(#[source] BoxError),
    #[error("PDF rendering did not finish within {0:?}")]
    RenderTimeout(Duration),
    #[error("PDF merge failed: {0}")]
    Merge(#[source] BoxError),
    #[error("PDF merge did not finish within {0:?}")]
    MergeTimeout(Duration),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The collaborators a job needs. Shared by all jobs of the process.
#[derive(Clone)]
pub struct JobServices {
    pub extractor: Arc<dyn Extractor>,
    pub renderer: Arc<dyn Renderer>,
    pub merger: Arc<dyn Merger>,
    pub store: Option<Arc<dyn RemoteStore>>,
}

/// Outcome of the remote copy of the final PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpload {
    Disabled,
    Stored(StoredFile),
    Failed(String),
}

/// Handle on the detached remote copy of a job's PDF.
///
/// Dropping it does not cancel the upload.
#[derive(Debug)]
pub struct RemoteTask(Option<JoinHandle<RemoteUpload>>);

impl RemoteTask {
    /// Wait for the remote copy to finish.
    pub async fn outcome(self) -> RemoteUpload {
        match self.0 {
            None => RemoteUpload::Disabled,
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| RemoteUpload::Failed(format!("upload task failed: {e}"))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

/// Everything a finished job hands back to its caller.
pub struct JobReport {
    pub job_file: String,
    pub team_name: String,
    pub pdf_file_name: String,
    pub pdf: Vec<u8>,
    /// Display names of the aggregated source files, in output order.
    pub sections: Vec<String>,
    /// Number of archive PDFs appended after the rendered aggregate.
    pub attachments: usize,
    /// Sources, directories and PDFs left out of the bundle.
    pub skipped: Vec<SkippedEntry>,
    pub remote: RemoteTask,
}

impl std::fmt::Debug for JobReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobReport")
            .field("job_file", &self.job_file)
            .field("team_name", &self.team_name)
            .field("pdf_file_name", &self.pdf_file_name)
            .field("pdf_size", &self.pdf.len())
            .field("sections", &self.sections)
            .field("attachments", &self.attachments)
            .field("skipped", &self.skipped)
            .field("remote_enabled", &self.remote.is_enabled())
            .finish()
    }
}

struct Produced {
    pdf: Vec<u8>,
    sections: Vec<String>,
    attachments: usize,
    skipped: Vec<SkippedEntry>,
}

pub struct Pipeline {
    config: PipelineConfig,
    aggregator: Arc<Aggregator>,
    services: JobServices,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, aggregator: Aggregator, services: JobServices) -> Self {
        Self {
            config,
            aggregator: Arc::new(aggregator),
            services,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Register a new job and create its directories.
    pub fn open_job(&self, team_name: &str) -> Result<(Job, JobWorkspace), PipelineError> {
        let job = Job::new(team_name);
        let workspace = self.open_workspace(&job)?;
        Ok((job, workspace))
    }

    /// Create the directories of an existing job.
    ///
    /// The workspace only depends on the upload id, so the team name may still
    /// change until [`Pipeline::run`].
    pub fn open_workspace(&self, job: &Job) -> Result<JobWorkspace, PipelineError> {
        let workspace = JobWorkspace::create(&self.config, job).map_err(|e| {
            error!(error = ?e, upload_id = %job.upload_id, "[JOB][ERROR] Failed to create job workspace");
            PipelineError::Workspace(e)
        })?;
        info!(job_file = %workspace.job_file(), "[JOB] Opened job");
        Ok(workspace)
    }

    /// Run a job whose archive is already at `workspace.upload_path()`.
    ///
    /// The workspace is released before this returns, whatever the outcome.
    pub async fn run(&self, job: &Job, workspace: JobWorkspace) -> Result<JobReport, PipelineError> {
        let span = info_span!("job", job_file = %workspace.job_file(), team = %job.team_name);
        async move {
            let job_file = workspace.job_file().to_string();
            let pdf_file_name = job.pdf_file_name();
            let produced = self.produce(&workspace, &pdf_file_name).await;
            release(workspace).await;
            let produced = produced?;

            let remote = self.spawn_remote(&pdf_file_name, &produced.pdf);

            info!(
                sections = produced.sections.len(),
                attachments = produced.attachments,
                skipped = produced.skipped.len(),
                pdf_size = produced.pdf.len(),
                "[JOB] Completed"
            );
            Ok(JobReport {
                job_file,
                team_name: job.team_name.clone(),
                pdf_file_name,
                pdf: produced.pdf,
                sections: produced.sections,
                attachments: produced.attachments,
                skipped: produced.skipped,
                remote,
            })
        }
        .instrument(span)
        .await
    }

    /// Open a job, copy `archive` into it and run it.
    pub async fn run_archive(&self, team_name: &str, archive: &Path) -> Result<JobReport, PipelineError> {
        let (job, workspace) = self.open_job(team_name)?;
        if let Err(e) = tokio::fs::copy(archive, workspace.upload_path()).await {
            error!(error = ?e, archive = %archive.display(), "[JOB][ERROR] Failed to store archive");
            release(workspace).await;
            return Err(PipelineError::Intake(e));
        }
        self.run(&job, workspace).await
    }

    async fn produce(
        &self,
        workspace: &JobWorkspace,
        pdf_file_name: &str,
    ) -> Result<Produced, PipelineError> {
        // Step 1: extract
        let summary = self
            .services
            .extractor
            .extract(workspace.upload_path(), workspace.extracted_dir())
            .await
            .map_err(|e| {
                error!(error = %e, "[JOB][ERROR] Extraction failed");
                PipelineError::Extract(e)
            })?;
        info!(files = summary.files, "[JOB] Extraction succeeded");

        // Step 2: aggregate
        let aggregator = Arc::clone(&self.aggregator);
        let root = workspace.extracted_dir().to_path_buf();
        let (aggregate, merge_list) =
            tokio::task::spawn_blocking(move || aggregator.traverse(&root)).await??;

        for (name, content) in [
            (PLAINTEXT_FILE, &aggregate.plaintext),
            (HIGHLIGHTED_HTML_FILE, &aggregate.highlighted_html),
            (PLAIN_HTML_FILE, &aggregate.plain_html),
        ] {
            tokio::fs::write(workspace.output_file(name), content)
                .await
                .map_err(PipelineError::Output)?;
        }

        // Step 3: render
        let render_timeout = self.config.render_timeout();
        let rendered = match tokio::time::timeout(
            render_timeout,
            self.services
                .renderer
                .render(&aggregate.plain_html, self.config.page_size),
        )
        .await
        {
            Ok(Ok(pdf)) => pdf,
            Ok(Err(e)) => {
                error!(error = %e, "[JOB][ERROR] Rendering failed");
                return Err(PipelineError::Render(e));
            }
            Err(_) => {
                error!(timeout = ?render_timeout, "[JOB][ERROR] Rendering timed out");
                return Err(PipelineError::RenderTimeout(render_timeout));
            }
        };
        info!(size = rendered.len(), "[JOB] Rendering succeeded");

        // Step 4: merge, rendered aggregate first
        let listed = merge_list.len();
        let merge_timeout = self.config.merge_timeout();
        let merged = match tokio::time::timeout(
            merge_timeout,
            self.services.merger.merge(rendered, merge_list),
        )
        .await
        {
            Ok(Ok(merged)) => merged,
            Ok(Err(e)) => {
                error!(error = %e, "[JOB][ERROR] Merge failed");
                return Err(PipelineError::Merge(e));
            }
            Err(_) => {
                error!(timeout = ?merge_timeout, "[JOB][ERROR] Merge timed out");
                return Err(PipelineError::MergeTimeout(merge_timeout));
            }
        };
        let attachments = listed.saturating_sub(merged.skipped.len());
        tokio::fs::write(workspace.output_file(pdf_file_name), &merged.pdf)
            .await
            .map_err(PipelineError::Output)?;
        info!(size = merged.pdf.len(), attachments, "[JOB] Merge succeeded");

        let AggregateOutput {
            sections,
            mut skipped,
            ..
        } = aggregate;
        skipped.extend(merged.skipped);
        Ok(Produced {
            pdf: merged.pdf,
            sections,
            attachments,
            skipped,
        })
    }

    fn spawn_remote(&self, file_name: &str, pdf: &[u8]) -> RemoteTask {
        let Some(store) = self.services.store.clone() else {
            return RemoteTask(None);
        };
        let timeout = self.config.upload_timeout();
        let file_name = file_name.to_string();
        let pdf = pdf.to_vec();
        let handle = tokio::spawn(
            async move { store_remote(store, timeout, &file_name, pdf).await }.in_current_span(),
        );
        info!(timeout = ?timeout, "[JOB][UPLOAD] Remote copy scheduled");
        RemoteTask(Some(handle))
    }
}

async fn store_remote(
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
    file_name: &str,
    pdf: Vec<u8>,
) -> RemoteUpload {
    match tokio::time::timeout(timeout, store.store(file_name, pdf)).await {
        Ok(Ok(stored)) => {
            info!(id = %stored.id, name = %stored.name, "[JOB][UPLOAD] Stored final PDF remotely");
            RemoteUpload::Stored(stored)
        }
        Ok(Err(e)) => {
            warn!(error = %e, file = %file_name, "[JOB][UPLOAD] Remote upload failed, PDF still delivered");
            RemoteUpload::Failed(e.to_string())
        }
        Err(_) => {
            warn!(timeout = ?timeout, file = %file_name, "[JOB][UPLOAD] Remote upload timed out, PDF still delivered");
            RemoteUpload::Failed(format!("timed out after {timeout:?}"))
        }
    }
}

/// Remove the job's directories off the async threads.
async fn release(workspace: JobWorkspace) {
    if let Err(e) = tokio::task::spawn_blocking(move || workspace.close()).await {
        warn!(error = ?e, "[JOB] Workspace cleanup task failed");
    }
}
