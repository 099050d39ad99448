//! Job identity and the per-job directories on disk.
//!
//! A [`JobWorkspace`] owns `uploads/<job-file>`, `extracted/<job-file>/` and
//! `output/<job-file>/` for exactly one job and removes them when it is closed
//! or dropped, whichever comes first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir, TempPath};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;

pub const PLAINTEXT_FILE: &str = "plaintext.txt";
pub const HIGHLIGHTED_HTML_FILE: &str = "highlighting.html";
pub const PLAIN_HTML_FILE: &str = "bw.html";

/// One upload event.
#[derive(Debug, Clone)]
pub struct Job {
    /// Team name as submitted, used for the output file name.
    pub team_name: String,
    pub upload_id: Uuid,
}

impl Job {
    pub fn new(team_name: impl Into<String>) -> Self {
        Self {
            team_name: team_name.into(),
            upload_id: Uuid::new_v4(),
        }
    }

    /// Name of the job's entries under `uploads/`, `extracted/` and `output/`.
    pub fn job_file(&self) -> String {
        format!("file-{}", self.upload_id)
    }

    /// `<teamName>.pdf`, with the team name made safe to use as a single path segment.
    pub fn pdf_file_name(&self) -> String {
        format!("{}.pdf", sanitize_file_stem(&self.team_name))
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "bundle".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The job's directories. Created together, removed together.
pub struct JobWorkspace {
    job_file: String,
    keep_output: bool,
    upload_path: PathBuf,
    extracted_path: PathBuf,
    output_path: PathBuf,
    upload: Option<TempPath>,
    extracted: Option<TempDir>,
    output: Option<PathBuf>,
}

impl JobWorkspace {
    /// Create the upload file (empty), the extraction directory and the output directory.
    pub fn create(config: &PipelineConfig, job: &Job) -> io::Result<Self> {
        let job_file = job.job_file();
        for dir in [
            config.uploads_dir(),
            config.extracted_dir(),
            config.output_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let upload = Builder::new()
            .prefix(&job_file)
            .rand_bytes(0)
            .tempfile_in(config.uploads_dir())?
            .into_temp_path();
        let extracted = Builder::new()
            .prefix(&job_file)
            .rand_bytes(0)
            .tempdir_in(config.extracted_dir())?;
        let output = config.output_dir().join(&job_file);
        fs::create_dir(&output)?;

        debug!(job_file = %job_file, "Created job workspace");
        Ok(Self {
            job_file,
            keep_output: config.keep_output,
            upload_path: upload.to_path_buf(),
            extracted_path: extracted.path().to_path_buf(),
            output_path: output.clone(),
            upload: Some(upload),
            extracted: Some(extracted),
            output: Some(output),
        })
    }

    pub fn job_file(&self) -> &str {
        &self.job_file
    }

    /// Where the uploaded archive is (to be) stored.
    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    /// Root of the extracted tree.
    pub fn extracted_dir(&self) -> &Path {
        &self.extracted_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_path
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output_dir().join(name)
    }

    /// Remove the job's directories now. Failures are logged, never returned.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(upload) = self.upload.take() {
            if let Err(e) = upload.close() {
                warn!(error = ?e, path = %self.upload_path.display(), "Failed to remove uploaded archive");
            }
        }
        if let Some(extracted) = self.extracted.take() {
            if let Err(e) = extracted.close() {
                warn!(error = ?e, path = %self.extracted_path.display(), "Failed to remove extraction directory");
            }
        }
        if let Some(output) = self.output.take() {
            let result = if self.keep_output {
                remove_all_but_pdfs(&output)
            } else {
                fs::remove_dir_all(&output)
            };
            if let Err(e) = result {
                warn!(error = ?e, path = %output.display(), "Failed to clean output directory");
            }
        }
        info!(job_file = %self.job_file, "Job workspace released");
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.upload.is_some() || self.extracted.is_some() || self.output.is_some() {
            self.release();
        }
    }
}

fn remove_all_but_pdfs(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().is_some_and(|ext| ext == "pdf") {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pdf_file_name_cannot_escape_the_output_directory() {
        assert_eq!(Job::new("Team Rocket").pdf_file_name(), "Team Rocket.pdf");
        assert_eq!(Job::new("../../etc/passwd").pdf_file_name(), "_.._etc_passwd.pdf");
        assert_eq!(Job::new("a\"b").pdf_file_name(), "a_b.pdf");
        assert_eq!(Job::new("   ").pdf_file_name(), "bundle.pdf");
    }

    #[test]
    fn workspace_uses_the_job_file_everywhere_and_cleans_up_on_close() {
        let root = tempdir().unwrap();
        let config = PipelineConfig {
            storage_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let job = Job::new("team");
        let workspace = JobWorkspace::create(&config, &job).unwrap();

        assert_eq!(workspace.upload_path(), config.uploads_dir().join(job.job_file()));
        assert_eq!(workspace.extracted_dir(), config.extracted_dir().join(job.job_file()));
        assert_eq!(workspace.output_dir(), config.output_dir().join(job.job_file()));
        assert!(workspace.upload_path().exists());
        assert!(workspace.extracted_dir().is_dir());

        fs::write(workspace.extracted_dir().join("Main.java"), "class Main {}").unwrap();
        fs::write(workspace.output_file(&job.pdf_file_name()), b"%PDF").unwrap();
        workspace.close();

        assert_eq!(fs::read_dir(config.uploads_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(config.extracted_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(config.output_dir()).unwrap().count(), 0);
    }

    #[test]
    fn workspace_is_released_on_drop_and_can_keep_the_final_pdf() {
        let root = tempdir().unwrap();
        let config = PipelineConfig {
            storage_root: root.path().to_path_buf(),
            keep_output: true,
            ..Default::default()
        };
        let job = Job::new("keepers");
        let pdf_path;
        {
            let workspace = JobWorkspace::create(&config, &job).unwrap();
            fs::write(workspace.output_file(PLAINTEXT_FILE), "x").unwrap();
            pdf_path = workspace.output_file(&job.pdf_file_name());
            fs::write(&pdf_path, b"%PDF").unwrap();
        }

        assert_eq!(fs::read_dir(config.uploads_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(config.extracted_dir()).unwrap().count(), 0);
        assert!(pdf_path.exists());
        assert!(!pdf_path.with_file_name(PLAINTEXT_FILE).exists());
    }
}
