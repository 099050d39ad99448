//! HTML → PDF rendering backends.
//!
//! [`ChromiumRenderer`] drives a headless Chromium through the DevTools protocol and
//! prints the page; [`WkhtmltopdfRenderer`] pipes the document through the
//! `wkhtmltopdf` executable. Both launch a fresh process per call, so concurrent
//! jobs never share renderer state.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{PageSize, RenderBackend, RenderConfig};
use crate::contract::{BoxError, Renderer};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("browser configuration rejected: {0}")]
    BrowserConfig(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("renderer produced no PDF output")]
    EmptyOutput,
}

/// Build the renderer selected in the configuration.
pub fn renderer_from_config(config: &RenderConfig) -> Arc<dyn Renderer> {
    info!(backend = ?config.backend, "Selected render backend");
    match config.backend {
        RenderBackend::Chromium => Arc::new(ChromiumRenderer::new(config.chrome_executable.clone())),
        RenderBackend::Wkhtmltopdf => Arc::new(WkhtmltopdfRenderer::new(config.wkhtmltopdf.clone())),
    }
}

pub struct ChromiumRenderer {
    executable: Option<PathBuf>,
}

impl ChromiumRenderer {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    async fn print(&self, html: &str, page_size: PageSize) -> Result<Vec<u8>, RenderError> {
        let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ]);
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(RenderError::BrowserConfig)?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        debug!("Headless browser launched");

        let printed = print_page(&browser, html, page_size).await;

        if let Err(e) = browser.close().await {
            warn!(error = ?e, "Failed to close headless browser");
        }
        if let Err(e) = browser.wait().await {
            warn!(error = ?e, "Failed to reap headless browser");
        }
        events.abort();

        printed
    }
}

async fn print_page(browser: &Browser, html: &str, page_size: PageSize) -> Result<Vec<u8>, RenderError> {
    let page = browser.new_page("about:blank").await.map_err(browser_error)?;
    page.set_content(html).await.map_err(browser_error)?;
    let (width, height) = page_size.inches();
    let params = PrintToPdfParams {
        paper_width: Some(width),
        paper_height: Some(height),
        print_background: Some(true),
        ..Default::default()
    };
    page.pdf(params).await.map_err(browser_error)
}

fn browser_error(e: chromiumoxide::error::CdpError) -> RenderError {
    RenderError::Browser(e.to_string())
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&self, html: &str, page_size: PageSize) -> Result<Vec<u8>, BoxError> {
        info!(html_len = html.len(), page_size = ?page_size, "Rendering PDF with headless Chromium");
        let pdf = self.print(html, page_size).await.map_err(|e| {
            error!(error = %e, "Chromium rendering failed");
            e
        })?;
        if pdf.is_empty() {
            return Err(RenderError::EmptyOutput.into());
        }
        info!(size = pdf.len(), "Rendered PDF");
        Ok(pdf)
    }
}

pub struct WkhtmltopdfRenderer {
    program: PathBuf,
}

impl WkhtmltopdfRenderer {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    async fn run(&self, html: &str, page_size: PageSize) -> Result<Vec<u8>, RenderError> {
        let program = self.program.display().to_string();
        // Reads the document from stdin, writes the PDF to stdout.
        let mut child = Command::new(&self.program)
            .arg("--quiet")
            .arg("--no-pdf-compression")
            .arg("--page-size")
            .arg(page_size.name())
            .arg("-")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn {
                program: program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| RenderError::Spawn {
            program: program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin not captured"),
        })?;
        let document = html.to_owned();
        let feeder = tokio::spawn(async move {
            let written = stdin.write_all(document.as_bytes()).await;
            drop(stdin);
            written
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| RenderError::Spawn {
                program: program.clone(),
                source,
            })?;
        match feeder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = ?e, "Failed to feed document to wkhtmltopdf"),
            Err(e) => warn!(error = ?e, "Document feeder task failed"),
        }

        if !output.status.success() {
            return Err(RenderError::Exit {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Renderer for WkhtmltopdfRenderer {
    async fn render(&self, html: &str, page_size: PageSize) -> Result<Vec<u8>, BoxError> {
        info!(
            program = %self.program.display(),
            html_len = html.len(),
            page_size = ?page_size,
            "Rendering PDF with wkhtmltopdf"
        );
        let pdf = self.run(html, page_size).await.map_err(|e| {
            error!(error = %e, "wkhtmltopdf rendering failed");
            e
        })?;
        info!(size = pdf.len(), "Rendered PDF");
        Ok(pdf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_wkhtmltopdf_binary_is_a_spawn_error() {
        let renderer = WkhtmltopdfRenderer::new(PathBuf::from("/nonexistent/wkhtmltopdf-binary"));
        let err = renderer
            .run("<!DOCTYPE html><body></body></html>", PageSize::A4)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }), "got {err:?}");
    }
}
