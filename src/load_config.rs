/// `load_config` module: loads the static YAML config and injects the Google Drive secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed into the typed settings of
/// `code-bundle-core` and of the HTTP service.
///
/// # Responsibilities
/// - Parse the YAML file into [`CliConfig`]. Every section except `upload` has defaults.
/// - Resolve the remote store settings from `upload`, `DRIVE_KEY_FILE` and `DRIVE_FOLDER_ID`.
///   Environment values win over the file.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use code_bundle_core::config::{AggregateOptions, PipelineConfig, RenderConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DRIVE_KEY_FILE_ENV: &str = "DRIVE_KEY_FILE";
pub const DRIVE_FOLDER_ID_ENV: &str = "DRIVE_FOLDER_ID";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// Served at `/`.
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:2000".to_string(),
            static_dir: PathBuf::from("./client"),
            max_upload_bytes: 500 * 1000 * 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadSection {
    pub key_file: Option<PathBuf>,
    pub folder_id: Option<String>,
}

/// Everything needed to talk to Google Drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSettings {
    pub key_file: PathBuf,
    pub folder_id: String,
}

#[derive(Debug)]
pub struct CliConfig {
    pub server: ServerSection,
    pub storage: PipelineConfig,
    pub aggregate: AggregateOptions,
    pub render: RenderConfig,
    /// `None` disables the remote copy.
    pub drive: Option<DriveSettings>,
}

/// Loads a static YAML config file (no secrets) and injects the Drive settings from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawConfig {
        server: ServerSection,
        storage: PipelineConfig,
        aggregate: AggregateOptions,
        render: RenderConfig,
        upload: Option<UploadSection>,
    }

    // An empty file means "all defaults".
    let parsed = if config_content.trim().is_empty() {
        Ok(RawConfig::default())
    } else {
        serde_yaml::from_str::<RawConfig>(&config_content)
    };
    let raw = match parsed {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let drive = resolve_drive(
        raw.upload,
        std::env::var(DRIVE_KEY_FILE_ENV).ok(),
        std::env::var(DRIVE_FOLDER_ID_ENV).ok(),
    )?;
    match &drive {
        Some(drive) => info!(
            key_file = %drive.key_file.display(),
            folder_id = %drive.folder_id,
            "Remote upload to Google Drive enabled"
        ),
        None => info!("No upload section and no {DRIVE_KEY_FILE_ENV}, remote upload disabled"),
    }

    raw.storage.trace_loaded();
    Ok(CliConfig {
        server: raw.server,
        storage: raw.storage,
        aggregate: raw.aggregate,
        render: raw.render,
        drive,
    })
}

fn resolve_drive(
    section: Option<UploadSection>,
    env_key_file: Option<String>,
    env_folder_id: Option<String>,
) -> Result<Option<DriveSettings>> {
    let env_key_file = env_key_file.filter(|v| !v.trim().is_empty());
    let env_folder_id = env_folder_id.filter(|v| !v.trim().is_empty());
    if section.is_none() && env_key_file.is_none() {
        return Ok(None);
    }
    let section = section.unwrap_or_default();

    let key_file = env_key_file
        .map(PathBuf::from)
        .or(section.key_file)
        .ok_or_else(|| {
            error!("Upload section present but no service-account key file configured");
            anyhow::anyhow!("upload.key_file or {DRIVE_KEY_FILE_ENV} must be set to enable remote upload")
        })?;
    let folder_id = env_folder_id.or(section.folder_id).ok_or_else(|| {
        error!("Remote upload enabled but no Drive folder configured");
        anyhow::anyhow!("upload.folder_id or {DRIVE_FOLDER_ID_ENV} must be set to enable remote upload")
    })?;

    Ok(Some(DriveSettings {
        key_file,
        folder_id,
    }))
}
