// Durable storage for the last confirmed absolute focuser position
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Environment variable naming a per-driver config path; the position file sits next to it.
pub const CONFIG_ENV: &str = "FOCUSER_CONFIG";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt position record in {path}: '{content}'")]
    Corrupt { path: PathBuf, content: String },
    #[error("No location for the position file: {0}")]
    NoLocation(String),
}

/// One integer per device identity, kept in `<device>.position`.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

/// Work out where a device's position file lives.
///
/// An explicit directory wins, then `$FOCUSER_CONFIG.position`, then
/// `$HOME/.focuser/<device>.position`.
pub fn resolve_path(
    device: &str,
    dir: Option<&Path>,
    config_env: Option<&str>,
    home: Option<&str>,
) -> Result<PathBuf, StoreError> {
    let file_name = format!("{}.position", device.replace(['/', '\\'], "_"));
    if let Some(dir) = dir {
        return Ok(dir.join(file_name));
    }
    if let Some(config) = config_env.filter(|c| !c.is_empty()) {
        return Ok(PathBuf::from(format!("{}.position", config)));
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => Ok(Path::new(home).join(".focuser").join(file_name)),
        None => Err(StoreError::NoLocation(format!(
            "neither {} nor HOME is set for device '{}'",
            CONFIG_ENV, device
        ))),
    }
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `device`, resolving the location from the environment when `dir` is `None`.
    pub fn for_device(device: &str, dir: Option<&Path>) -> Result<Self, StoreError> {
        let config_env = std::env::var(CONFIG_ENV).ok();
        let home = std::env::var("HOME").ok();
        let path = resolve_path(device, dir, config_env.as_deref(), home.as_deref())?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored position. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<i32>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No stored position at {}", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(StoreError::Io { path: self.path.clone(), source });
            }
        };
        let trimmed = content.trim();
        let value = trimmed.parse::<i32>().map_err(|_| StoreError::Corrupt {
            path: self.path.clone(),
            content: trimmed.to_string(),
        })?;
        tracing::debug!("Reading position {} from {}", value, self.path.display());
        Ok(Some(value))
    }

    /// Write `value`, replacing the previous record.
    pub async fn save(&self, value: i32) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
        }
        let tmp = self.path.with_extension("position.tmp");
        fs::write(&tmp, value.to_string())
            .await
            .map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })?;
        tracing::debug!("Writing position {} to {}", value, self.path.display());
        Ok(())
    }
}
