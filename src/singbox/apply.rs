//! Writing the generated config to disk and restarting sing-box.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::outbound::SingBoxConfig;
use crate::command::{CommandError, CommandRunner};
use crate::config::SingBoxSettings;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to back up {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("restart failed: {0}")]
    Restart(#[from] CommandError),
}

pub struct ConfigApplier {
    config_path: PathBuf,
    backup_path: PathBuf,
    restart_command: Vec<String>,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl ConfigApplier {
    pub fn new(
        settings: &SingBoxSettings,
        backup_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config_path: settings.config_path.clone(),
            backup_path: backup_path.into(),
            restart_command: settings.restart_command.clone(),
            timeout: settings.restart_timeout(),
            runner,
        }
    }

    /// Back up, write, restart. `Ok(false)` means the restart command ran but
    /// exited non-zero; the new file stays in place in that case.
    ///
    /// Any error after the backup was taken puts the backup back over the
    /// config file. The restored file does not undo a daemon that already
    /// started with the new config.
    pub async fn try_apply(&self, config: &SingBoxConfig) -> Result<bool, ApplyError> {
        let body = config.to_pretty_json()?;

        let backed_up = self.backup().await?;
        match self.write_and_restart(&body).await {
            Ok(ok) => Ok(ok),
            Err(err) => {
                if backed_up {
                    self.restore().await;
                }
                Err(err)
            }
        }
    }

    /// `try_apply` collapsed to a success flag; errors are logged.
    pub async fn apply(&self, config: &SingBoxConfig) -> bool {
        match self.try_apply(config).await {
            Ok(true) => {
                tracing::info!(path = %self.config_path.display(), "sing-box config applied");
                true
            }
            Ok(false) => {
                tracing::error!("sing-box restart exited with a failure status");
                false
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to apply sing-box config");
                false
            }
        }
    }

    async fn backup(&self) -> Result<bool, ApplyError> {
        if !tokio::fs::try_exists(&self.config_path).await.unwrap_or(false) {
            return Ok(false);
        }
        let backup_error = |source| ApplyError::Backup {
            path: self.backup_path.clone(),
            source,
        };
        if let Some(parent) = self.backup_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(backup_error)?;
        }
        tokio::fs::copy(&self.config_path, &self.backup_path)
            .await
            .map_err(backup_error)?;
        tracing::debug!(backup = %self.backup_path.display(), "previous config backed up");
        Ok(true)
    }

    async fn write_and_restart(&self, body: &str) -> Result<bool, ApplyError> {
        let write_error = |source| ApplyError::Write {
            path: self.config_path.clone(),
            source,
        };
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(&self.config_path, body)
            .await
            .map_err(write_error)?;

        let output = self
            .runner
            .run_line(&self.restart_command, self.timeout)
            .await?;
        if !output.success() {
            tracing::warn!(status = ?output.status, stderr = %output.stderr.trim(), "sing-box restart failed");
        }
        Ok(output.success())
    }

    async fn restore(&self) {
        match tokio::fs::copy(&self.backup_path, &self.config_path).await {
            Ok(_) => tracing::warn!(path = %self.config_path.display(), "previous config restored"),
            Err(err) => tracing::error!(error = %err, "failed to restore previous config"),
        }
    }
}
