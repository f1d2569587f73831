// SPDX-License-Identifier: Apache-2.0
//! Filesystem-backed [`DurableStore`] for Quill settings (uses the platform
//! config dir).

#![forbid(unsafe_code)]

use directories::ProjectDirs;
use quill_settings::{DurableStore, SettingsError};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Store one settings document as a JSON file under the platform config
/// directory.
pub struct FsStore {
    path: PathBuf,
}

impl FsStore {
    /// Create a store for `key` rooted at the user config directory of
    /// `app` (e.g. `~/.config/<app>/<key>.json`).
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Store`] when no config directory can be
    /// resolved for this platform.
    pub fn new(app: &str, key: &str) -> Result<Self, SettingsError> {
        let proj = ProjectDirs::from("", "", app)
            .ok_or_else(|| SettingsError::Store("could not resolve config dir".into()))?;
        let path = proj.config_dir().join(format!("{key}.json"));
        Ok(Self { path })
    }

    /// Create a store over an explicit file path. Useful for tests and
    /// tools that manage their own layout.
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl DurableStore for FsStore {
    /// Missing files load as `None`; unparseable contents are logged and
    /// treated as absent rather than failing the contract.
    async fn load(&self) -> Result<Option<Value>, SettingsError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SettingsError::Io(err)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "settings file is not valid JSON");
                Ok(None)
            }
        }
    }

    async fn save(&self, doc: &Value) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}
