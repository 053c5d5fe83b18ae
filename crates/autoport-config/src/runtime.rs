//! Derives runtime artefact paths shared by the client and daemon.
//!
//! The runtime directory houses the daemon lock, pid marker, and health
//! snapshot. Both binaries need to agree on the layout: the client treats the
//! pid marker's existence as "a daemon is already running".

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Canonical paths for runtime artefacts written by the daemon.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
    daemon_log_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the shared configuration, creating the
    /// runtime directory when it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::RuntimeDirectory`] when the directory
    /// cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = config
            .runtime_dir
            .as_ref()
            .map_or_else(default_runtime_directory, |dir| {
                dir.as_std_path().to_path_buf()
            });
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            lock_path: runtime_dir.join("autoportd.lock"),
            pid_path: runtime_dir.join("autoportd.pid"),
            health_path: runtime_dir.join("autoportd.health"),
            daemon_log_path: runtime_dir.join("autoportd.log"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the pid marker. Its presence means a daemon is running.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    #[must_use]
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }

    /// Telemetry sink for a daemon running in the background. Unlike the
    /// other artefacts it survives shutdown.
    #[must_use]
    pub fn daemon_log_path(&self) -> &Path {
        self.daemon_log_path.as_path()
    }
}

fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("autoport");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("autoport");
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("autoport");
        dir
    }
}

/// Errors raised while deriving daemon runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn derives_default_runtime_paths() {
        let config = Config::default();
        let paths = RuntimePaths::from_config(&config).expect("paths should derive");
        let tail = paths
            .runtime_dir()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("runtime dir should have trailing component");
        assert!(
            tail == "autoport" || tail.starts_with("uid-"),
            "unexpected runtime tail: {tail}"
        );
        assert!(paths.lock_path().ends_with("autoportd.lock"));
        assert!(paths.pid_path().ends_with("autoportd.pid"));
        assert!(paths.health_path().ends_with("autoportd.health"));
        assert!(paths.daemon_log_path().ends_with("autoportd.log"));
    }

    #[test]
    fn honours_configured_runtime_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let nested = dir.path().join("nested").join("runtime");
        let config = Config {
            runtime_dir: Some(
                Utf8PathBuf::from_path_buf(nested.clone()).expect("utf8 temp path"),
            ),
            ..Config::default()
        };
        let paths = RuntimePaths::from_config(&config).expect("paths should derive");
        assert_eq!(paths.runtime_dir(), nested.as_path());
        assert!(nested.is_dir(), "runtime directory should be created");
        assert_eq!(paths.pid_path(), nested.join("autoportd.pid").as_path());
    }
}
