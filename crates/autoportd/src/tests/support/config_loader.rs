//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use autoport_config::Config;

use crate::bootstrap::ConfigLoader;

use super::FakeShell;

/// Loader that points every runtime path at private temporary directories,
/// binds the control socket to an ephemeral port and swaps `adb` for a
/// [`FakeShell`].
#[derive(Clone)]
pub struct TestConfigLoader {
    runtime_dir: Arc<TempDir>,
    log_dir: Arc<TempDir>,
    shell: Arc<FakeShell>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime_dir: Arc::new(tempfile::tempdir().expect("runtime dir")),
            log_dir: Arc::new(tempfile::tempdir().expect("log dir")),
            shell: Arc::new(FakeShell::new()),
        }
    }

    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.path().to_path_buf()
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        self.log_dir.path()
    }

    #[must_use]
    pub fn shell(&self) -> &FakeShell {
        &self.shell
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("temporary path was not valid UTF-8")
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            control_host: "127.0.0.1".to_owned(),
            control_port: 0,
            runtime_dir: Some(utf8(self.runtime_dir.path())),
            log_dir: utf8(self.log_dir.path()),
            adb_program: self.shell.program(),
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing an invalid port on the
/// command line.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("autoportd"),
            OsString::from("--control-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}
