//! Configuration loading helpers for the autoport client.
//!
//! Configuration flags lead the command line (`autoport --control-port 18891
//! send ls`). They are split off for `ortho_config` and forwarded verbatim to
//! a daemon the client launches, so both sides agree on ports and paths.

use std::ffi::{OsStr, OsString};

use autoport_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// Flags recognised by the configuration loader. Keep in step with the
/// fields of [`Config`].
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--control-host",
    "--control-port",
    "--runtime-dir",
    "--log-dir",
    "--log-filter",
    "--log-format",
    "--uart-port",
    "--uart-baudrate",
    "--uart-timeout",
    "--adb-port",
    "--adb-program",
    "--adb-timeout",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration flags.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument_text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

/// Leading configuration arguments (with `argv[0]`) and the index where the
/// subcommand begins.
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some(program) = args.first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut filtered = vec![program.clone()];
    let mut index = 1;
    while let Some(argument) = args.get(index) {
        match process_config_flag(argument) {
            FlagAction::Include { needs_value } => {
                filtered.push(argument.clone());
                index += 1;
                if needs_value && let Some(value) = args.get(index) {
                    filtered.push(value.clone());
                    index += 1;
                }
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments: filtered,
        command_start: index,
    }
}

/// Rebuilds the argument list clap sees: `argv[0]` plus the subcommand.
pub(crate) fn command_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.get(split.command_start..).unwrap_or_default())
        .cloned()
        .collect()
}
