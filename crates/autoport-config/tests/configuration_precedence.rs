use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use autoport_config::{
    Config, DEFAULT_CONTROL_PORT, DEFAULT_UART_BAUDRATE, DEFAULT_UART_PORT, default_log_filter,
    default_log_format,
};
use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Environment variables the scenarios may touch. They are cleared on entry so
/// a developer's shell does not leak into the defaults scenario.
const MANAGED_KEYS: [&str; 4] = [
    "TESTER_UART_PORT",
    "TESTER_UART_BAUDRATE",
    "TESTER_CONTROL_PORT",
    "TESTER_CONFIG_PATH",
];

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_lock: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_lock = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let harness = Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("autoport")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_lock: env_lock,
        };
        for key in MANAGED_KEYS {
            harness.remove_env(key);
        }
        harness
    }

    fn write_config(&self, body: &str) {
        let path = self.temp_dir.path().join("autoport.toml");
        if let Err(error) = fs::write(&path, body) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` on edition 2024; `Drop` restores
        // every override so later tests see the original process environment.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_string(), previous));
    }

    fn remove_env(&self, key: &str) {
        let previous = std::env::var_os(key);
        unsafe { std::env::remove_var(key) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_string(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the UART port to \"{port}\"")]
fn given_config_uart_port(harness: &Harness, port: String) {
    harness.write_config(&format!("uart_port = \"{port}\"\n"));
}

#[given("a configuration file setting the control port to {port}")]
fn given_config_control_port(harness: &Harness, port: u16) {
    harness.write_config(&format!("control_port = {port}\n"));
}

#[given("the environment overrides the UART port to \"{port}\"")]
fn given_env_uart_port(harness: &Harness, port: String) {
    harness.set_env("TESTER_UART_PORT", &port);
}

#[when("the CLI sets the UART port to \"{port}\"")]
fn when_cli_uart_port(harness: &Harness, port: String) {
    harness.push_cli_arg("--uart-port");
    harness.push_cli_arg(port);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the UART port to \"{port}\"")]
fn then_uart_port(harness: &Harness, port: String) {
    assert_eq!(harness.config().uart_port, port);
}

#[then("loading the configuration resolves the control port to {port}")]
fn then_control_port(harness: &Harness, port: u16) {
    assert_eq!(harness.config().control_port, port);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
    assert_eq!(config.uart_port, DEFAULT_UART_PORT);
    assert_eq!(config.uart_baudrate, DEFAULT_UART_BAUDRATE);
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    drop(harness);
}
