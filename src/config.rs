//! Service configuration.
//!
//! Loaded once at startup from a TOML file (`probuild.toml` by default,
//! overridable through `PROBUILD_CONFIG`). Every section has usable
//! defaults so that unit tests and partial configs work without a file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global service configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initialize the global configuration from a TOML file.
pub fn init_from_file(path: impl AsRef<Path>) -> Result<&'static Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(CONFIG.get_or_init(|| config))
}

/// Get the global configuration.
pub fn get() -> &'static Config {
    CONFIG.get().unwrap_or_else(|| {
        // Fallback to defaults if not initialized (tests, tooling).
        static DEFAULT: OnceLock<Config> = OnceLock::new();
        DEFAULT.get_or_init(Config::default)
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP surface binds to.
    pub listen_addr: String,

    /// Root directory of exported problem repository snapshots.
    pub repo_root: String,

    /// Path of the problem configuration inside a repository snapshot.
    pub problem_config_path: String,

    /// Sandbox servers by id.
    pub judges: HashMap<String, JudgeEndpoint>,

    pub compile: CompileConfig,
    pub generator: ToolConfig,
    pub validator: ToolConfig,
    pub checker: ToolConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            repo_root: "/var/lib/probuild/repos".into(),
            problem_config_path: "problem.yaml".into(),
            judges: HashMap::new(),
            compile: CompileConfig::default(),
            generator: ToolConfig::default(),
            validator: ToolConfig::default(),
            checker: ToolConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeEndpoint {
    /// host:port of the sandbox gRPC server.
    pub host: String,
    /// Optional bearer token; empty means no authentication.
    #[serde(default)]
    pub token: String,
}

/// Compiler invocation shared by all artifacts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub cmd: Vec<String>,
    /// Compile cpu time limit in nanoseconds.
    pub time_limit: u64,
    /// Compile memory limit in bytes.
    pub memory_limit: u64,
    /// Compile stderr cap in bytes.
    pub stderr_limit: i64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            cmd: vec!["/usr/bin/g++".into(), "-O2".into(), "-std=c++17".into()],
            time_limit: 10_000_000_000,
            memory_limit: 1024 * 1024 * 1024,
            stderr_limit: 10 * 1024,
        }
    }
}

/// Per-artifact settings for generators, validators and checkers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Extra arguments appended to the compile command.
    pub compile_args: Vec<String>,
    pub run: RunLimits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunLimits {
    /// Cpu time limit in nanoseconds.
    pub time_limit: u64,
    /// Memory limit in bytes.
    pub memory_limit: u64,
    /// Stderr cap in bytes.
    pub stderr_limit: i64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_limit: 5_000_000_000,
            memory_limit: 256 * 1024 * 1024,
            stderr_limit: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".into(),
            port: 9000,
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            use_ssl: false,
        }
    }
}
