//! TOML configuration for the `jdbg` binary.
//!
//! Every section is optional; a missing file or section means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jdbg_jdwp::JdwpClientConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JdbgConfig {
    #[serde(default)]
    pub java: JavaConfig,
    #[serde(default)]
    pub jdwp: JdwpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl JdbgConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// How the debuggee JVM is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JavaConfig {
    /// The `java` launcher to run.
    #[serde(default = "JavaConfig::default_java")]
    pub java: PathBuf,

    /// Classpath entries used when neither `--classpath` nor `CLASSPATH` is given.
    #[serde(default)]
    pub classpath: Vec<String>,

    /// Extra JVM options placed before the JDWP agent option.
    #[serde(default)]
    pub vm_args: Vec<String>,
}

impl JavaConfig {
    fn default_java() -> PathBuf {
        PathBuf::from("java")
    }

    /// The classpath to launch with: `cli`, then the configured entries, then
    /// `env` (the `CLASSPATH` variable), then the working directory.
    pub fn effective_classpath(&self, cli: Option<&str>, env: Option<String>) -> String {
        if let Some(classpath) = cli {
            return classpath.to_string();
        }
        if !self.classpath.is_empty() {
            if let Ok(joined) = std::env::join_paths(&self.classpath) {
                return joined.to_string_lossy().into_owned();
            }
        }
        env.filter(|classpath| !classpath.trim().is_empty())
            .unwrap_or_else(|| ".".to_string())
    }
}

impl Default for JavaConfig {
    fn default() -> Self {
        Self {
            java: Self::default_java(),
            classpath: Vec::new(),
            vm_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JdwpConfig {
    #[serde(default = "JdwpConfig::default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "JdwpConfig::default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// How long to keep retrying the connection to a freshly started JVM.
    #[serde(default = "JdwpConfig::default_attach_timeout_ms")]
    pub attach_timeout_ms: u64,
}

impl JdwpConfig {
    fn default_handshake_timeout_ms() -> u64 {
        5_000
    }

    fn default_reply_timeout_ms() -> u64 {
        10_000
    }

    fn default_attach_timeout_ms() -> u64 {
        10_000
    }

    pub fn client_config(&self) -> JdwpClientConfig {
        JdwpClientConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }
}

impl Default for JdwpConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: Self::default_handshake_timeout_ms(),
            reply_timeout_ms: Self::default_reply_timeout_ms(),
            attach_timeout_ms: Self::default_attach_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level, or a full `EnvFilter` directive string.
    ///
    /// Defaults to `warn` so diagnostics do not interleave with the prompt.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "warn".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            "off" | "none" => "off".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
        })
    }

    /// The effective filter: the configured level, with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}
