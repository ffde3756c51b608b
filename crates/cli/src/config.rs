//! Configuration file for `conveyor`.
//!
//! Names the environments and systems the CLI can talk to, plus the
//! function names the script analyzer should not treat as calls.
//!
//! # Example
//!
//! ```toml
//! exclude_from_function_detection = ["logger.info"]
//!
//! [[environment]]
//! id = 1
//! name = "Development"
//! color = "#40a040"
//! position = 1
//!
//! [[system]]
//! name = "dev"
//! server = "mirth-dev.example.com"
//! port = 8443
//! user = "migrator"
//! password_env = "DEV_PASSWORD"
//! environment = 1
//!
//! [miscellaneous]
//! session_lifespan_minutes = 30
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {message}")]
    Read { path: String, message: String },

    #[error("could not parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no password for system '{system}': set `password` or `password_env`")]
    MissingPassword { system: String },

    #[error("no system named '{0}' in the configuration")]
    UnknownSystem(String),
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Function names ignored by the script analyzer.
    #[serde(default)]
    pub exclude_from_function_detection: Vec<String>,
    #[serde(default, rename = "environment")]
    pub environments: Vec<Environment>,
    #[serde(default, rename = "system")]
    pub systems: Vec<SystemConfig>,
    #[serde(default)]
    pub miscellaneous: Miscellaneous,
}

/// `[[environment]]`: a stage systems belong to, shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: u32,
}

/// `[[system]]`: one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Host name, or a full base URL including the scheme.
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    /// Id of the `[[environment]]` this system belongs to.
    #[serde(default)]
    pub environment: Option<u32>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Miscellaneous {
    #[serde(default = "default_session_lifespan")]
    pub session_lifespan_minutes: u64,
    #[serde(default = "default_status_refresh")]
    pub status_refresh_seconds: u64,
}

impl Default for Miscellaneous {
    fn default() -> Self {
        Miscellaneous {
            session_lifespan_minutes: default_session_lifespan(),
            status_refresh_seconds: default_status_refresh(),
        }
    }
}

fn default_port() -> u16 {
    8443
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_session_lifespan() -> u64 {
    30
}

fn default_status_refresh() -> u64 {
    60
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Config::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<config>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let mut env_ids = HashSet::new();
        for env in &self.environments {
            if !env_ids.insert(env.id) {
                errors.push(format!("environment id {} is defined more than once", env.id));
            }
        }

        let mut names = HashSet::new();
        for system in &self.systems {
            if system.name.trim().is_empty() {
                errors.push("a system has an empty name".to_string());
            } else if !names.insert(system.name.as_str()) {
                errors.push(format!("system '{}' is defined more than once", system.name));
            }
            if system.server.trim().is_empty() {
                errors.push(format!("system '{}' has no server", system.name));
            }
            if system.user.trim().is_empty() {
                errors.push(format!("system '{}' has no user", system.name));
            }
            if let Some(env) = system.environment {
                if !env_ids.contains(&env) {
                    errors.push(format!(
                        "system '{}' refers to unknown environment {}",
                        system.name, env
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    pub fn system(&self, name: &str) -> Result<&SystemConfig, ConfigError> {
        self.systems
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSystem(name.to_string()))
    }

    pub fn environment(&self, id: u32) -> Option<&Environment> {
        self.environments.iter().find(|e| e.id == id)
    }
}

impl SystemConfig {
    /// Base URL of the engine's REST API, without a trailing slash.
    pub fn base_url(&self) -> String {
        let server = self.server.trim().trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{}:{}", server, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The literal password, or the value of `password_env`.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .ok_or_else(|| ConfigError::MissingPassword {
                system: self.name.clone(),
            })
    }

    /// SHA-256 over everything that affects how the system is reached.
    /// Two configurations of the same system with equal fingerprints can
    /// share a cached snapshot.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            self.name,
            self.base_url(),
            self.user,
            self.password.as_deref().unwrap_or(""),
            self.password_env.as_deref().unwrap_or(""),
            self.accept_invalid_certs,
            self.connect_timeout_secs,
        );
        let hash = Sha256::digest(canonical.as_bytes());
        format!("{:x}", hash)
    }
}
