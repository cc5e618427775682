//! Configuration system for the `NeoChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/neochat/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A required setting is missing from every configuration layer.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileSection,
    auth: AuthFileSection,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileSection {
    bind_addr: Option<String>,
    db_path: Option<String>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileSection {
    jwt_secret: Option<String>,
    token_ttl_hours: Option<i64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "NeoChat messaging server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "NEOCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/neochat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite message database.
    #[arg(long, env = "NEOCHAT_DB")]
    pub db_path: Option<String>,

    /// Secret used to verify bearer tokens.
    #[arg(long, env = "NEOCHAT_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Lifetime of issued tokens in hours.
    #[arg(long, env = "NEOCHAT_TOKEN_TTL_HOURS")]
    pub token_ttl_hours: Option<i64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "NEOCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Path to the SQLite message database.
    pub db_path: String,
    /// Secret used to verify bearer tokens. Has no default; must come from
    /// the CLI, the environment, or the config file.
    pub jwt_secret: String,
    /// Lifetime of issued tokens in hours.
    pub token_ttl_hours: i64,
    /// Log level filter string.
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if no layer provides a JWT secret.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Result<Self, ConfigError> {
        let jwt_secret = cli
            .jwt_secret
            .clone()
            .or_else(|| file.auth.jwt_secret.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("jwt_secret (NEOCHAT_JWT_SECRET)"))?;

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            db_path: cli
                .db_path
                .clone()
                .or_else(|| file.server.db_path.clone())
                .unwrap_or_else(|| "data/neochat.db".to_string()),
            jwt_secret,
            token_ttl_hours: cli
                .token_ttl_hours
                .or(file.auth.token_ttl_hours)
                .unwrap_or(1),
            log_level: cli.log_level.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("neochat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
