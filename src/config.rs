//! Configuration loading and validation.

use crate::error::Result;
use crate::pruner::EvictionPolicy;
use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Responder the bridge addresses when none is configured.
const DEFAULT_RESPONDER_ID: u64 = 1_081_004_946_872_352_958;

const DEFAULT_PORT: u16 = 53195;
const DEFAULT_CHANNEL_CEILING: usize = 450;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 900;

/// Requests per second applied when RATELIMIT_MAX_RPS is set but unparseable.
const DEFAULT_RATELIMIT_RPS: u32 = 4;

/// Top-level bridgebot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance root directory (~/.bridgebot or BRIDGEBOT_DIR).
    pub instance_dir: PathBuf,
    /// Discord credentials and addressing.
    pub discord: DiscordConfig,
    /// HTTP server configuration.
    pub http: HttpConfig,
    /// Channel pruning configuration.
    pub prune: PruneConfig,
    /// Seconds to wait for a responder reply. None waits indefinitely.
    pub reply_timeout_secs: Option<u64>,
}

/// Discord connection settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token. Supports "env:VAR_NAME" references.
    pub token: String,
    /// Server whose channels back the conversations.
    pub server_id: u64,
    /// The user whose messages count as replies.
    pub responder_id: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
    pub bind: String,
    /// Allowed CORS origin. None leaves CORS disabled.
    pub cors_origin: Option<String>,
    /// Request ceiling per one-second window. None disables rate limiting.
    pub ratelimit_max_rps: Option<u32>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".into(),
            cors_origin: None,
            ratelimit_max_rps: None,
        }
    }
}

/// Channel pruning settings.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Channel count above which a sweep deletes.
    pub channel_ceiling: usize,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// How victims are chosen.
    pub policy: EvictionPolicy,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            channel_ceiling: DEFAULT_CHANNEL_CEILING,
            interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
            policy: EvictionPolicy::default(),
        }
    }
}

// -- TOML deserialization structs --

#[derive(Debug, Deserialize)]
struct TomlConfig {
    discord: TomlDiscordConfig,
    #[serde(default)]
    http: TomlHttpConfig,
    #[serde(default)]
    prune: TomlPruneConfig,
    reply_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlDiscordConfig {
    token: String,
    /// Kept as a string so "env:VAR_NAME" references work.
    server_id: String,
    responder_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlHttpConfig {
    port: Option<u16>,
    bind: Option<String>,
    cors_origin: Option<String>,
    ratelimit_max_rps: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlPruneConfig {
    channel_ceiling: Option<usize>,
    interval_secs: Option<u64>,
    policy: Option<String>,
}

impl Config {
    /// The default instance directory: BRIDGEBOT_DIR or ~/.bridgebot.
    pub fn default_instance_dir() -> PathBuf {
        std::env::var("BRIDGEBOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|d| d.join(".bridgebot"))
                    .unwrap_or_else(|| PathBuf::from("./.bridgebot"))
            })
    }

    /// Load configuration from the default config file, falling back to env vars.
    pub fn load() -> Result<Self> {
        let instance_dir = Self::default_instance_dir();

        let config_path = instance_dir.join("config.toml");
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::load_from_env(&instance_dir)
        }
    }

    /// Load from a specific TOML config file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let instance_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        Self::from_toml(toml_config, instance_dir)
    }

    /// Load from environment variables only (no config file).
    pub fn load_from_env(instance_dir: &Path) -> Result<Self> {
        let token = std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;

        let server_id = std::env::var("SERVER_ID")
            .context("SERVER_ID is not set")?
            .parse::<u64>()
            .context("SERVER_ID must be a numeric id")?;

        let responder_id = match std::env::var("RESPONDER_ID") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("RESPONDER_ID must be a numeric id")?,
            Err(_) => DEFAULT_RESPONDER_ID,
        };

        let http = HttpConfig {
            port: std::env::var("PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            cors_origin: std::env::var("CORS_ORIGIN").ok(),
            ratelimit_max_rps: ratelimit_from_env(),
            ..HttpConfig::default()
        };

        let prune = PruneConfig {
            channel_ceiling: std::env::var("CHANNEL_CEILING")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_CHANNEL_CEILING),
            interval_secs: std::env::var("PRUNE_INTERVAL_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
            policy: EvictionPolicy::default(),
        };

        let reply_timeout_secs = std::env::var("REPLY_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok());

        Ok(Self {
            instance_dir: instance_dir.to_path_buf(),
            discord: DiscordConfig {
                token,
                server_id,
                responder_id,
            },
            http,
            prune,
            reply_timeout_secs,
        })
    }

    /// Resolve a parsed TOML config into the runtime config.
    fn from_toml(toml: TomlConfig, instance_dir: PathBuf) -> Result<Self> {
        let token = resolve_env_value(&toml.discord.token)
            .or_else(|| std::env::var("DISCORD_TOKEN").ok())
            .context("discord token is not set")?;

        let server_id = resolve_env_value(&toml.discord.server_id)
            .or_else(|| std::env::var("SERVER_ID").ok())
            .context("discord server_id is not set")?
            .parse::<u64>()
            .context("discord server_id must be a numeric id")?;

        let responder_id = match toml
            .discord
            .responder_id
            .as_deref()
            .and_then(resolve_env_value)
            .or_else(|| std::env::var("RESPONDER_ID").ok())
        {
            Some(raw) => raw
                .parse::<u64>()
                .context("discord responder_id must be a numeric id")?,
            None => DEFAULT_RESPONDER_ID,
        };

        let defaults = HttpConfig::default();
        let http = HttpConfig {
            port: toml
                .http
                .port
                .or_else(|| std::env::var("PORT").ok().and_then(|raw| raw.parse().ok()))
                .unwrap_or(defaults.port),
            bind: toml.http.bind.unwrap_or(defaults.bind),
            cors_origin: toml
                .http
                .cors_origin
                .or_else(|| std::env::var("CORS_ORIGIN").ok()),
            ratelimit_max_rps: toml.http.ratelimit_max_rps.or_else(ratelimit_from_env),
        };

        let policy = match toml.prune.policy.as_deref() {
            Some(raw) => raw.parse().context("invalid prune policy")?,
            None => EvictionPolicy::default(),
        };

        let prune = PruneConfig {
            channel_ceiling: toml.prune.channel_ceiling.unwrap_or(DEFAULT_CHANNEL_CEILING),
            interval_secs: toml.prune.interval_secs.unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
            policy,
        };

        let reply_timeout_secs = toml.reply_timeout_secs.or_else(|| {
            std::env::var("REPLY_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
        });

        Ok(Self {
            instance_dir,
            discord: DiscordConfig {
                token,
                server_id,
                responder_id,
            },
            http,
            prune,
            reply_timeout_secs,
        })
    }
}

/// Resolve "env:VAR_NAME" references in config values.
fn resolve_env_value(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        std::env::var(var_name).ok()
    } else {
        Some(value.to_string())
    }
}

/// RATELIMIT_MAX_RPS semantics: unset means no limiting, set but unparseable
/// means the default rate.
fn ratelimit_from_env() -> Option<u32> {
    std::env::var("RATELIMIT_MAX_RPS")
        .ok()
        .map(|raw| raw.parse().unwrap_or(DEFAULT_RATELIMIT_RPS))
}
