//! Environment-backed configuration.
//!
//! Everything is resolved once at startup into an immutable [`Config`];
//! nothing re-reads the environment afterwards. A `.env` file is honored
//! when present (loaded by the binary before `Config::from_env`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// One addressable game-service process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Chat webhook the notifier posts to.
    pub hook_url: String,
    /// Secret for verifying inbound webhook signatures.
    pub signing_secret: String,
    /// Only commands from this channel are processed.
    pub channel: String,
    /// Freshness window for signed requests; also the patcher HTTP timeout.
    pub request_timeout: Duration,

    /// User the task runner spawns commands as. None = current user.
    pub service_user: Option<String>,
    /// Root under which the repository checkouts live.
    pub base_dir: PathBuf,
    pub server_dir: String,
    pub core_dir: String,
    pub locale_dir: String,
    pub quest_dir: String,
    pub compile_command: String,
    pub start_command: String,
    pub stop_command: String,

    /// Sync endpoint of the patcher host; None = patcher commands disabled.
    pub patcher_url: Option<String>,
    /// Directory the patcher host serves; manifest is rewritten here.
    pub patcher_files_dir: PathBuf,
    /// Shared secret keying the per-field cipher.
    pub patcher_secret: String,
    /// Mutual-authentication token for the sync handshake.
    pub patcher_greeting: String,
    /// Whether this instance answers patcher sync requests.
    pub is_patcher_server: bool,

    pub game_host: String,
    pub shards: Vec<Shard>,
    pub auth_port: u16,
    /// Password expected by the game service before any call.
    pub game_auth_pass: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let ports = split_list(&var("GAME_PORTS")?);
        let names = split_list(&var("GAME_PORT_NAMES")?);
        if ports.len() != names.len() {
            bail!(
                "GAME_PORTS and GAME_PORT_NAMES disagree: {} ports, {} names",
                ports.len(),
                names.len()
            );
        }
        let shards = names
            .into_iter()
            .zip(ports)
            .map(|(name, port)| {
                Ok(Shard {
                    name,
                    port: port.parse().context("invalid port in GAME_PORTS")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hook_url: var("HOOK_URL")?,
            signing_secret: var("SIGNING_SECRET")?,
            channel: var("CHANNEL_NAME")?,
            request_timeout: Duration::from_secs(
                var_or("REQUEST_TIMEOUT", "10")
                    .parse()
                    .context("REQUEST_TIMEOUT must be whole seconds")?,
            ),
            service_user: var_opt("SERVICE_USER"),
            base_dir: expand_tilde(Path::new(&var("BASE_DIRECTORY")?)),
            server_dir: var("SERVER_DIR")?,
            core_dir: var("CORE_DIR")?,
            locale_dir: var("LOCALE_DIR")?,
            quest_dir: var("QUEST_DIR")?,
            compile_command: var("COMPILE_COMMAND")?,
            start_command: var("START_COMMAND")?,
            stop_command: var("STOP_COMMAND")?,
            patcher_url: var_opt("PATCHER_URL"),
            patcher_files_dir: expand_tilde(Path::new(&var("PATCHER_FILES_DIR")?)),
            patcher_secret: var("PATCHER_SECRET")?,
            patcher_greeting: var("PATCHER_GREETING")?,
            is_patcher_server: var_opt("IS_PATCHER_SERVER")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            game_host: var("GAME_HOST")?,
            shards,
            auth_port: var("GAME_AUTH_PORT")?
                .parse()
                .context("GAME_AUTH_PORT must be a port number")?,
            game_auth_pass: var("GAME_AUTH_PASS")?,
        })
    }
}

fn var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing environment variable {name}"))
}

fn var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var_opt(name).unwrap_or_else(|| default.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            home.join(rest)
        } else {
            path.to_path_buf()
        }
    } else {
        path.to_path_buf()
    }
}
