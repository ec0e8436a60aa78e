use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use url::Url;

/// Referer used when a relay request does not carry one (the player embed origin).
pub const DEFAULT_REFERER: &str = "https://megacloud.tv/";

/// Desktop Chrome user agent presented to upstream origins.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Route the relay is mounted on; rewritten manifest lines point back here.
pub const DEFAULT_RELAY_PATH: &str = "/api/proxy";

pub const DEFAULT_LISTEN_PORT: u16 = 4321;

/// Deadline for upstream response headers (and manifest bodies).
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Content type served for rewritten playlists.
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Substring identifying HLS MIME types (`application/vnd.apple.mpegurl`, `application/x-mpegURL`).
pub const HLS_MIME_MARKER: &str = "mpegurl";

pub const HLS_PLAYLIST_EXTENSION: &str = ".m3u8";

/// Content type used for passthrough bodies when upstream sends none.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Prefix shared by every environment variable the relay reads.
pub const ENV_PREFIX: &str = "TSUKINO_RELAY_";

/// Top-level configuration for the relay, read-only once the server starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP listener binds to. Port 0 picks a random port.
    pub listen_addr: SocketAddr,
    /// Path of the relay route, also used as the prefix of rewritten segment URLs.
    pub relay_path: String,
    /// Referer impersonated when the caller omits `referer`.
    pub default_referer: String,
    pub user_agent: String,
    pub accept_language: String,
    /// Attach a random `X-Forwarded-For` / `X-Real-IP` pair to upstream requests.
    pub spoof_client_ip: bool,
    /// Upstream deadline in seconds; 0 disables it.
    pub upstream_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Hosts allowed to address the relay. Empty allows any host.
    pub allowed_hosts: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            relay_path: DEFAULT_RELAY_PATH.to_string(),
            default_referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            spoof_client_ip: true,
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            allowed_hosts: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps an environment variable
    /// name to its value. `TSUKINO_RELAY_CONFIG` names an optional JSON file
    /// applied first; individual variables override it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = match var("CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = var("BIND") {
            config.listen_addr = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}BIND invalid: {v}"))?;
        }
        if let Some(v) = var("PATH") {
            config.relay_path = v;
        }
        if let Some(v) = var("DEFAULT_REFERER") {
            config.default_referer = v;
        }
        if let Some(v) = var("USER_AGENT") {
            config.user_agent = v;
        }
        if let Some(v) = var("ACCEPT_LANGUAGE") {
            config.accept_language = v;
        }
        if let Some(v) = var("SPOOF_CLIENT_IP") {
            config.spoof_client_ip = parse_bool(&v)
                .ok_or_else(|| anyhow!("{ENV_PREFIX}SPOOF_CLIENT_IP invalid: {v}"))?;
        }
        if let Some(v) = var("UPSTREAM_TIMEOUT_SECS") {
            config.upstream_timeout_secs = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}UPSTREAM_TIMEOUT_SECS invalid: {v}"))?;
        }
        if let Some(v) = var("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}CONNECT_TIMEOUT_SECS invalid: {v}"))?;
        }
        if let Some(v) = var("ALLOWED_HOSTS") {
            config.allowed_hosts = v
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.relay_path.starts_with('/') {
            bail!("relay path must start with '/': {}", self.relay_path);
        }
        self.default_referer_url()?;
        if self.user_agent.trim().is_empty() {
            bail!("user agent must not be empty");
        }
        Ok(())
    }

    pub fn default_referer_url(&self) -> Result<Url> {
        Url::parse(&self.default_referer)
            .with_context(|| format!("default referer is not an absolute url: {}", self.default_referer))
    }

    /// Upstream deadline, or `None` when disabled.
    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_secs > 0).then(|| Duration::from_secs(self.upstream_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
