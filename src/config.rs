//! Server and client settings: defaults, optional TOML file, CLI overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::transfer::TransferParams;

pub const DEFAULT_PORT: u16 = 9040;
pub const DEFAULT_MAX_SESSIONS: usize = 2;

/// `host:port`, with IPv6 literals bracketed (`[::1]:9040`).
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split a `host:port` bind string. A bare host (including a bare IPv6
/// literal) gets `DEFAULT_PORT`.
pub fn split_host_port(addr: &str) -> (String, u16) {
    if let Ok(sa) = addr.parse::<SocketAddr>() {
        return (sa.ip().to_string(), sa.port());
    }
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((h, tail)) => (
                h.to_string(),
                tail.strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_PORT),
            ),
            None => (rest.to_string(), DEFAULT_PORT),
        };
    }
    match addr.rsplit_once(':') {
        Some((h, p)) if !h.contains(':') => (h.to_string(), p.parse().unwrap_or(DEFAULT_PORT)),
        _ => (addr.to_string(), DEFAULT_PORT),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub root: PathBuf,
    pub max_sessions: usize,
    pub window_size: usize,
    pub idle_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            root: PathBuf::from("server_files"),
            max_sessions: DEFAULT_MAX_SESSIONS,
            window_size: DEFAULT_WINDOW_SIZE,
            idle_timeout_secs: timeouts::IDLE_SECS,
            io_timeout_secs: timeouts::IO_SECS,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    /// Check limits and canonicalize the storage root.
    pub fn validate(mut self) -> Result<Self> {
        if self.max_sessions == 0 {
            bail!("max_sessions must be at least 1");
        }
        check_window(self.window_size)?;
        if self.idle_timeout_secs == 0 || self.io_timeout_secs == 0 {
            bail!("timeouts must be at least 1 second");
        }
        if !self.root.exists() {
            bail!("storage root does not exist: {}", self.root.display());
        }
        if !self.root.is_dir() {
            bail!("storage root is not a directory: {}", self.root.display());
        }
        self.root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("failed to canonicalize root: {}", self.root.display()))?;
        Ok(self)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn transfer_params(&self) -> TransferParams {
        TransferParams {
            window_size: self.window_size,
            io_timeout: self.io_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub local_dir: PathBuf,
    pub window_size: usize,
    pub io_timeout_secs: u64,
    pub progress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            local_dir: PathBuf::from("."),
            window_size: DEFAULT_WINDOW_SIZE,
            io_timeout_secs: timeouts::IO_SECS,
            progress: false,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn validate(self) -> Result<Self> {
        check_window(self.window_size)?;
        if self.io_timeout_secs == 0 {
            bail!("io_timeout_secs must be at least 1");
        }
        if !self.local_dir.is_dir() {
            bail!("local directory is not a directory: {}", self.local_dir.display());
        }
        Ok(self)
    }

    /// Address to dial, e.g. `127.0.0.1:9040` or `[::1]:9040`.
    pub fn address(&self) -> String {
        host_port(&self.host, self.port)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn transfer_params(&self) -> TransferParams {
        TransferParams {
            window_size: self.window_size,
            io_timeout: self.io_timeout(),
        }
    }
}

fn check_window(window_size: usize) -> Result<()> {
    if window_size == 0 || window_size > MAX_WINDOW_SIZE {
        bail!(
            "window_size must be between 1 and {} bytes (got {})",
            MAX_WINDOW_SIZE,
            window_size
        );
    }
    Ok(())
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("failed to parse config {}", path.display()))
}
