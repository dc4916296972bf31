//! Shared CLI helpers and small reusable Clap fragments

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{host_port, split_host_port, ClientConfig, ServerConfig};

/// Options for the `bitdrived` server
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "BitDrive server - share one directory over TCP")]
pub struct DaemonOpts {
    /// TOML config file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Storage directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum concurrent sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Transfer window size in bytes
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Seconds a session may idle between commands
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Seconds allowed for each handshake step or transfer window
    #[arg(long)]
    pub io_timeout: Option<u64>,

    /// Append session audit lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl DaemonOpts {
    /// Config file (or defaults) with every given flag applied on top.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut cfg = match self.config {
            Some(ref p) => ServerConfig::load(p)?,
            None => ServerConfig::default(),
        };
        if self.host.is_some() || self.port.is_some() {
            let (cur_host, cur_port) = split_host_port(&cfg.bind);
            let host = self.host.clone().unwrap_or(cur_host);
            let port = self.port.unwrap_or(cur_port);
            cfg.bind = host_port(&host, port);
        }
        if let Some(ref r) = self.root {
            cfg.root = r.clone();
        }
        if let Some(n) = self.max_sessions {
            cfg.max_sessions = n;
        }
        if let Some(w) = self.window_size {
            cfg.window_size = w;
        }
        if let Some(t) = self.idle_timeout {
            cfg.idle_timeout_secs = t;
        }
        if let Some(t) = self.io_timeout {
            cfg.io_timeout_secs = t;
        }
        if self.log_file.is_some() {
            cfg.log_file = self.log_file.clone();
        }
        Ok(cfg)
    }
}

/// Options for the interactive `bitdrive` client
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "BitDrive client")]
pub struct ClientOpts {
    /// Server host
    pub host: Option<String>,

    /// Server port
    pub port: Option<u16>,

    /// TOML config file; arguments override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local directory for uploads and downloads
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Transfer window size in bytes
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Seconds allowed for each handshake step or transfer window
    #[arg(long)]
    pub io_timeout: Option<u64>,

    /// Show a progress bar during transfers
    #[arg(long)]
    pub progress: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl ClientOpts {
    pub fn resolve(&self) -> Result<ClientConfig> {
        let mut cfg = match self.config {
            Some(ref p) => ClientConfig::load(p)?,
            None => ClientConfig::default(),
        };
        if let Some(ref h) = self.host {
            cfg.host = h.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(ref d) = self.dir {
            cfg.local_dir = d.clone();
        }
        if let Some(w) = self.window_size {
            cfg.window_size = w;
        }
        if let Some(t) = self.io_timeout {
            cfg.io_timeout_secs = t;
        }
        if self.progress {
            cfg.progress = true;
        }
        Ok(cfg)
    }
}

/// Log filter for a `-v` count; `RUST_LOG` still wins.
pub fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}
