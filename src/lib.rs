//! BitDrive library
//!
//! Minimal client/server file sharing over one TCP connection per session:
//! list, upload, download and delete files in a single storage directory.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod frame_io;
pub mod listing;
pub mod logger;
pub mod paths;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transfer;

pub use client::{Client, DeleteOutcome, DownloadOutcome, Selector, UploadOutcome};
pub use config::{ClientConfig, ServerConfig};
pub use error::{SessionError, SessionResult};
pub use listing::{build_listing, Listing, ListingEntry};
pub use server::{serve, Server, SessionPool};
