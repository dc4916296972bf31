use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

/// Audit trail of session events. Every method defaults to a no-op.
pub trait SessionLogger: Send + Sync {
    fn connected(&self, _session: &str, _peer: SocketAddr) {}
    fn rejected(&self, _peer: SocketAddr) {}
    fn command(&self, _session: &str, _token: &str) {}
    fn transfer_done(&self, _session: &str, _direction: &str, _name: &str, _bytes: u64) {}
    fn deleted(&self, _session: &str, _name: &str) {}
    fn error(&self, _session: &str, _context: &str, _msg: &str) {}
    fn disconnected(&self, _session: &str) {}
}

pub struct NoopLogger;
impl SessionLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl SessionLogger for TextLogger {
    fn connected(&self, session: &str, peer: SocketAddr) {
        self.line(&format!("CONNECT session={} peer={}", session, peer));
    }
    fn rejected(&self, peer: SocketAddr) {
        self.line(&format!("REJECT peer={} reason=pool_full", peer));
    }
    fn command(&self, session: &str, token: &str) {
        self.line(&format!("COMMAND session={} token={:?}", session, token));
    }
    fn transfer_done(&self, session: &str, direction: &str, name: &str, bytes: u64) {
        self.line(&format!(
            "{} session={} name={:?} bytes={}",
            direction.to_ascii_uppercase(),
            session,
            name,
            bytes
        ));
    }
    fn deleted(&self, session: &str, name: &str) {
        self.line(&format!("DELETE session={} name={:?}", session, name));
    }
    fn error(&self, session: &str, context: &str, msg: &str) {
        self.line(&format!("ERROR session={} ctx={} msg={}", session, context, msg));
    }
    fn disconnected(&self, session: &str) {
        self.line(&format!("DISCONNECT session={}", session));
    }
}
