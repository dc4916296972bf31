//! Accept loop and session pool.
//!
//! Every accepted connection is moved into its own task. A connection is
//! admitted only if a pool slot is free; otherwise it is told `server_busy`
//! and closed. A slot is released when its session task ends, however it
//! ends.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::frame_io::send_token;
use crate::logger::{NoopLogger, SessionLogger, TextLogger};
use crate::protocol::token;
use crate::session::{Session, SessionContext, SessionEnd};

/// Fixed number of concurrent session slots.
#[derive(Clone)]
pub struct SessionPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One occupied slot; dropping it frees the slot.
pub struct SessionSlot {
    _permit: OwnedSemaphorePermit,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free. Never waits.
    pub fn try_acquire(&self) -> Option<SessionSlot> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SessionSlot { _permit: permit })
    }

    pub fn active(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    pool: SessionPool,
    logger: Arc<dyn SessionLogger>,
}

impl Server {
    pub async fn bind(config: &ServerConfig, logger: Arc<dyn SessionLogger>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext::new(config, logger.clone())),
            pool: SessionPool::new(config.max_sessions),
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn pool(&self) -> SessionPool {
        self.pool.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept until `shutdown` resolves. Sessions already running keep going
    /// on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "BitDrive server listening on {} root={} slots={}",
            self.local_addr()?,
            self.ctx.root.display(),
            self.pool.capacity()
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down, {} session(s) still active", self.pool.active());
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        error!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    fn admit(&self, mut stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let io_timeout = self.ctx.io_timeout;

        let Some(slot) = self.pool.try_acquire() else {
            warn!("rejecting {}: all {} slots in use", peer, self.pool.capacity());
            self.logger.rejected(peer);
            tokio::spawn(async move {
                let _ = send_token(&mut stream, token::SERVER_BUSY, io_timeout).await;
                let _ = stream.shutdown().await;
            });
            return;
        };

        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let ctx = self.ctx.clone();
        let pool = self.pool.clone();
        info!(
            "Connected to client {} ({}), {}/{} slots in use",
            id,
            peer,
            pool.active(),
            pool.capacity()
        );
        ctx.logger.connected(&id, peer);

        tokio::spawn(async move {
            let _slot = slot;
            if let Err(e) = send_token(&mut stream, token::WELCOME, io_timeout).await {
                warn!("Client {}: greeting failed: {}", id, e);
                ctx.logger.disconnected(&id);
                return;
            }
            match Session::new(id.clone(), stream, ctx).run().await {
                SessionEnd::Quit => info!("Client {} quit", id),
                SessionEnd::Disconnected => {}
                SessionEnd::Failed(e) => warn!("Client {} dropped: {}", id, e),
            }
        });
    }
}

/// Build the audit logger named by the config, falling back to no-op.
pub fn logger_for(config: &ServerConfig) -> Arc<dyn SessionLogger> {
    match config.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                warn!("cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    }
}

/// Run a server for `config` until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let logger = logger_for(&config);
    let server = Server::bind(&config, logger).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_never_exceeds_capacity() {
        let pool = SessionPool::new(2);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_eq!(pool.active(), 2);
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.active(), 1);
        let c = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        drop(b);
        drop(c);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_pool_clones_share_slots() {
        let pool = SessionPool::new(1);
        let other = pool.clone();
        let _slot = pool.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
        assert_eq!(other.active(), 1);
    }
}
