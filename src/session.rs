//! Server side of one connection: read a command token, run that command's
//! handshake against the storage root, reply, repeat until QUIT or the
//! connection drops.
//!
//! A protocol mismatch or filesystem failure aborts only the current command
//! and the session returns to `Idle`. I/O failures, timeouts and frame decode
//! errors end the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ServerConfig;
use crate::error::{SessionError, SessionResult};
use crate::frame_io::{expect_token, read_frame, send_token, write_frame};
use crate::listing::build_listing;
use crate::logger::SessionLogger;
use crate::paths::{resolve_existing_file, resolve_under_root};
use crate::protocol::{frame, token};
use crate::transfer::{PendingFile, SourceFile, TransferOutcome, TransferParams};

/// A command token as understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Upload,
    Download,
    Delete,
    Quit,
    Invalid(String),
}

impl Command {
    /// Exact, case-sensitive match; anything else is `Invalid`.
    pub fn parse(t: &str) -> Self {
        match t {
            token::LIST => Command::List,
            token::UPLOAD => Command::Upload,
            token::DOWNLOAD => Command::Download,
            token::DELETE => Command::Delete,
            token::QUIT => Command::Quit,
            other => Command::Invalid(other.to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Command::List => token::LIST,
            Command::Upload => token::UPLOAD,
            Command::Download => token::DOWNLOAD,
            Command::Delete => token::DELETE,
            Command::Quit => token::QUIT,
            Command::Invalid(t) => t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStep {
    AwaitingAck,
    SendingBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    AwaitingFilename,
    AwaitingTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStep {
    AwaitingFilename,
    AwaitingReady,
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listing(ListStep),
    Uploading(UploadStep),
    Downloading(DownloadStep),
    Deleting,
    Closed,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    Quit,
    Disconnected,
    Failed(SessionError),
}

/// Settings shared by every session of one server.
pub struct SessionContext {
    pub root: PathBuf,
    pub transfer: TransferParams,
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
    pub logger: Arc<dyn SessionLogger>,
}

impl SessionContext {
    pub fn new(config: &ServerConfig, logger: Arc<dyn SessionLogger>) -> Self {
        Self {
            root: config.root.clone(),
            transfer: config.transfer_params(),
            idle_timeout: config.idle_timeout(),
            io_timeout: config.io_timeout(),
            logger,
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

pub struct Session<S> {
    id: String,
    stream: S,
    ctx: Arc<SessionContext>,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: impl Into<String>, stream: S, ctx: Arc<SessionContext>) -> Self {
        Self {
            id: id.into(),
            stream,
            ctx,
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Client {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    pub async fn run(mut self) -> SessionEnd {
        let end = loop {
            self.set_state(SessionState::Idle);
            let f = match read_frame(&mut self.stream, self.ctx.idle_timeout).await {
                Ok(f) => f,
                Err(e) => break self.end_for(e),
            };
            let request = f.text();
            debug!("Client {}: {}", self.id, request);
            self.ctx.logger.command(&self.id, &request);

            let cmd = if f.kind == frame::TOKEN {
                Command::parse(&request)
            } else {
                Command::Invalid(request)
            };
            match self.dispatch(cmd).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break SessionEnd::Quit,
                Err(e) if !e.is_fatal() => {
                    warn!("Client {}: command aborted: {}", self.id, e);
                    self.ctx.logger.error(&self.id, "command", &e.to_string());
                }
                Err(e) => break self.end_for(e),
            }
        };
        self.set_state(SessionState::Closed);
        self.ctx.logger.disconnected(&self.id);
        end
    }

    fn end_for(&self, e: SessionError) -> SessionEnd {
        if e.is_disconnect() {
            info!("Client {} disconnected", self.id);
            SessionEnd::Disconnected
        } else {
            warn!("Client {}: session failed: {}", self.id, e);
            self.ctx.logger.error(&self.id, "session", &e.to_string());
            SessionEnd::Failed(e)
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> SessionResult<Flow> {
        match cmd {
            Command::List => self.list().await?,
            Command::Upload => self.upload().await?,
            Command::Download => self.download().await?,
            Command::Delete => self.delete().await?,
            Command::Quit => {
                self.reply(token::DISCONNECTING).await?;
                return Ok(Flow::Quit);
            }
            Command::Invalid(_) => self.reply(token::INVALID_INPUT).await?,
        }
        Ok(Flow::Continue)
    }

    async fn reply(&mut self, t: &str) -> SessionResult<()> {
        debug!("Client {}: {}", self.id, t);
        send_token(&mut self.stream, t, self.ctx.io_timeout).await
    }

    /// Read the filename step. `None` means the client withdrew the command
    /// by sending `filename_error` in place of a name.
    async fn read_filename(&mut self, on_mismatch: &str) -> SessionResult<Option<String>> {
        let f = read_frame(&mut self.stream, self.ctx.io_timeout).await?;
        let text = f.text();
        match f.kind {
            frame::FILENAME => {
                debug!("Client {}: {}", self.id, text);
                Ok(Some(text))
            }
            frame::TOKEN if text == token::FILENAME_ERROR => {
                info!("Client {} withdrew the command", self.id);
                Ok(None)
            }
            other => {
                self.reply(on_mismatch).await?;
                Err(SessionError::mismatch(
                    frame::name(frame::FILENAME),
                    format!("{} {:?}", frame::name(other), text),
                ))
            }
        }
    }

    async fn list(&mut self) -> SessionResult<()> {
        let root = self.ctx.root.clone();
        let listing = tokio::task::spawn_blocking(move || build_listing(&root))
            .await
            .map_err(|e| SessionError::Filesystem(format!("listing task failed: {}", e)))?;
        info!("Client {}: {} file(s) found", self.id, listing.len());

        self.reply(&listing.len().to_string()).await?;
        self.set_state(SessionState::Listing(ListStep::AwaitingAck));
        expect_token(&mut self.stream, token::FILE_COUNT_RECEIVED, self.ctx.io_timeout).await?;

        self.set_state(SessionState::Listing(ListStep::SendingBody));
        write_frame(
            &mut self.stream,
            frame::LISTING,
            listing.encode().as_bytes(),
            self.ctx.io_timeout,
        )
        .await
    }

    async fn upload(&mut self) -> SessionResult<()> {
        self.reply(token::READY_UPLOAD).await?;
        self.set_state(SessionState::Uploading(UploadStep::AwaitingFilename));

        let Some(name) = self.read_filename(token::FILENAME_ERROR).await? else {
            return Ok(());
        };
        let pending = match resolve_under_root(&self.ctx.root, &name) {
            Ok(dest) => PendingFile::create(&dest).await,
            Err(e) => Err(e),
        };
        let pending = match pending {
            Ok(p) => p,
            Err(e) => {
                self.reply(token::FILENAME_ERROR).await?;
                return Err(e);
            }
        };
        self.reply(token::READY_FILENAME).await?;

        self.set_state(SessionState::Uploading(UploadStep::AwaitingTransfer));
        match pending
            .receive(&mut self.stream, self.ctx.transfer, None)
            .await?
        {
            TransferOutcome::Complete { bytes } => {
                info!("Client {}: received {} ({} bytes)", self.id, name, bytes);
                self.ctx.logger.transfer_done(&self.id, "upload", &name, bytes);
                Ok(())
            }
            TransferOutcome::Incomplete { received, expected } => {
                warn!(
                    "Client {}: upload of {} stopped at {} of {} bytes, discarded",
                    self.id, name, received, expected
                );
                Err(SessionError::EndOfStream)
            }
        }
    }

    async fn download(&mut self) -> SessionResult<()> {
        self.reply(token::READY_DOWNLOAD).await?;
        self.set_state(SessionState::Downloading(DownloadStep::AwaitingFilename));

        let Some(name) = self.read_filename(token::FILENAME_ERROR).await? else {
            return Ok(());
        };
        let source = match resolve_existing_file(&self.ctx.root, &name) {
            Ok(path) => SourceFile::open(&path).await,
            Err(e) => Err(e),
        };
        let source = match source {
            Ok(s) => s,
            Err(e) => {
                info!("Client {}: {} does not exist, aborting download", self.id, name);
                self.reply(token::FILENAME_ERROR).await?;
                return Err(e);
            }
        };
        self.reply(token::READY_TO_SEND).await?;

        self.set_state(SessionState::Downloading(DownloadStep::AwaitingReady));
        expect_token(&mut self.stream, token::READY_TO_RECEIVE, self.ctx.io_timeout).await?;

        self.set_state(SessionState::Downloading(DownloadStep::Sending));
        let bytes = source
            .send(&mut self.stream, self.ctx.transfer, None)
            .await?;
        info!("Client {}: sent {} ({} bytes)", self.id, name, bytes);
        self.ctx.logger.transfer_done(&self.id, "download", &name, bytes);
        Ok(())
    }

    async fn delete(&mut self) -> SessionResult<()> {
        self.reply(token::READY_DELETE).await?;
        self.set_state(SessionState::Deleting);

        let Some(name) = self.read_filename(token::DELETE_ERROR).await? else {
            return Ok(());
        };
        let removed = match resolve_existing_file(&self.ctx.root, &name) {
            Ok(path) => tokio::fs::remove_file(&path)
                .await
                .map_err(|e| SessionError::Filesystem(format!("remove {:?}: {}", name, e))),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => {
                self.reply(token::DELETE_SUCCESS).await?;
                info!("Client {}: deleted {}", self.id, name);
                self.ctx.logger.deleted(&self.id, &name);
                Ok(())
            }
            Err(e) => {
                self.reply(token::DELETE_ERROR).await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_io::{read_token, send};
    use crate::listing::Listing;
    use crate::logger::NoopLogger;
    use crate::transfer::{encode_length_header, receive_stream, send_stream};
    use tempfile::TempDir;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    const T: Duration = Duration::from_secs(5);

    fn start(root: &std::path::Path) -> (DuplexStream, JoinHandle<SessionEnd>) {
        let ctx = Arc::new(SessionContext {
            root: root.to_path_buf(),
            transfer: TransferParams {
                window_size: 256,
                io_timeout: T,
            },
            idle_timeout: T,
            io_timeout: T,
            logger: Arc::new(NoopLogger),
        });
        let (client, server) = tokio::io::duplex(8192);
        let handle = tokio::spawn(Session::new("test", server, ctx).run());
        (client, handle)
    }

    async fn command(c: &mut DuplexStream, t: &str) -> String {
        send_token(c, t, T).await.unwrap();
        read_token(c, T).await.unwrap()
    }

    async fn filename(c: &mut DuplexStream, name: &str) -> String {
        write_frame(c, frame::FILENAME, name.as_bytes(), T).await.unwrap();
        read_token(c, T).await.unwrap()
    }

    async fn list(c: &mut DuplexStream) -> Listing {
        let count: usize = command(c, token::LIST).await.parse().unwrap();
        send_token(c, token::FILE_COUNT_RECEIVED, T).await.unwrap();
        let body = read_frame(c, T).await.unwrap();
        assert_eq!(body.kind, frame::LISTING);
        let listing = Listing::decode(&body.text()).unwrap();
        assert_eq!(listing.len(), count);
        listing
    }

    #[test]
    fn test_command_parse_is_exact() {
        assert_eq!(Command::parse("LIST"), Command::List);
        assert_eq!(Command::parse("QUIT"), Command::Quit);
        assert_eq!(Command::parse("list"), Command::Invalid("list".into()));
        assert_eq!(Command::parse("LIST "), Command::Invalid("LIST ".into()));
        assert_eq!(Command::parse("DELETE").token(), "DELETE");
    }

    #[tokio::test]
    async fn test_invalid_then_quit() {
        let tmp = TempDir::new().unwrap();
        let (mut c, handle) = start(tmp.path());
        assert_eq!(command(&mut c, "HELLO").await, token::INVALID_INPUT);
        assert_eq!(command(&mut c, token::QUIT).await, token::DISCONNECTING);
        assert!(matches!(handle.await.unwrap(), SessionEnd::Quit));
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert!(list(&mut c).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_aborts_on_bad_ack_and_session_continues() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"abc").unwrap();
        let (mut c, _handle) = start(tmp.path());

        assert_eq!(command(&mut c, token::LIST).await, "1");
        send_token(&mut c, "whatever", T).await.unwrap();
        // No body follows; the session is back at idle.
        assert_eq!(command(&mut c, "NOPE").await, token::INVALID_INPUT);
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let params = TransferParams {
            window_size: 256,
            io_timeout: T,
        };

        assert_eq!(command(&mut c, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut c, "blob.bin").await, token::READY_FILENAME);
        let mut src: &[u8] = &data;
        send_stream(&mut src, data.len() as u64, &mut c, params, None)
            .await
            .unwrap();

        // The next command is only answered once the upload is committed.
        let listing = list(&mut c).await;
        assert!((listing.get("blob.bin").unwrap().size_kb - 1.0).abs() < 1e-9);
        assert_eq!(std::fs::read(tmp.path().join("blob.bin")).unwrap(), data);

        assert_eq!(command(&mut c, token::DOWNLOAD).await, token::READY_DOWNLOAD);
        assert_eq!(filename(&mut c, "blob.bin").await, token::READY_TO_SEND);
        send_token(&mut c, token::READY_TO_RECEIVE, T).await.unwrap();
        let mut out = Vec::new();
        let outcome = receive_stream(&mut c, &mut out, params, None).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsafe_filename() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut c, "../escape.txt").await, token::FILENAME_ERROR);
        assert_eq!(command(&mut c, "x").await, token::INVALID_INPUT);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_one_name_do_not_mix() {
        let tmp = TempDir::new().unwrap();
        let (mut a, _a_handle) = start(tmp.path());
        let (mut b, b_handle) = start(tmp.path());

        // B is ready to stream before A starts.
        assert_eq!(command(&mut b, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut b, "x.bin").await, token::READY_FILENAME);

        assert_eq!(command(&mut a, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut a, "x.bin").await, token::READY_FILENAME);
        send(&mut a, &encode_length_header(10), T).await.unwrap();
        send(&mut a, b"AAAAAAAAAA", T).await.unwrap();
        assert!(list(&mut a).await.contains("x.bin"));
        assert_eq!(std::fs::read(tmp.path().join("x.bin")).unwrap(), b"AAAAAAAAAA");

        send(&mut b, &encode_length_header(10), T).await.unwrap();
        send(&mut b, b"BBBBB", T).await.unwrap();
        drop(b);

        assert!(matches!(b_handle.await.unwrap(), SessionEnd::Disconnected));
        assert_eq!(std::fs::read(tmp.path().join("x.bin")).unwrap(), b"AAAAAAAAAA");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_upload_withdrawn_by_client() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::UPLOAD).await, token::READY_UPLOAD);
        send_token(&mut c, token::FILENAME_ERROR, T).await.unwrap();
        assert!(list(&mut c).await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_upload_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let (mut c, handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut c, "cut.bin").await, token::READY_FILENAME);
        send(&mut c, &encode_length_header(5000), T).await.unwrap();
        send(&mut c, &[1u8; 700], T).await.unwrap();
        drop(c);

        assert!(matches!(handle.await.unwrap(), SessionEnd::Disconnected));
        assert!(!tmp.path().join("cut.bin").exists());
        assert!(build_listing(tmp.path()).is_empty());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_length_header_ends_session() {
        let tmp = TempDir::new().unwrap();
        let (mut c, handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::UPLOAD).await, token::READY_UPLOAD);
        assert_eq!(filename(&mut c, "bad.bin").await, token::READY_FILENAME);
        let mut header = [0u8; crate::protocol::LENGTH_HEADER_LEN];
        header[..4].copy_from_slice(b"12ab");
        send(&mut c, &header, T).await.unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            SessionEnd::Failed(SessionError::Decode(_))
        ));
        assert!(!tmp.path().join("bad.bin").exists());
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::DOWNLOAD).await, token::READY_DOWNLOAD);
        assert_eq!(filename(&mut c, "ghost.txt").await, token::FILENAME_ERROR);
        assert_eq!(command(&mut c, "?").await, token::INVALID_INPUT);
    }

    #[tokio::test]
    async fn test_download_aborted_by_client() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::DOWNLOAD).await, token::READY_DOWNLOAD);
        assert_eq!(filename(&mut c, "a.txt").await, token::READY_TO_SEND);
        send_token(&mut c, token::RECEIVE_ERROR, T).await.unwrap();
        // No payload was sent; the next reply is for the next command.
        assert_eq!(command(&mut c, "?").await, token::INVALID_INPUT);
    }

    #[tokio::test]
    async fn test_delete_existing_and_missing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("gone.txt"), b"bye").unwrap();
        let (mut c, _handle) = start(tmp.path());

        assert_eq!(command(&mut c, token::DELETE).await, token::READY_DELETE);
        assert_eq!(filename(&mut c, "gone.txt").await, token::DELETE_SUCCESS);
        assert!(!list(&mut c).await.contains("gone.txt"));

        assert_eq!(command(&mut c, token::DELETE).await, token::READY_DELETE);
        assert_eq!(filename(&mut c, "gone.txt").await, token::DELETE_ERROR);
        assert_eq!(command(&mut c, token::QUIT).await, token::DISCONNECTING);
    }

    #[tokio::test]
    async fn test_delete_refuses_directories() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::DELETE).await, token::READY_DELETE);
        assert_eq!(filename(&mut c, "sub").await, token::DELETE_ERROR);
        assert!(tmp.path().join("sub").is_dir());
    }

    #[tokio::test]
    async fn test_filename_step_requires_filename_frame() {
        let tmp = TempDir::new().unwrap();
        let (mut c, _handle) = start(tmp.path());
        assert_eq!(command(&mut c, token::DELETE).await, token::READY_DELETE);
        assert_eq!(command(&mut c, "gone.txt").await, token::DELETE_ERROR);
        assert_eq!(command(&mut c, "?").await, token::INVALID_INPUT);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_session() {
        let tmp = TempDir::new().unwrap();
        let ctx = Arc::new(SessionContext {
            root: tmp.path().to_path_buf(),
            transfer: TransferParams {
                window_size: 256,
                io_timeout: T,
            },
            idle_timeout: Duration::from_millis(50),
            io_timeout: T,
            logger: Arc::new(NoopLogger),
        });
        let (_client, server) = tokio::io::duplex(1024);
        let end = Session::new("idle", server, ctx).run().await;
        assert!(matches!(
            end,
            SessionEnd::Failed(SessionError::Timeout { .. })
        ));
    }
}
