//! Client half of every exchange.
//!
//! `Client` owns one connection for its whole life. Each method runs one
//! command's handshake to completion and returns a typed outcome whose
//! `Display` is the line shown to the user.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{SessionError, SessionResult};
use crate::frame_io::{expect_token, read_frame, read_token, send_token, write_frame};
use crate::listing::Listing;
use crate::paths::validate_filename;
use crate::progress::TransferProgress;
use crate::protocol::{frame, timeouts, token};
use crate::transfer::{PendingFile, SourceFile, TransferOutcome};

/// Single-character command selector typed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    List,
    Upload,
    Download,
    Delete,
    Help,
    Quit,
}

impl Selector {
    /// `L U D X V Q`, either case, surrounding whitespace ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let mut chars = input.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c.to_ascii_uppercase() {
            'L' => Some(Selector::List),
            'U' => Some(Selector::Upload),
            'D' => Some(Selector::Download),
            'X' => Some(Selector::Delete),
            'V' => Some(Selector::Help),
            'Q' => Some(Selector::Quit),
            _ => None,
        }
    }

    /// Wire command for this selector; `Help` stays local.
    pub fn command_token(&self) -> Option<&'static str> {
        match self {
            Selector::List => Some(token::LIST),
            Selector::Upload => Some(token::UPLOAD),
            Selector::Download => Some(token::DOWNLOAD),
            Selector::Delete => Some(token::DELETE),
            Selector::Quit => Some(token::QUIT),
            Selector::Help => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { name: String, bytes: u64 },
    Rejected { name: String },
    LocalFileMissing { name: String },
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Uploaded { name, bytes } => {
                write!(f, "Upload done! {} ({} bytes)", name, bytes)
            }
            UploadOutcome::Rejected { name } => {
                write!(f, "Server rejected the filename {:?}. Try again.", name)
            }
            UploadOutcome::LocalFileMissing { name } => {
                write!(f, "File {:?} does not exist locally. Upload aborted.", name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { name: String, bytes: u64 },
    NotFound { name: String },
    Incomplete { name: String, received: u64, expected: u64 },
    LocalError { name: String, reason: String },
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Downloaded { name, bytes } => {
                write!(f, "File received! {} ({} bytes)", name, bytes)
            }
            DownloadOutcome::NotFound { name } => {
                write!(f, "File {:?} does not exist on the server.", name)
            }
            DownloadOutcome::Incomplete {
                name,
                received,
                expected,
            } => write!(
                f,
                "Download of {:?} stopped at {} of {} bytes; nothing was saved.",
                name, received, expected
            ),
            DownloadOutcome::LocalError { name, reason } => {
                write!(f, "Cannot save {:?} locally: {}", name, reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { name: String },
    Failed { name: String },
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteOutcome::Deleted { .. } => write!(f, "File deleted successfully!"),
            DeleteOutcome::Failed { .. } => write!(
                f,
                "There was an error deleting the file. Please try again."
            ),
        }
    }
}

pub struct Client {
    stream: TcpStream,
    config: ClientConfig,
}

impl Client {
    /// Connect and consume the server greeting. A full server answers
    /// `server_busy`, surfaced as `SessionError::ServerBusy`.
    pub async fn connect(config: ClientConfig) -> SessionResult<Self> {
        let addr = config.address();
        let stream = match timeout(
            Duration::from_millis(timeouts::CONNECT_MS),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(SessionError::Timeout {
                    op: "connect",
                    after: Duration::from_millis(timeouts::CONNECT_MS),
                })
            }
        };
        let _ = stream.set_nodelay(true);

        let mut client = Self { stream, config };
        let greeting = read_token(&mut client.stream, client.config.io_timeout()).await?;
        match greeting.as_str() {
            token::WELCOME => {
                debug!("connected to {}", addr);
                Ok(client)
            }
            token::SERVER_BUSY => Err(SessionError::ServerBusy),
            other => Err(SessionError::mismatch(token::WELCOME, other)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn deadline(&self) -> Duration {
        self.config.io_timeout()
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.config.local_dir.join(name)
    }

    async fn command(&mut self, t: &str) -> SessionResult<String> {
        let deadline = self.deadline();
        send_token(&mut self.stream, t, deadline).await?;
        read_token(&mut self.stream, deadline).await
    }

    async fn send_filename(&mut self, name: &str) -> SessionResult<String> {
        let deadline = self.deadline();
        write_frame(&mut self.stream, frame::FILENAME, name.as_bytes(), deadline).await?;
        read_token(&mut self.stream, deadline).await
    }

    /// Send an arbitrary token and return the server's reply text.
    pub async fn send_raw(&mut self, t: &str) -> SessionResult<String> {
        self.command(t).await
    }

    pub async fn list(&mut self) -> SessionResult<Listing> {
        let deadline = self.deadline();
        let count = self.command(token::LIST).await?;
        let count: usize = count
            .parse()
            .map_err(|_| SessionError::decode(format!("bad entry count {:?}", count)))?;
        send_token(&mut self.stream, token::FILE_COUNT_RECEIVED, deadline).await?;

        let body = read_frame(&mut self.stream, deadline).await?;
        if body.kind != frame::LISTING {
            return Err(SessionError::mismatch(
                frame::name(frame::LISTING),
                frame::name(body.kind),
            ));
        }
        let listing = Listing::decode(&body.text())?;
        if listing.len() != count {
            warn!(
                "server announced {} file(s) but listed {}",
                count,
                listing.len()
            );
        }
        Ok(listing)
    }

    pub async fn upload(&mut self, name: &str) -> SessionResult<UploadOutcome> {
        let deadline = self.deadline();
        let reply = self.command(token::UPLOAD).await?;
        if reply != token::READY_UPLOAD {
            return Err(SessionError::mismatch(token::READY_UPLOAD, reply));
        }

        let source = match validate_filename(name) {
            Ok(()) => SourceFile::open(&self.local_path(name)).await,
            Err(e) => Err(e),
        };
        let source = match source {
            Ok(s) => s,
            Err(e) => {
                debug!("withdrawing upload of {}: {}", name, e);
                send_token(&mut self.stream, token::FILENAME_ERROR, deadline).await?;
                return Ok(UploadOutcome::LocalFileMissing {
                    name: name.to_string(),
                });
            }
        };

        let reply = self.send_filename(name).await?;
        match reply.as_str() {
            token::READY_FILENAME => {}
            token::FILENAME_ERROR => {
                return Ok(UploadOutcome::Rejected {
                    name: name.to_string(),
                })
            }
            _ => return Err(SessionError::mismatch(token::READY_FILENAME, reply)),
        }

        let progress = TransferProgress::new(name, source.len(), self.config.progress);
        let params = self.config.transfer_params();
        match source.send(&mut self.stream, params, Some(&progress)).await {
            Ok(bytes) => {
                progress.finish();
                Ok(UploadOutcome::Uploaded {
                    name: name.to_string(),
                    bytes,
                })
            }
            Err(e) => {
                progress.abandon();
                Err(e)
            }
        }
    }

    pub async fn download(&mut self, name: &str) -> SessionResult<DownloadOutcome> {
        let deadline = self.deadline();
        let reply = self.command(token::DOWNLOAD).await?;
        if reply != token::READY_DOWNLOAD {
            return Err(SessionError::mismatch(token::READY_DOWNLOAD, reply));
        }

        if let Err(e) = validate_filename(name) {
            send_token(&mut self.stream, token::FILENAME_ERROR, deadline).await?;
            return Ok(DownloadOutcome::LocalError {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        let reply = self.send_filename(name).await?;
        match reply.as_str() {
            token::READY_TO_SEND => {}
            token::FILENAME_ERROR => {
                return Ok(DownloadOutcome::NotFound {
                    name: name.to_string(),
                })
            }
            _ => return Err(SessionError::mismatch(token::READY_TO_SEND, reply)),
        }

        let pending = match PendingFile::create(&self.local_path(name)).await {
            Ok(p) => p,
            Err(e) => {
                send_token(&mut self.stream, token::RECEIVE_ERROR, deadline).await?;
                return Ok(DownloadOutcome::LocalError {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        send_token(&mut self.stream, token::READY_TO_RECEIVE, deadline).await?;

        let progress = TransferProgress::new(name, 0, self.config.progress);
        let params = self.config.transfer_params();
        let outcome = match pending.receive(&mut self.stream, params, Some(&progress)).await {
            Ok(o) => o,
            Err(e) => {
                progress.abandon();
                return Err(e);
            }
        };
        match outcome {
            TransferOutcome::Complete { bytes } => {
                progress.finish();
                Ok(DownloadOutcome::Downloaded {
                    name: name.to_string(),
                    bytes,
                })
            }
            TransferOutcome::Incomplete { received, expected } => {
                progress.abandon();
                Ok(DownloadOutcome::Incomplete {
                    name: name.to_string(),
                    received,
                    expected,
                })
            }
        }
    }

    pub async fn delete(&mut self, name: &str) -> SessionResult<DeleteOutcome> {
        let reply = self.command(token::DELETE).await?;
        if reply != token::READY_DELETE {
            return Err(SessionError::mismatch(token::READY_DELETE, reply));
        }
        let reply = self.send_filename(name).await?;
        match reply.as_str() {
            token::DELETE_SUCCESS => Ok(DeleteOutcome::Deleted {
                name: name.to_string(),
            }),
            token::DELETE_ERROR => Ok(DeleteOutcome::Failed {
                name: name.to_string(),
            }),
            _ => Err(SessionError::mismatch(token::DELETE_SUCCESS, reply)),
        }
    }

    /// Send QUIT, wait for the farewell and close the connection.
    pub async fn quit(mut self) -> SessionResult<String> {
        let deadline = self.deadline();
        send_token(&mut self.stream, token::QUIT, deadline).await?;
        expect_token(&mut self.stream, token::DISCONNECTING, deadline).await?;
        let _ = self.stream.shutdown().await;
        Ok(token::DISCONNECTING.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse("L"), Some(Selector::List));
        assert_eq!(Selector::parse(" x \n"), Some(Selector::Delete));
        assert_eq!(Selector::parse("v"), Some(Selector::Help));
        assert_eq!(Selector::parse("Q"), Some(Selector::Quit));
        assert_eq!(Selector::parse("Z"), None);
        assert_eq!(Selector::parse("LIST"), None);
        assert_eq!(Selector::parse(""), None);
    }

    #[test]
    fn test_selector_tokens() {
        assert_eq!(Selector::Upload.command_token(), Some(token::UPLOAD));
        assert_eq!(Selector::Delete.command_token(), Some(token::DELETE));
        assert_eq!(Selector::Help.command_token(), None);
    }

    #[tokio::test]
    async fn test_client_list_and_quit_against_scripted_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let t = Duration::from_secs(5);
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            send_token(&mut s, token::WELCOME, t).await.unwrap();
            expect_token(&mut s, token::LIST, t).await.unwrap();
            send_token(&mut s, "1", t).await.unwrap();
            expect_token(&mut s, token::FILE_COUNT_RECEIVED, t).await.unwrap();
            write_frame(&mut s, frame::LISTING, b"lorem.txt (0.2 kb)\n", t)
                .await
                .unwrap();
            expect_token(&mut s, token::QUIT, t).await.unwrap();
            send_token(&mut s, token::DISCONNECTING, t).await.unwrap();
        });

        let config = ClientConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..ClientConfig::default()
        };
        let mut client = Client::connect(config).await.unwrap();
        let listing = client.list().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing.contains("lorem.txt"));
        assert_eq!(client.quit().await.unwrap(), token::DISCONNECTING);
        server.await.unwrap();
    }

    #[test]
    fn test_outcome_lines() {
        let d = DeleteOutcome::Deleted { name: "a".into() };
        assert_eq!(d.to_string(), "File deleted successfully!");
        let n = DownloadOutcome::NotFound { name: "x.txt".into() };
        assert!(n.to_string().contains("does not exist"));
        let u = UploadOutcome::Uploaded {
            name: "lorem.txt".into(),
            bytes: 244,
        };
        assert_eq!(u.to_string(), "Upload done! lorem.txt (244 bytes)");
    }
}
