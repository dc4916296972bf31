//! Size-prefixed, windowed byte transfer shared by upload and download.
//!
//! Wire shape: a `LENGTH_HEADER_LEN`-byte window holding the decimal total
//! length `N` (zero padded), then `N` payload bytes sent in consecutive
//! windows. The receiver never asks for more than `min(window, N - received)`
//! bytes, so nothing past the payload is consumed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{SessionError, SessionResult};
use crate::frame_io::{recv, recv_exact, send};
use crate::paths::temp_path_for;
use crate::progress::TransferProgress;
use crate::protocol::LENGTH_HEADER_LEN;

/// Window size and per-window deadline for one transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferParams {
    pub window_size: usize,
    pub io_timeout: Duration,
}

/// How a receive ended. Only `Complete` data is ever committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete { bytes: u64 },
    Incomplete { received: u64, expected: u64 },
}

impl TransferOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferOutcome::Complete { .. })
    }

    pub fn bytes(&self) -> u64 {
        match *self {
            TransferOutcome::Complete { bytes } => bytes,
            TransferOutcome::Incomplete { received, .. } => received,
        }
    }
}

pub fn encode_length_header(len: u64) -> [u8; LENGTH_HEADER_LEN] {
    let mut header = [0u8; LENGTH_HEADER_LEN];
    let digits = len.to_string();
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    header
}

/// Parse the zero-padded decimal header. Anything else is a decode error.
pub fn decode_length_header(window: &[u8]) -> SessionResult<u64> {
    let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
    let (digits, padding) = window.split_at(end);
    if digits.is_empty() {
        return Err(SessionError::decode("empty length header"));
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(SessionError::decode(format!(
            "length header is not a decimal number: {:?}",
            String::from_utf8_lossy(digits)
        )));
    }
    if padding.iter().any(|&b| b != 0) {
        return Err(SessionError::decode("length header padding is not zeroed"));
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| SessionError::decode("length header out of range"))
}

/// Announce `len`, then stream exactly `len` bytes from `src` to `dst`.
pub async fn send_stream<R, W>(
    src: &mut R,
    len: u64,
    dst: &mut W,
    params: TransferParams,
    progress: Option<&TransferProgress>,
) -> SessionResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send(dst, &encode_length_header(len), params.io_timeout).await?;

    let mut buf = vec![0u8; params.window_size];
    let mut sent: u64 = 0;
    while sent < len {
        let want = window_for(len - sent, params.window_size);
        let mut filled = 0;
        while filled < want {
            let n = src.read(&mut buf[filled..want]).await?;
            if n == 0 {
                // The peer is waiting for bytes that will never come.
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} announced bytes", sent, len),
                )));
            }
            filled += n;
        }
        send(dst, &buf[..want], params.io_timeout).await?;
        sent += want as u64;
        if let Some(p) = progress {
            p.inc(want as u64);
        }
    }
    debug!("sent {} byte(s)", sent);
    Ok(sent)
}

/// Read the length header, then copy exactly that many bytes into `dst`,
/// one window per write.
pub async fn receive_stream<R, W>(
    src: &mut R,
    dst: &mut W,
    params: TransferParams,
    progress: Option<&TransferProgress>,
) -> SessionResult<TransferOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; LENGTH_HEADER_LEN];
    recv_exact(src, &mut header, params.io_timeout).await?;
    let expected = decode_length_header(&header)?;
    if let Some(p) = progress {
        p.set_length(expected);
    }

    let mut buf = vec![0u8; params.window_size];
    let mut received: u64 = 0;
    while received < expected {
        let want = window_for(expected - received, params.window_size);
        let (filled, eof) = fill_window(src, &mut buf[..want], params.io_timeout).await?;
        if filled > 0 {
            dst.write_all(&buf[..filled]).await?;
            received += filled as u64;
            if let Some(p) = progress {
                p.inc(filled as u64);
            }
        }
        if eof {
            dst.flush().await?;
            warn!("stream ended after {} of {} byte(s)", received, expected);
            return Ok(TransferOutcome::Incomplete { received, expected });
        }
    }
    dst.flush().await?;
    Ok(TransferOutcome::Complete { bytes: received })
}

fn window_for(remaining: u64, window_size: usize) -> usize {
    remaining.min(window_size as u64) as usize
}

/// Accumulate partial reads until `buf` is full or the peer closes.
async fn fill_window<R>(src: &mut R, buf: &mut [u8], deadline: Duration) -> SessionResult<(usize, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match recv(src, &mut buf[filled..], deadline).await {
            Ok(n) => filled += n,
            Err(SessionError::EndOfStream) => return Ok((filled, true)),
            Err(e) => return Err(e),
        }
    }
    Ok((filled, false))
}

/// A file opened for sending, with its length fixed at open time.
#[derive(Debug)]
pub struct SourceFile {
    file: File,
    len: u64,
    path: PathBuf,
}

impl SourceFile {
    pub async fn open(path: &Path) -> SessionResult<Self> {
        let file = File::open(path)
            .await
            .map_err(|e| SessionError::Filesystem(format!("open {}: {}", path.display(), e)))?;
        let md = file
            .metadata()
            .await
            .map_err(|e| SessionError::Filesystem(format!("stat {}: {}", path.display(), e)))?;
        if !md.is_file() {
            return Err(SessionError::Filesystem(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            file,
            len: md.len(),
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn send<W>(
        mut self,
        dst: &mut W,
        params: TransferParams,
        progress: Option<&TransferProgress>,
    ) -> SessionResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        debug!("sending {} ({} bytes)", self.path.display(), self.len);
        send_stream(&mut self.file, self.len, dst, params, progress).await
    }
}

/// Destination of a receive. Data lands in a hidden temp sibling and is
/// renamed onto the final path only when the transfer completes.
#[derive(Debug)]
pub struct PendingFile {
    file: Option<File>,
    temp: PathBuf,
    dest: PathBuf,
}

impl PendingFile {
    pub async fn create(dest: &Path) -> SessionResult<Self> {
        if dest.is_dir() {
            return Err(SessionError::Filesystem(format!(
                "{} is a directory",
                dest.display()
            )));
        }
        let temp = temp_path_for(dest);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await
            .map_err(|e| SessionError::Filesystem(format!("create {}: {}", temp.display(), e)))?;
        Ok(Self {
            file: Some(file),
            temp,
            dest: dest.to_path_buf(),
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Receive into the temp file and commit on completion. An incomplete or
    /// failed transfer leaves no file behind.
    pub async fn receive<R>(
        mut self,
        src: &mut R,
        params: TransferParams,
        progress: Option<&TransferProgress>,
    ) -> SessionResult<TransferOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let Some(mut file) = self.file.take() else {
            return Err(SessionError::Filesystem("pending file already consumed".into()));
        };
        let outcome = receive_stream(src, &mut file, params, progress).await?;
        if !outcome.is_complete() {
            return Ok(outcome);
        }
        file.sync_all()
            .await
            .map_err(|e| SessionError::Filesystem(format!("sync {}: {}", self.temp.display(), e)))?;
        drop(file);
        tokio::fs::rename(&self.temp, &self.dest).await.map_err(|e| {
            SessionError::Filesystem(format!(
                "commit {} -> {}: {}",
                self.temp.display(),
                self.dest.display(),
                e
            ))
        })?;
        // Nothing left to clean up.
        self.temp = PathBuf::new();
        Ok(outcome)
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        self.file.take();
        if !self.temp.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
