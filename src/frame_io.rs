//! Frame I/O over an ordered byte stream.
//!
//! The transport has no message boundaries. `send`/`recv` move opaque bytes
//! under a deadline; control tokens travel in length-prefixed frames so a
//! token is never split or merged with its neighbours.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{SessionError, SessionResult};
use crate::protocol::{frame, FRAME_HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};

async fn timed<T, F>(op: &'static str, deadline: Duration, fut: F) -> SessionResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(deadline, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(SessionError::EndOfStream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SessionError::Timeout {
            op,
            after: deadline,
        }),
    }
}

/// Write every byte of `bytes`, or fail.
pub async fn send<W>(stream: &mut W, bytes: &[u8], deadline: Duration) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    timed("write", deadline, async {
        stream.write_all(bytes).await?;
        stream.flush().await
    })
    .await
}

/// Read between 1 and `buf.len()` bytes. A zero-length read is `EndOfStream`.
pub async fn recv<R>(stream: &mut R, buf: &mut [u8], deadline: Duration) -> SessionResult<usize>
where
    R: AsyncRead + Unpin,
{
    if buf.is_empty() {
        return Ok(0);
    }
    let n = timed("read", deadline, stream.read(buf)).await?;
    if n == 0 {
        return Err(SessionError::EndOfStream);
    }
    Ok(n)
}

/// Loop `recv` until `buf` is full.
pub async fn recv_exact<R>(stream: &mut R, buf: &mut [u8], deadline: Duration) -> SessionResult<()>
where
    R: AsyncRead + Unpin,
{
    timed("read", deadline, stream.read_exact(buf)).await?;
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> SessionResult<(u8, u32)> {
    if &header[0..4] != MAGIC {
        return Err(SessionError::decode("invalid magic in frame header"));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(SessionError::decode(format!(
            "protocol version mismatch: got {}, expected {}",
            version, VERSION
        )));
    }

    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
    if payload_len as usize > MAX_FRAME_SIZE {
        return Err(SessionError::decode(format!(
            "frame too large: {} bytes (max: {} bytes)",
            payload_len, MAX_FRAME_SIZE
        )));
    }

    Ok((frame_type, payload_len))
}

/// One control frame as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload as text. Invalid UTF-8 is replaced rather than rejected so it
    /// simply fails to match any token.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub async fn write_frame<W>(
    stream: &mut W,
    frame_type: u8,
    payload: &[u8],
    deadline: Duration,
) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(SessionError::decode(format!(
            "frame payload too large: {} bytes (max: {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    let header = build_frame_header(frame_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    send(stream, &buf, deadline).await
}

pub async fn read_frame<R>(stream: &mut R, deadline: Duration) -> SessionResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    recv_exact(stream, &mut header, deadline).await?;
    let (kind, len) = parse_frame_header(&header)?;
    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        recv_exact(stream, &mut payload, deadline).await?;
    }
    Ok(Frame { kind, payload })
}

pub async fn send_token<W>(stream: &mut W, token: &str, deadline: Duration) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(stream, frame::TOKEN, token.as_bytes(), deadline).await
}

/// Read the next frame and require it to be a TOKEN frame.
pub async fn read_token<R>(stream: &mut R, deadline: Duration) -> SessionResult<String>
where
    R: AsyncRead + Unpin,
{
    let f = read_frame(stream, deadline).await?;
    if f.kind != frame::TOKEN {
        return Err(SessionError::mismatch(
            frame::name(frame::TOKEN),
            frame::name(f.kind),
        ));
    }
    Ok(f.text())
}

/// Read a token and compare it byte-for-byte with `expected`.
pub async fn expect_token<R>(stream: &mut R, expected: &str, deadline: Duration) -> SessionResult<()>
where
    R: AsyncRead + Unpin,
{
    let got = read_token(stream, deadline).await?;
    if got != expected {
        return Err(SessionError::mismatch(expected, got));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::token;

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn test_frame_header_round_trip() {
        let header = build_frame_header(frame::LISTING, 12345);
        let (t, len) = parse_frame_header(&header).unwrap();
        assert_eq!(t, frame::LISTING);
        assert_eq!(len, 12345);
    }

    #[test]
    fn test_frame_header_rejects_bad_magic_and_version() {
        let mut header = build_frame_header(frame::TOKEN, 4);
        header[0] = b'X';
        assert!(matches!(
            parse_frame_header(&header),
            Err(SessionError::Decode(_))
        ));

        let mut header = build_frame_header(frame::TOKEN, 4);
        header[4..6].copy_from_slice(&99u16.to_le_bytes());
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn test_frame_header_rejects_oversize() {
        let header = build_frame_header(frame::LISTING, (MAX_FRAME_SIZE + 1) as u32);
        assert!(parse_frame_header(&header).is_err());
    }

    #[tokio::test]
    async fn test_tokens_keep_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(64);
        send_token(&mut a, token::UPLOAD, T).await.unwrap();
        write_frame(&mut a, frame::FILENAME, b"lorem.txt", T).await.unwrap();
        send_token(&mut a, "", T).await.unwrap();

        assert_eq!(read_token(&mut b, T).await.unwrap(), token::UPLOAD);
        let f = read_frame(&mut b, T).await.unwrap();
        assert_eq!(f.kind, frame::FILENAME);
        assert_eq!(f.text(), "lorem.txt");
        assert_eq!(read_token(&mut b, T).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_expect_token_is_exact() {
        let (mut a, mut b) = tokio::io::duplex(64);
        send_token(&mut a, "ready_to_receive ", T).await.unwrap();
        let err = expect_token(&mut b, token::READY_TO_RECEIVE, T)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_read_token_rejects_other_frame_types() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, frame::LISTING, b"x (0.0 kb)\n", T)
            .await
            .unwrap();
        let err = read_token(&mut b, T).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_closed_peer_is_end_of_stream() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b, T).await.unwrap_err();
        assert!(matches!(err, SessionError::EndOfStream));

        let mut buf = [0u8; 8];
        let err = recv(&mut b, &mut buf, T).await.unwrap_err();
        assert!(matches!(err, SessionError::EndOfStream));
    }

    #[tokio::test]
    async fn test_recv_times_out() {
        let (_a, mut b) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let err = recv(&mut b, &mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_end_of_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let header = build_frame_header(frame::TOKEN, 10);
        send(&mut a, &header, T).await.unwrap();
        send(&mut a, b"LIS", T).await.unwrap();
        drop(a);
        let err = read_frame(&mut b, T).await.unwrap_err();
        assert!(matches!(err, SessionError::EndOfStream));
    }
}
