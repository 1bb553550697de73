use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::resp::{decode, DecodeError, Resp};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pulls exactly one RESP frame at a time off an async byte source,
/// preserving message boundaries across short reads. Owns an internal
/// accumulation buffer so callers never see a partial frame.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Reads one full RESP value, blocking (yielding) until it is
    /// complete or the connection closes.
    pub async fn read_frame(&mut self) -> Result<Resp, FrameError> {
        loop {
            if let Some((value, consumed)) = decode(&self.buf)? {
                let _ = self.buf.split_to(consumed);
                return Ok(value);
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::ConnectionClosed);
                }
                return Err(FrameError::Protocol(DecodeError::MissingTerminator));
            }
        }
    }

    /// Same as [`Self::read_frame`] but also reports how many wire bytes
    /// the frame took up, for replica-side offset accounting.
    pub async fn read_frame_len(&mut self) -> Result<(Resp, usize), FrameError> {
        loop {
            if let Some((value, consumed)) = decode(&self.buf)? {
                let _ = self.buf.split_to(consumed);
                return Ok((value, consumed));
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::ConnectionClosed);
                }
                return Err(FrameError::Protocol(DecodeError::MissingTerminator));
            }
        }
    }

    /// Reads a command: an array of bulk strings. Returns the command
    /// name and argument bytes, unpacked for the caller's convenience.
    pub async fn read_command(&mut self) -> Result<Vec<bytes::Bytes>, FrameError> {
        match self.read_frame().await? {
            Resp::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Resp::Bulk(b) => parts.push(b),
                        other => parts.push(bytes::Bytes::from(other.to_string())),
                    }
                }
                Ok(parts)
            }
            _other => Err(FrameError::Protocol(DecodeError::MalformedLength(
                "expected array of bulk strings",
            ))),
        }
    }

    /// Reads a length-prefixed binary blob with no trailing CRLF, as used
    /// for the RDB payload that follows `+FULLRESYNC`.
    pub async fn read_raw_bulk(&mut self) -> Result<Vec<u8>, FrameError> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = std::str::from_utf8(&self.buf[..pos])
                    .map_err(|_| DecodeError::MalformedLength("rdb header"))?;
                if !line.starts_with('$') {
                    return Err(FrameError::Protocol(DecodeError::MalformedLength(
                        "expected bulk length header",
                    )));
                }
                let len: usize = line[1..]
                    .parse()
                    .map_err(|_| DecodeError::MalformedLength("rdb length"))?;
                let header_len = pos + 2;
                loop {
                    if self.buf.len() >= header_len + len {
                        let _ = self.buf.split_to(header_len);
                        let payload = self.buf.split_to(len);
                        return Ok(payload.to_vec());
                    }
                    let n = self.inner.read_buf(&mut self.buf).await?;
                    if n == 0 {
                        return Err(FrameError::ConnectionClosed);
                    }
                }
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(FrameError::ConnectionClosed);
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::resp::{command_array, encode};

    #[tokio::test]
    async fn reads_one_command_at_a_time_across_short_reads() {
        let frame = encode(&command_array(["SET", "k", "v"]));
        let cursor = std::io::Cursor::new(frame.to_vec());
        let mut reader = FrameReader::new(cursor);
        let parts = reader.read_command().await.unwrap();
        assert_eq!(parts[0].as_ref(), b"SET");
        assert_eq!(parts[1].as_ref(), b"k");
        assert_eq!(parts[2].as_ref(), b"v");
    }

    #[tokio::test]
    async fn empty_stream_is_connection_closed() {
        let cursor = std::io::Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }
}
