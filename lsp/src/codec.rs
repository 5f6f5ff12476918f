//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed [`Message`]s.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::message::{DecodeError, Message};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Failure to read one frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Header block is unusable; the stream position can no longer be trusted.
    #[error("framing error: {0}")]
    Framing(String),
    /// The body was read in full but is not a JSON-RPC message.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the reader may continue with the next frame.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Serialize a message into one complete frame, header included.
pub fn encode(msg: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let body = msg.to_vec()?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then decodes the body as a [`Message`].
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read and decode the next frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    pub async fn read_message(&mut self) -> Result<Option<Message>, FrameError> {
        let Some(body) = self.read_frame().await? else {
            return Ok(None);
        };
        Ok(Some(Message::from_slice(&body)?))
    }

    /// Read the next raw frame body.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None), // EOF
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(FrameError::Framing(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF is clean only before the first header byte.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FrameError::Framing(
                    "unexpected EOF while reading headers".to_string(),
                ));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    FrameError::Framing(format!("invalid Content-Length value {value:?}: {e}"))
                })?;
                content_length = Some(len);
            }
            // Other headers (e.g. Content-Type) are ignored.
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FrameError::Framing("missing Content-Length header".to_string())),
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one message with its `Content-Length` header and flush.
    pub async fn write_message(&mut self, msg: &Message) -> std::io::Result<()> {
        let frame = encode(msg).map_err(std::io::Error::other)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }
}
