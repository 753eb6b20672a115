//! Length-prefixed JSON framing over async byte streams.
//!
//! Frames follow the LSP base protocol: a `Content-Length` header, a blank
//! line, then exactly that many bytes of JSON. A clean EOF between frames is
//! reported as `Ok(None)` so the connection loop can distinguish a client
//! hangup from a malformed stream.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::rpc::Message;

pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R> MessageReader<R>
where
    R: tokio::io::AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read one framed message. Returns `Ok(None)` on a clean disconnect.
    pub async fn read(&mut self) -> io::Result<Option<Message>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some(value) = header.strip_prefix("Content-Length:") {
                content_length = value.trim().parse::<usize>().ok();
            }
            // Content-Type and any unknown headers are skipped
        }
        let length = content_length
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length"))?;
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        tracing::trace!(bytes = length, "input <= {}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub struct MessageWriter<W> {
    writer: W,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self { writer: inner }
    }

    /// Frame and write one JSON value, flushing before returning.
    pub async fn write(&mut self, payload: &serde_json::Value) -> io::Result<()> {
        let body = serde_json::to_string(payload)?;
        tracing::trace!("output => {}", body);
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await
    }
}
