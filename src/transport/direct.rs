// MIT License - Copyright (c) 2026 Peter Wright
// Plain TCP transport to the hub and the reader task that feeds the session

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info};

use crate::config::HubConfig;
use crate::error::{DoozError, Result};
use crate::event::{EventSender, HubEvent};
use crate::transport::framer::MessageBuffer;
use crate::transport::session::RpcSession;

/// An open byte stream to the hub with its session and reader task.
pub struct DirectTransport {
    session: Arc<RpcSession>,
    event_tx: EventSender,
    reader_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DirectTransport {
    /// Open a TCP connection to the hub.
    pub async fn connect(config: &HubConfig, event_tx: EventSender) -> Result<Self> {
        let addr = config.socket_addr();
        info!("Connecting to hub at {}", addr);

        let stream = timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| DoozError::ConnectionTimeout)?
        .map_err(|e| {
            error!("TCP connect failed: {}", e);
            DoozError::Io(e)
        })?;
        stream.set_nodelay(true)?;
        debug!("TCP socket connected");

        Ok(Self::from_stream(stream, request_timeout(config), event_tx))
    }

    /// Run a session over an already-open stream.
    pub fn from_stream<S>(stream: S, request_timeout: Option<Duration>, event_tx: EventSender) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let session = Arc::new(RpcSession::new(writer, request_timeout, event_tx.clone()));
        let reader_handle = spawn_reader_task(reader, session.clone(), event_tx.clone());
        let _ = event_tx.send(HubEvent::Connected);

        Self {
            session,
            event_tx,
            reader_handle: Some(reader_handle),
        }
    }

    pub fn session(&self) -> &Arc<RpcSession> {
        &self.session
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Close the transport. Pending requests fail with `Disconnected`.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from hub");
        let was_connected = self.session.is_connected().await;
        self.session.disconnect().await?;
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        if was_connected {
            let _ = self.event_tx.send(HubEvent::Disconnected);
        }
        Ok(())
    }
}

impl Drop for DirectTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

pub(crate) fn request_timeout(config: &HubConfig) -> Option<Duration> {
    (config.request_timeout_ms > 0).then(|| Duration::from_millis(config.request_timeout_ms))
}

/// Spawn the reader task that turns incoming bytes into session input.
fn spawn_reader_task<R>(
    mut reader: R,
    session: Arc<RpcSession>,
    event_tx: EventSender,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let mut undecoded = Vec::new();
        let mut framer = MessageBuffer::new();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Reader: connection closed");
                    break;
                }
                Ok(n) => {
                    undecoded.extend_from_slice(&buf[..n]);
                    framer.push_str(&take_utf8(&mut undecoded));
                    for message in framer.messages() {
                        session.handle_text(&message).await;
                    }
                }
                Err(e) => {
                    error!("Reader: read error: {}", e);
                    break;
                }
            }
        }

        if !framer.is_empty() {
            debug!("Discarding {} unframed bytes", framer.len());
        }
        session.mark_disconnected().await;
        let _ = event_tx.send(HubEvent::Disconnected);
    })
}

/// Decode as much of `bytes` as forms complete UTF-8, leaving a trailing
/// partial character in place for the next read. Invalid sequences become
/// U+FFFD.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                bytes.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        bytes.drain(..valid + len);
                    }
                    None => {
                        bytes.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}
