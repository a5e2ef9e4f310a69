//! Persistent WebSocket connection to the worker's event stream.

use super::normalize::{normalize_binary, normalize_text};
use super::{BridgeShared, ConnectionState, ReconnectBackoff};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifier sent in the `hello` message after connecting.
pub const HELLO_FROM: &str = "eve-core";

/// Why a connection ended.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("closed by worker")]
    Closed,

    #[error("read failed: {0}")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("no pong since the previous heartbeat")]
    HeartbeatTimeout,
}

#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub url: String,
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
    pub backoff: ReconnectBackoff,
}

/// Connect, read until the connection drops, back off, repeat. Returns only
/// when `cancel` fires.
pub(crate) async fn run_stream(shared: Arc<BridgeShared>, settings: StreamSettings, cancel: CancellationToken) {
    let mut backoff = settings.backoff.clone();
    loop {
        shared.set_connection(ConnectionState::Connecting);
        let result = connect_once(&shared, &settings, &cancel, &mut backoff).await;
        shared.set_connection(ConnectionState::Disconnected);

        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = result {
            tracing::debug!(url = %settings.url, error = %e, "status stream disconnected");
        }

        let delay = backoff.next_delay();
        tracing::info!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "status stream reconnect scheduled"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!("status stream stopped");
}

async fn connect_once(
    shared: &BridgeShared,
    settings: &StreamSettings,
    cancel: &CancellationToken,
    backoff: &mut ReconnectBackoff,
) -> Result<(), StreamError> {
    let connect = tokio::time::timeout(settings.connect_timeout, connect_async(settings.url.as_str()));
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = connect => match result {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => return Err(StreamError::Connect(e)),
            Err(_) => return Err(StreamError::ConnectTimeout),
        },
    };
    let (mut write, mut read) = ws_stream.split();

    backoff.reset();
    shared.set_connection(ConnectionState::Connected);
    tracing::info!(url = %settings.url, "status stream connected");

    let hello = serde_json::json!({ "type": "hello", "from": HELLO_FROM });
    write
        .send(Message::Text(hello.to_string()))
        .await
        .map_err(StreamError::Send)?;

    let mut heartbeat = tokio::time::interval(settings.heartbeat);
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "app-exit".into(),
                };
                let close = write.send(Message::Close(Some(frame)));
                if tokio::time::timeout(CLOSE_SEND_TIMEOUT, close).await.is_err() {
                    tracing::debug!("close frame not sent in time");
                }
                return Ok(());
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.handle_frame(normalize_text(&text)),
                Some(Ok(Message::Binary(bytes))) => shared.handle_frame(normalize_binary(&bytes)),
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Close(_))) | None => return Err(StreamError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::Read(e)),
            },
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    return Err(StreamError::HeartbeatTimeout);
                }
                awaiting_pong = true;
                write
                    .send(Message::Ping(Vec::new()))
                    .await
                    .map_err(StreamError::Send)?;
            }
        }
    }
}
