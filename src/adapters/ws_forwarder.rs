//! WebSocket forwarding.
//!
//! Upgrades the client side with axum, dials the selected target over
//! `ws://` and relays frames in both directions until either side closes or
//! the idle timeout elapses with no traffic.
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as UpstreamMessage};

/// Translate an http(s)/ws(s) target URL plus request path into the dial URL.
pub fn dial_url(target: &str, path: &str, query: Option<&str>) -> String {
    let base = if let Some(rest) = target.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = target.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if target.starts_with("ws://") || target.starts_with("wss://") {
        target.to_string()
    } else {
        format!("ws://{target}")
    };

    let joined = crate::adapters::http_handler::single_joining_slash(&base, path);
    match query {
        Some(q) if !q.is_empty() => format!("{joined}?{q}"),
        _ => joined,
    }
}

/// Accept the client upgrade and spawn the relay.
pub fn upgrade_and_relay(
    ws: WebSocketUpgrade,
    target_url: String,
    idle_timeout: Duration,
) -> Response {
    ws.on_upgrade(move |client| async move {
        relay(client, target_url, idle_timeout).await;
    })
}

async fn relay(client: WebSocket, target_url: String, idle_timeout: Duration) {
    tracing::info!(target = %target_url, "websocket upgrade accepted, dialing backend");

    let (backend, _response) = match connect_async(target_url.as_str()).await {
        Ok(connected) => connected,
        Err(err) => {
            tracing::error!(target = %target_url, error = %err, "backend websocket dial failed");
            return;
        }
    };

    let (mut backend_sink, mut backend_stream) = backend.split();
    let (mut client_sink, mut client_stream) = client.split();

    let client_to_backend = async {
        loop {
            let frame = tokio::time::timeout(idle_timeout, client_stream.next()).await;
            match frame {
                Ok(Some(Ok(msg))) => {
                    let upstream = client_to_upstream(msg);
                    if backend_sink.send(upstream).await.is_err() {
                        break;
                    }
                }
                Ok(_) => break,
                Err(_) => {
                    tracing::info!(target = %target_url, "websocket idle timeout (client side)");
                    break;
                }
            }
        }
    };

    let backend_to_client = async {
        loop {
            let frame = tokio::time::timeout(idle_timeout, backend_stream.next()).await;
            match frame {
                Ok(Some(Ok(msg))) => {
                    let downstream = match upstream_to_client(msg) {
                        Some(m) => m,
                        None => continue,
                    };
                    if client_sink.send(downstream).await.is_err() {
                        break;
                    }
                }
                Ok(_) => break,
                Err(_) => {
                    tracing::info!(target = %target_url, "websocket idle timeout (backend side)");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_backend => {}
        _ = backend_to_client => {}
    }
    tracing::info!(target = %target_url, "websocket relay closed");
}

fn client_to_upstream(msg: Message) -> UpstreamMessage {
    match msg {
        Message::Text(t) => UpstreamMessage::Text(t.to_string().into()),
        Message::Binary(b) => UpstreamMessage::Binary(b.into()),
        Message::Ping(p) => UpstreamMessage::Ping(p.into()),
        Message::Pong(p) => UpstreamMessage::Pong(p.into()),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| {
            tungstenite::protocol::CloseFrame {
                code: f.code.into(),
                reason: f.reason.to_string().into(),
            }
        })),
    }
}

fn upstream_to_client(msg: UpstreamMessage) -> Option<Message> {
    match msg {
        UpstreamMessage::Text(t) => Some(Message::Text(t.to_string().into())),
        UpstreamMessage::Binary(b) => Some(Message::Binary(b.into())),
        UpstreamMessage::Ping(p) => Some(Message::Ping(p.into())),
        UpstreamMessage::Pong(p) => Some(Message::Pong(p.into())),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        }))),
        // Raw frames never surface from a completed read.
        UpstreamMessage::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_url_rewrites_schemes() {
        assert_eq!(
            dial_url("http://127.0.0.1:8085", "/ws/chat", None),
            "ws://127.0.0.1:8085/ws/chat"
        );
        assert_eq!(
            dial_url("https://backend:443", "/ws", None),
            "wss://backend:443/ws"
        );
        assert_eq!(
            dial_url("ws://backend:8085/base", "/chat", Some("room=1")),
            "ws://backend:8085/base/chat?room=1"
        );
        assert_eq!(
            dial_url("backend:8085", "/chat", None),
            "ws://backend:8085/chat"
        );
    }
}
