//! Bidirectional WebSocket splice between a client and an upstream node.
//!
//! Frames are copied verbatim in both directions; the proxy never interprets
//! them. The splice ends as soon as either side closes or errors.

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use url::Url;

/// Connects to the upstream target and pumps frames both ways until either
/// side closes.
pub async fn splice(mut client: WebSocket, target: Url, request_id: String) {
    let upstream = match tokio_tungstenite::connect_async(target.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::error!(request_id, error = %e, "upstream websocket connect failed");
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };

    let (mut upstream_sink, mut upstream_stream) = upstream.split();
    let (mut client_sink, mut client_stream) = client.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_stream.next().await {
            if upstream_sink.send(to_upstream(message)).await.is_err() {
                break;
            }
        }
    };
    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_stream.next().await {
            let Some(message) = from_upstream(message) else { continue };
            if client_sink.send(message).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        () = client_to_upstream => {}
        () = upstream_to_client => {}
    }
    tracing::debug!(request_id, "websocket splice finished");
}

fn to_upstream(message: ClientMessage) -> UpstreamMessage {
    match message {
        ClientMessage::Text(text) => UpstreamMessage::Text(text),
        ClientMessage::Binary(data) => UpstreamMessage::Binary(data),
        ClientMessage::Ping(data) => UpstreamMessage::Ping(data),
        ClientMessage::Pong(data) => UpstreamMessage::Pong(data),
        ClientMessage::Close(frame) => UpstreamMessage::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        })),
    }
}

/// Raw frame variants carry protocol internals and are never forwarded.
fn from_upstream(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text)),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| {
            ClientCloseFrame { code: f.code.into(), reason: f.reason }
        }))),
        UpstreamMessage::Frame(_) => None,
    }
}
