//! Session channel: the single WebSocket connection to the game backend.
//!
//! ## Design
//! - [`SessionChannel::open`] returns immediately; a background task connects
//!   to `{server}/ws/{loc}` and then multiplexes inbound frames and queued
//!   outbound messages with `tokio::select!`.
//! - Outbound messages go through an unbounded queue, so anything sent before
//!   the handshake completes is delivered once it does.
//! - Inbound frames are decoded in receipt order and forwarded to the one
//!   [`ChannelEvents`] receiver handed out by `open`. Frames that fail to
//!   decode are logged and dropped.
//! - The connection ending for any reason other than a local `close` yields a
//!   single [`ChannelEvent::Disconnected`]. There is no reconnect.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::GameError;
use crate::protocol::{InboundMessage, OutboundMessage, Role};

/// Something the connection observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(InboundMessage),
    Disconnected { reason: String },
}

/// Receiving half of the channel; exactly one exists per connection.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Endpoint URL for `role` under `server_url`.
pub fn endpoint(server_url: &str, role: Role) -> String {
    format!("{}/ws/{}", server_url.trim_end_matches('/'), role.as_loc())
}

/// Handle to the connection. Dropping it closes the connection.
pub struct SessionChannel {
    role: Role,
    url: String,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    /// Dropped on close; wakes a connect that is still in progress.
    closing: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionChannel {
    /// Start connecting to the endpoint for `role`. Must be called inside a
    /// Tokio runtime.
    pub fn open(server_url: &str, role: Role) -> (SessionChannel, ChannelEvents) {
        let url = endpoint(server_url, role);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (closing_tx, closing_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(url.clone(), out_rx, closing_rx, event_tx));

        let channel = SessionChannel {
            role,
            url,
            outbound: Some(out_tx),
            closing: Some(closing_tx),
            task: Some(task),
        };
        (channel, event_rx)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.outbound
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }

    /// Queue `msg` for transmission. Never blocks and never fails; after the
    /// connection is gone the message is dropped with a debug log.
    pub fn send(&self, msg: OutboundMessage) {
        match &self.outbound {
            Some(tx) => {
                if let Err(rejected) = tx.send(msg) {
                    debug!(url = %self.url, msg = ?rejected.0, "connection gone, message dropped");
                }
            }
            None => debug!(url = %self.url, msg = ?msg, "channel closed, message dropped"),
        }
    }

    /// Release the connection. Messages already queued are still flushed
    /// before the close frame; a connect still in progress is abandoned.
    /// Calling this more than once has no further effect.
    pub fn close(&mut self) {
        self.closing.take();
        if self.outbound.take().is_some() {
            info!(url = %self.url, "closing session channel");
        }
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    closing: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(url.as_str()) => res,
        // Resolves once the handle drops its sender.
        _ = closing => {
            info!(url = %url, "session channel closed before connecting");
            return;
        }
    };
    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            let err = GameError::Channel(format!("connect to {url} failed: {e}"));
            error!(kind = err.kind(), error = %err, "session channel unavailable");
            let _ = events.send(ChannelEvent::Disconnected {
                reason: err.to_string(),
            });
            return;
        }
    };
    info!(url = %url, "session channel connected");

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            biased;

            // Queued outbound message, or the local side closing.
            out = outbound.recv() => {
                match out {
                    Some(msg) => {
                        let text = match msg.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "could not encode outbound message");
                                continue;
                            }
                        };
                        debug!(frame = %text, "send");
                        if let Err(e) = ws_sink.send(WsMessage::Text(text)).await {
                            break Some(format!("send failed: {e}"));
                        }
                    }
                    None => {
                        // Sends the close frame.
                        let _ = ws_sink.close().await;
                        break None;
                    }
                }
            }

            // Frame from the backend.
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match InboundMessage::decode(&text) {
                        Ok(msg) => {
                            debug!(kind = msg.wire_type(), "recv");
                            if events.send(ChannelEvent::Message(msg)).is_err() {
                                // Nobody is listening any more.
                                break None;
                            }
                        }
                        Err(e) => {
                            warn!(kind = e.kind(), error = %e, frame = %text, "dropping inbound frame");
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        break Some(match frame {
                            Some(f) => format!("closed by server: {} {}", f.code, f.reason),
                            None => "closed by server".to_string(),
                        });
                    }
                    Some(Ok(_)) => {} // binary, ping, pong
                    Some(Err(e)) => break Some(format!("connection error: {e}")),
                    None => break Some("connection closed".to_string()),
                }
            }
        }
    };

    match reason {
        Some(reason) => {
            error!(url = %url, reason = %reason, "session channel disconnected");
            let _ = events.send(ChannelEvent::Disconnected { reason });
        }
        None => info!(url = %url, "session channel closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_per_role() {
        assert_eq!(
            endpoint("ws://127.0.0.1:5000", Role::Asker),
            "ws://127.0.0.1:5000/ws/outside"
        );
        assert_eq!(
            endpoint("ws://127.0.0.1:5000/", Role::Chooser),
            "ws://127.0.0.1:5000/ws/inside"
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        // Nothing listens on port 9 of the loopback; the connect fails quietly.
        let (mut channel, _events) = SessionChannel::open("ws://127.0.0.1:9", Role::Asker);
        channel.close();
        assert!(channel.is_closed());
        channel.close();
        assert!(channel.is_closed());
        channel.send(OutboundMessage::ResetGame);
        channel.shutdown().await;
    }
}
