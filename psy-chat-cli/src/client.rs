use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use psy_chat_shared::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

pub struct BackendClient {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl BackendClient {
    pub fn new(
        ws_url: String,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<ConnectionStatus>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let (status_tx, status_rx) = mpsc::unbounded_channel::<ConnectionStatus>();

        tokio::spawn(async move {
            loop {
                let _ = status_tx.send(ConnectionStatus::Connecting);
                debug!("Attempting to connect to {}", &ws_url);

                match connect_async(&ws_url).await {
                    Ok((ws_stream, _)) => {
                        info!("Connected to {}", &ws_url);
                        let _ = status_tx.send(ConnectionStatus::Connected);

                        let (mut write, mut read) = ws_stream.split();

                        loop {
                            tokio::select! {
                                outgoing = rx.recv() => {
                                    let Some(event) = outgoing else {
                                        debug!("Client dropped, closing connection");
                                        let _ = write.close().await;
                                        return;
                                    };
                                    match serde_json::to_string(&event) {
                                        Ok(json) => {
                                            if let Err(e) = write.send(Message::Text(json)).await {
                                                error!("Failed to send message: {}", e);
                                                break;
                                            }
                                        }
                                        Err(e) => {
                                            error!("Failed to serialize event: {}", e);
                                        }
                                    }
                                }
                                incoming = read.next() => {
                                    match incoming {
                                        Some(Ok(Message::Text(text))) => {
                                            match serde_json::from_str::<ServerEvent>(&text) {
                                                Ok(event) => {
                                                    if event_tx.send(event).is_err() {
                                                        return;
                                                    }
                                                }
                                                Err(e) => {
                                                    error!("Failed to parse event: {}", e);
                                                    error!("Raw text was: {}", text);
                                                }
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) | None => {
                                            warn!("WebSocket connection closed");
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!("WebSocket error: {}", e);
                                            break;
                                        }
                                        Some(Ok(_)) => {}
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to connect: {}", e);
                        let _ = status_tx.send(ConnectionStatus::Error(e.to_string()));
                    }
                }

                let _ = status_tx.send(ConnectionStatus::Disconnected);
                warn!("Reconnecting in 2 seconds...");
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        });

        (Self { tx }, event_rx, status_rx)
    }

    pub fn send_message(&self, text: String) -> Result<()> {
        self.tx.send(ClientEvent::ChatMessage(text))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psy_chat_shared::ChatMessage;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Accepts one connection, answers the first chat message with an echo
    /// and hands the received frame back.
    async fn spawn_echo_server() -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let event: ClientEvent = serde_json::from_str(&text).unwrap();
                    let ClientEvent::ChatMessage(body) = event;
                    let reply = ServerEvent::chat(ChatMessage::you(body));
                    ws.send(Message::Text(serde_json::to_string(&reply).unwrap()))
                        .await
                        .unwrap();
                    let _ = seen_tx.send(text);
                    break;
                }
            }
            // Keep the socket open so the client does not start reconnecting.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        (format!("ws://{}", addr), seen_rx)
    }

    async fn wait_for(status_rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>, wanted: ConnectionStatus) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            while let Some(status) = status_rx.recv().await {
                if status == wanted {
                    return;
                }
            }
        })
        .await
        .expect("status never reached");
    }

    #[tokio::test]
    async fn sends_chat_event_and_yields_broadcast() {
        let (url, seen_rx) = spawn_echo_server().await;
        let (client, mut events, mut status) = BackendClient::new(url);
        wait_for(&mut status, ConnectionStatus::Connected).await;

        client.send_message("Привет".to_string()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::chat(ChatMessage::you("Привет")));

        let frame = seen_rx.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, serde_json::json!({"event": "chat message", "data": "Привет"}));
    }

    #[tokio::test]
    async fn reports_error_when_server_is_down() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_client, _events, mut status) = BackendClient::new(format!("ws://{}", addr));
        let deadline = Duration::from_secs(5);
        let reached_error = tokio::time::timeout(deadline, async {
            while let Some(s) = status.recv().await {
                if matches!(s, ConnectionStatus::Error(_)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(reached_error);
    }
}
