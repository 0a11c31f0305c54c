mod config;
mod error;
mod llm;
mod relay;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use psy_chat_shared::ClientEvent;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use llm::YandexGpt;
use relay::{ConnectionRegistry, Relay};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();

    let provider = YandexGpt::from_config(&config);
    if provider.is_configured() {
        info!("Yandex GPT credentials loaded");
    } else {
        warn!("YANDEX_API_KEY or YANDEX_FOLDER_ID is not configured; AI replies will fail until .env is filled in");
    }

    let relay = Relay::new(ConnectionRegistry::new(), Arc::new(provider));
    let app = router(relay, &config.static_dir);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(relay: Arc<Relay>, static_dir: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

async fn health() -> &'static str {
    "OK"
}

async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (registration, mut outbound) = relay.registry().register();
    let id = registration.id();
    info!(connection = id, online = relay.registry().len(), "A user connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(connection = id, "Failed to serialize event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(frame)).await {
                warn!(connection = id, "Failed to send event: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::ChatMessage(raw_text)) => {
                    // The reply task runs on after its handle is dropped.
                    drop(relay.on_chat_message(id, raw_text));
                }
                Err(e) => {
                    warn!(connection = id, "Ignoring unrecognised frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection = id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    drop(registration);
    writer.abort();
    info!(connection = id, "user disconnected");
}
