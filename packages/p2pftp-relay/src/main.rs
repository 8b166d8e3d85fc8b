//! p2pftp rendezvous server
//!
//! A trivial signaling relay (spec §6): assigns each connecting client an
//! opaque 8-character token, matches two peers by token, and forwards
//! opaque SDP offer/answer and ICE candidate blobs between them. The relay
//! never inspects file contents or chat plaintext — those flow end-to-end
//! once the two peers establish their own data channels; this process only
//! exists to get them introduced.

mod handler;
mod protocol;
mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

#[derive(Parser, Debug)]
#[command(name = "p2pftp-relay", version, about = "p2pftp rendezvous server")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "p2pftp_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let state = RelayState::new(RelayConfig { port: args.port });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!(addr = addr.as_str(), "p2pftp rendezvous server starting");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app).await.expect("server error");
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "p2pftp-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "online_clients": state.online_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_port() {
        assert_eq!(RelayConfig::default().port, 8080);
    }

    #[tokio::test]
    async fn test_state_starts_empty() {
        let state = RelayState::new(RelayConfig::default());
        assert_eq!(state.online_count(), 0);
    }
}
