use crate::bridge_logic::config::BridgeSettings;
use crate::bridge_logic::session::handle_socket;
use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn router(settings: Arc<BridgeSettings>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(settings)
}

pub async fn run(
    settings: Arc<BridgeSettings>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(settings.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    if let Some((cert_path, key_path)) = &settings.tls {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
        log::info!("Downstream server listening on wss://{}", addr);

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("Downstream server listening on ws://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(settings): State<Arc<BridgeSettings>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, settings))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}
