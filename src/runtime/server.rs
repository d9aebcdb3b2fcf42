use crate::runtime::status::{ImportProgress, ImportStatus};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub fn status_router(status: Arc<ImportStatus>) -> Router {
    Router::new().route("/status", get(get_status)).with_state(status)
}

async fn get_status(State(status): State<Arc<ImportStatus>>) -> Json<ImportProgress> {
    Json(status.snapshot())
}

/// Serve `GET /status` on `addr` until `shutdown` turns true.
pub async fn run_status_server(
    status: Arc<ImportStatus>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, status_router(status).into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
