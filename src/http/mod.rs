pub mod dto;
pub mod routes;

use crate::error::{AppError, AppResult};
use routes::AppState;
use std::net::SocketAddr;

pub async fn serve(bind_addr: &str, state: AppState) -> AppResult<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| AppError::InvalidConfig(format!("invalid http.bind_addr: {e}")))?;

    let app = routes::router(state);

    tracing::info!(%addr, "generation http surface starting (axum)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("failed to bind http surface: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("http surface error: {e}")))?;

    Ok(())
}
