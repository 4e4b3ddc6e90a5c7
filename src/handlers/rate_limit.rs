//! Per-IP rate limiting middleware for the upload and download route groups.

use crate::{
    errors::AppError,
    services::{error::TransferError, rate_limiter::ActionClass},
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

pub async fn limit_uploads(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(&state, ActionClass::Upload, req, next).await
}

pub async fn limit_downloads(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(&state, ActionClass::Download, req, next).await
}

async fn enforce(
    state: &AppState,
    class: ActionClass,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let subject = client_ip(&req);
    if state.limiter.exceeds(class, &subject).await {
        return Err(TransferError::RateLimitExceeded(class.to_string()).into());
    }
    Ok(next.run(req).await)
}

/// Peer address of the connection. Forwarding headers are not trusted.
fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}
