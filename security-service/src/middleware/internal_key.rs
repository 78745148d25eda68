use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-api-key";

/// Guards endpoints called by other backend services. Rejects everything when
/// no key is configured.
pub async fn require_internal_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.security.internal_api_key.as_ref() else {
        tracing::error!("INTERNAL_API_KEY not configured, rejecting internal request");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Internal API access is not configured"
        )));
    };

    let provided = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let matches: bool = provided
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into();
    if provided.is_empty() || !matches {
        tracing::warn!(path = %req.uri().path(), "Rejected request with invalid internal API key");
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid internal API key")));
    }

    Ok(next.run(req).await)
}
