use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use counterflow_auth::JwtValidator;

use crate::context::{PrincipalContext, TenantContext};

/// Shared validator handle for the auth layer.
#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Bearer-token gate. Every request past this layer carries a verified
/// tenant and principal in its extensions; handlers never touch the token.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state.jwt.validate(token).map_err(|e| {
        tracing::debug!("bearer token rejected: {e}");
        StatusCode::UNAUTHORIZED
    })?;

    let extensions = req.extensions_mut();
    extensions.insert(TenantContext::new(claims.tenant_id));
    extensions.insert(PrincipalContext::new(claims.sub, claims.roles));

    Ok(next.run(req).await)
}

fn bearer_token<B>(req: &Request<B>) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
