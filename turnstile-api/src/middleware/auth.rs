use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use turnstile_core::identity::IdentityResolver;
use turnstile_core::{AuthContext, HolderId, ReservationError, ReservationResult, Role};

use crate::{error::AppError, state::AppState};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerClaims {
    pub sub: String,
    pub email: Option<String>,
    /// `GUEST`, `CUSTOMER` or `ADMIN`.
    pub role: String,
    pub exp: usize,
}

/// Resolves HS256 bearer tokens signed with the configured secret.
pub struct JwtIdentity {
    key: DecodingKey,
}

impl JwtIdentity {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentity {
    async fn resolve(&self, bearer: &str) -> ReservationResult<AuthContext> {
        let token_data = decode::<CustomerClaims>(bearer, &self.key, &Validation::default()).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            ReservationError::Unauthenticated
        })?;

        let claims = token_data.claims;
        let role = Role::parse(&claims.role).ok_or(ReservationError::Unauthenticated)?;
        Ok(AuthContext::new(HolderId::new(claims.sub), role))
    }
}

// ============================================================================
// Identity Middleware
// ============================================================================

/// Puts an [`AuthContext`] in the request extensions. Requests without a bearer
/// token are anonymous; a token that does not verify is rejected outright.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim().to_string());

    let ctx = match bearer {
        Some(token) if !token.is_empty() => state
            .identity
            .resolve(&token)
            .await
            .map_err(|_| AppError::InvalidToken("bearer token rejected".to_string()))?,
        _ => AuthContext::anonymous(),
    };

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
