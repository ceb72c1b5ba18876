use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::CustomerClaims,
    state::{AppState, AuthConfig},
};

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// Signs a bearer token for `sub` with the given role (`GUEST`, `CUSTOMER`, `ADMIN`).
pub fn issue_token(auth: &AuthConfig, sub: &str, role: &str, email: Option<String>) -> anyhow::Result<String> {
    let claims = CustomerClaims {
        sub: sub.to_string(),
        email,
        role: role.to_owned(),
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))?)
}

async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let user_id = format!("guest-{}", Uuid::new_v4());
    let token = issue_token(&state.auth, &user_id, "GUEST", None)?;
    tracing::debug!("Issued guest token for {}", user_id);

    Ok(Json(AuthResponse { token, user_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::JwtIdentity;
    use turnstile_core::identity::IdentityResolver;
    use turnstile_core::{HolderId, Role};

    fn auth() -> AuthConfig {
        AuthConfig {
            secret: "test-secret".to_string(),
            expiration: 60,
        }
    }

    #[tokio::test]
    async fn issued_tokens_resolve_to_the_same_identity() {
        let token = issue_token(&auth(), "u1", "CUSTOMER", Some("u1@example.com".into())).unwrap();
        let ctx = JwtIdentity::new("test-secret").resolve(&token).await.unwrap();

        assert_eq!(ctx.user_id(), Some(&HolderId::new("u1")));
        assert_eq!(ctx.role(), Role::Customer);
    }

    #[tokio::test]
    async fn foreign_signatures_and_unknown_roles_are_rejected() {
        let token = issue_token(&auth(), "u1", "CUSTOMER", None).unwrap();
        assert!(JwtIdentity::new("other-secret").resolve(&token).await.is_err());

        let token = issue_token(&auth(), "u1", "SUPERUSER", None).unwrap();
        assert!(JwtIdentity::new("test-secret").resolve(&token).await.is_err());
    }
}
