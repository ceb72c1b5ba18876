use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::seat::HolderId;
use crate::{ReservationError, ReservationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Guest,
    Customer,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GUEST" => Some(Role::Guest),
            "CUSTOMER" => Some(Role::Customer),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Who is calling. Passed explicitly into every reservation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: Option<HolderId>,
    role: Role,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { user_id: None, role: Role::Guest }
    }

    pub fn new(user_id: HolderId, role: Role) -> Self {
        Self { user_id: Some(user_id), role }
    }

    pub fn customer(user_id: impl Into<String>) -> Self {
        Self::new(HolderId::new(user_id), Role::Customer)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(HolderId::new(user_id), Role::Admin)
    }

    pub fn user_id(&self) -> Option<&HolderId> {
        self.user_id.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.user_id.is_some() && self.role == Role::Admin
    }

    pub fn require_user(&self) -> ReservationResult<&HolderId> {
        self.user_id.as_ref().ok_or(ReservationError::Unauthenticated)
    }

    pub fn require_admin(&self) -> ReservationResult<&HolderId> {
        let user = self.require_user()?;
        if self.role != Role::Admin {
            return Err(ReservationError::Forbidden("administrator role required".to_string()));
        }
        Ok(user)
    }
}

/// Turns a bearer credential into an [`AuthContext`].
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, bearer: &str) -> ReservationResult<AuthContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_context_is_unauthenticated() {
        let ctx = AuthContext::anonymous();
        assert!(matches!(ctx.require_user(), Err(ReservationError::Unauthenticated)));
        assert!(!ctx.is_admin());
    }

    #[test]
    fn customers_are_not_admins() {
        let ctx = AuthContext::customer("u1");
        assert_eq!(ctx.require_user().unwrap().as_str(), "u1");
        assert!(matches!(ctx.require_admin(), Err(ReservationError::Forbidden(_))));
        assert!(AuthContext::admin("root").require_admin().is_ok());
    }
}
