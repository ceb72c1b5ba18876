use tracing::warn;
use turnstile_core::AuthContext;
use turnstile_store::redis_repo::hold_rate_key;

use crate::{error::AppError, state::AppState};

/// Per-user fixed window on hold attempts. Without Redis, or when Redis is
/// unreachable, every attempt is let through.
pub async fn enforce_hold_rate(state: &AppState, ctx: &AuthContext) -> Result<(), AppError> {
    let (Some(redis), Some(user)) = (&state.redis, ctx.user_id()) else {
        return Ok(());
    };

    let rules = &state.business_rules;
    match redis
        .check_rate_limit(&hold_rate_key(user.as_str()), rules.hold_rate_limit, rules.hold_rate_window_seconds)
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("Hold rate limit exceeded for {}", user);
            state.metrics.hold_outcome("rate_limited");
            Err(AppError::RateLimited)
        }
        Err(e) => {
            warn!("Rate limiter unavailable, allowing hold: {}", e);
            Ok(())
        }
    }
}
