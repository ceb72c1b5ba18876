use redis::RedisResult;
use tracing::debug;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter: true while `key` has been hit at most `limit` times this window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Rate limit {}: {}/{}", key, count, limit);
        Ok(count <= limit)
    }
}

/// Rate-limit key for hold attempts by one user.
pub fn hold_rate_key(user_id: &str) -> String {
    format!("ratelimit:hold:{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_keys_are_per_user() {
        assert_eq!(hold_rate_key("u1"), "ratelimit:hold:u1");
        assert_ne!(hold_rate_key("u1"), hold_rate_key("u2"));
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(RedisClient::new("not a url").is_err());
    }
}
