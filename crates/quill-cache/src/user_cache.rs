//! Cached user profiles with an atomic balance rewrite.
//!
//! The balance update is deliberately NOT an invalidate: after a charge the
//! next request should still hit warm cache. Only the `balance` and
//! `cached_at` fields of the stored JSON are rewritten; every sibling field
//! is preserved — the compare-and-swap contract of the cache script.

use serde_json::Value;

use quill_core::Usd;

use crate::ttl::TtlMap;
use crate::{user_key, USER_TTL};

/// Outcome of the balance rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceUpdate {
    /// Key present — balance and cached_at rewritten.
    Updated,
    /// Key missing or expired — no-op; next read repopulates from the DB.
    NotCached,
}

pub struct UserCache {
    profiles: TtlMap<String, Value>,
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCache {
    pub fn new() -> Self {
        Self {
            profiles: TtlMap::new(4096),
        }
    }

    pub fn get(&self, user_id: i64) -> Option<Value> {
        self.profiles.get(&user_key(user_id))
    }

    /// Balance straight off the cached profile, if fresh.
    pub fn get_balance(&self, user_id: i64) -> Option<Usd> {
        let profile = self.get(user_id)?;
        let raw = profile.get("balance")?.as_str()?;
        Usd::parse_db(raw).ok()
    }

    pub fn put(&self, user_id: i64, mut profile: Value) {
        if let Some(obj) = profile.as_object_mut() {
            obj.insert(
                "cached_at".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        self.profiles.insert(user_key(user_id), profile, USER_TTL);
    }

    pub fn invalidate(&self, user_id: i64) {
        self.profiles.remove(&user_key(user_id));
    }

    /// Rewrite only `balance` and `cached_at` in the cached profile JSON.
    pub fn update_balance(&self, user_id: i64, balance: Usd) -> BalanceUpdate {
        let updated = self.profiles.update(&user_key(user_id), |profile| {
            if let Some(obj) = profile.as_object_mut() {
                obj.insert("balance".to_string(), Value::String(balance.to_string()));
                obj.insert(
                    "cached_at".to_string(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
            }
        });
        if updated {
            BalanceUpdate::Updated
        } else {
            BalanceUpdate::NotCached
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn update_balance_preserves_sibling_fields() {
        let cache = UserCache::new();
        cache.put(
            7,
            json!({
                "id": 7,
                "username": "alice",
                "model": "claude-sonnet-4-5",
                "balance": "1.0000",
            }),
        );

        assert_eq!(
            cache.update_balance(7, Usd::new(dec!(0.9500))),
            BalanceUpdate::Updated
        );
        let profile = cache.get(7).unwrap();
        assert_eq!(profile["balance"], "0.9500");
        assert_eq!(profile["username"], "alice");
        assert_eq!(profile["model"], "claude-sonnet-4-5");
        assert!(profile.get("cached_at").is_some());
    }

    #[test]
    fn update_balance_on_missing_key_is_noop() {
        let cache = UserCache::new();
        assert_eq!(
            cache.update_balance(999, Usd::ZERO),
            BalanceUpdate::NotCached
        );
        assert!(cache.get(999).is_none());
    }

    #[test]
    fn get_balance_parses_cached_string() {
        let cache = UserCache::new();
        cache.put(1, json!({"balance": "-0.0800"}));
        assert_eq!(cache.get_balance(1).unwrap().to_string(), "-0.0800");
    }
}
