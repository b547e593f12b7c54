//! Balance mutations and queries.
//!
//! Every mutation is one DB transaction (balance write + audit row) followed
//! by one cache update — never two commits. The cache update rewrites the
//! balance field in place so the profile stays warm.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use quill_cache::UserCache;
use quill_core::{QuillError, Result, Usd};
use quill_store::balance_ops::{self, NewBalanceOperation};
use quill_store::types::OperationType;
use quill_store::{users, Store};

/// Charge-summary window for `total_charged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
    All,
}

impl Period {
    fn since(&self) -> Option<String> {
        let now = chrono::Utc::now();
        let floor = match self {
            Period::Today => now.date_naive().and_hms_opt(0, 0, 0)?.and_utc(),
            Period::Week => now - chrono::Duration::days(7),
            Period::Month => now - chrono::Duration::days(30),
            Period::All => return None,
        };
        Some(floor.to_rfc3339())
    }
}

pub struct BalanceService {
    store: Arc<Store>,
    cache: Arc<UserCache>,
    minimum_balance: Usd,
}

impl BalanceService {
    pub fn new(store: Arc<Store>, cache: Arc<UserCache>, minimum_balance: Usd) -> Self {
        Self {
            store,
            cache,
            minimum_balance,
        }
    }

    pub fn get_balance(&self, user_id: i64) -> Result<Usd> {
        let user = self
            .store
            .with_conn(|conn| users::get_by_id(conn, user_id))?
            .ok_or(QuillError::UserNotFound { id: user_id })?;
        Ok(user.balance)
    }

    /// Cache-first balance read for the tool pre-check. `None` = unknown.
    pub fn cached_balance(&self, user_id: i64) -> Option<Usd> {
        if let Some(balance) = self.cache.get_balance(user_id) {
            return Some(balance);
        }
        self.get_balance(user_id).ok()
    }

    /// (allowed, exists). Intentionally soft: one request may drive the
    /// balance negative; the next one is blocked.
    pub fn can_request(&self, user_id: i64) -> Result<(bool, bool)> {
        let user = self.store.with_conn(|conn| users::get_by_id(conn, user_id))?;
        let Some(user) = user else {
            return Ok((false, false));
        };
        let allowed = user.balance > self.minimum_balance;
        if !allowed {
            info!(user_id, balance = %user.balance, "request blocked: insufficient balance");
        }
        Ok((allowed, true))
    }

    /// Deduct `amount` (must be positive). Returns the new balance.
    pub fn charge(
        &self,
        user_id: i64,
        amount: Usd,
        description: &str,
        related_message_id: Option<i64>,
    ) -> Result<Usd> {
        if !amount.is_positive() {
            return Err(QuillError::InvalidAmount(format!(
                "charge amount must be positive, got {amount}"
            )));
        }

        let balance_after = self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let user = users::get_by_id(&tx, user_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("user {user_id}")))?;

            let balance_before = user.balance;
            let balance_after = balance_before - amount;
            users::set_balance(&tx, user_id, balance_after)?;
            balance_ops::insert(
                &tx,
                &NewBalanceOperation {
                    user_id,
                    operation_type: OperationType::Usage,
                    amount: -amount,
                    balance_before,
                    balance_after,
                    related_payment_id: None,
                    related_message_id,
                    admin_user_id: None,
                    description: Some(description),
                },
            )?;
            tx.commit()?;
            Ok(balance_after)
        });
        let balance_after = match balance_after {
            Ok(v) => v,
            Err(quill_store::StoreError::NotFound(_)) => {
                return Err(QuillError::UserNotFound { id: user_id })
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            user_id,
            amount = %amount,
            balance_after = %balance_after,
            description,
            "user charged"
        );
        if balance_after.is_negative() {
            // Expected: the soft gate allows one request past zero.
            warn!(user_id, balance = %balance_after, "balance negative after charge");
        }

        self.cache.update_balance(user_id, balance_after);
        Ok(balance_after)
    }

    /// Admin adjustment: positive or negative amount. Returns (before, after).
    pub fn admin_adjust(
        &self,
        admin_id: i64,
        target_user_id: Option<i64>,
        target_username: Option<&str>,
        amount: Usd,
        description: Option<&str>,
    ) -> Result<(Usd, Usd)> {
        if amount.is_zero() {
            return Err(QuillError::InvalidAmount("adjustment of zero".into()));
        }

        let (user_id, before, after) = self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let user = match (target_user_id, target_username) {
                (Some(id), _) => users::get_by_id(&tx, id)?,
                (None, Some(name)) => users::get_by_username(&tx, name)?,
                (None, None) => None,
            }
            .ok_or_else(|| {
                quill_store::StoreError::NotFound(format!(
                    "target user id={target_user_id:?} username={target_username:?}"
                ))
            })?;

            let before = user.balance;
            let after = before + amount;
            users::set_balance(&tx, user.id, after)?;

            let action = if amount.is_positive() { "added" } else { "deducted" };
            let default_desc =
                format!("Admin balance adjustment: ${} {action} by admin {admin_id}", amount.abs());
            balance_ops::insert(
                &tx,
                &NewBalanceOperation {
                    user_id: user.id,
                    operation_type: OperationType::AdminTopup,
                    amount,
                    balance_before: before,
                    balance_after: after,
                    related_payment_id: None,
                    related_message_id: None,
                    admin_user_id: Some(admin_id),
                    description: Some(description.unwrap_or(&default_desc)),
                },
            )?;
            tx.commit()?;
            Ok((user.id, before, after))
        })?;

        info!(
            admin_id,
            user_id,
            amount = %amount,
            before = %before,
            after = %after,
            "admin adjusted balance"
        );
        self.cache.update_balance(user_id, after);
        Ok((before, after))
    }

    /// Recent operations, newest first.
    pub fn balance_history(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<quill_store::types::BalanceOperation>> {
        Ok(self
            .store
            .with_conn(|conn| balance_ops::list_for_user(conn, user_id, limit))?)
    }

    /// Sum of |USAGE amounts| in the window.
    pub fn total_charged(&self, user_id: i64, period: Period) -> Result<Usd> {
        let since = period.since();
        Ok(self
            .store
            .with_conn(|conn| balance_ops::total_usage(conn, user_id, since.as_deref()))?)
    }

    /// Check `balance_after = balance_before + amount` on every audit row.
    pub fn verify_integrity(&self, user_id: i64) -> Result<bool> {
        Ok(self
            .store
            .with_conn(|conn| balance_ops::verify_integrity(conn, user_id))?)
    }
}

/// Convenience for config floats → Usd.
pub fn usd_from_f64(value: f64) -> Usd {
    Usd::new(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn service() -> BalanceService {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .with_conn(|conn| users::get_or_create(conn, 1, Some("alice"), None, None, "m"))
            .unwrap();
        BalanceService::new(store, Arc::new(UserCache::new()), Usd::ZERO)
    }

    fn credit(svc: &BalanceService, amount: Usd) {
        svc.admin_adjust(99, Some(1), None, amount, None).unwrap();
    }

    #[test]
    fn charge_writes_audit_row_and_balance() {
        let svc = service();
        credit(&svc, Usd::new(dec!(1)));

        let after = svc.charge(1, Usd::new(dec!(0.25)), "LLM turn", Some(7)).unwrap();
        assert_eq!(after.to_string(), "0.7500");
        assert_eq!(svc.get_balance(1).unwrap(), after);

        let history = svc.balance_history(1, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount.to_string(), "-0.2500");
        assert_eq!(history[0].related_message_id, Some(7));
        assert!(svc.verify_integrity(1).unwrap());
    }

    #[test]
    fn charge_rejects_non_positive_amounts() {
        let svc = service();
        for amount in [Usd::ZERO, Usd::new(dec!(-0.5))] {
            let err = svc.charge(1, amount, "bad", None).unwrap_err();
            assert!(matches!(err, QuillError::InvalidAmount(_)));
        }
    }

    #[test]
    fn soft_gate_allows_one_negative_then_blocks() {
        let svc = service();
        credit(&svc, Usd::new(dec!(0.001)));

        // First request allowed: 0.001 > 0.
        assert_eq!(svc.can_request(1).unwrap(), (true, true));
        let after = svc.charge(1, Usd::new(dec!(0.05)), "tool", None).unwrap();
        assert_eq!(after.to_string(), "-0.0490");

        // Second request blocked at the gate.
        assert_eq!(svc.can_request(1).unwrap(), (false, true));
    }

    #[test]
    fn can_request_unknown_user() {
        let svc = service();
        assert_eq!(svc.can_request(404).unwrap(), (false, false));
    }

    #[test]
    fn final_balance_is_sum_of_signed_amounts() {
        let svc = service();
        credit(&svc, Usd::new(dec!(2)));
        svc.charge(1, Usd::new(dec!(0.3)), "a", None).unwrap();
        svc.charge(1, Usd::new(dec!(0.2)), "b", None).unwrap();
        svc.admin_adjust(99, Some(1), None, Usd::new(dec!(-0.5)), None)
            .unwrap();

        assert_eq!(svc.get_balance(1).unwrap().to_string(), "1.0000");
        assert!(svc.verify_integrity(1).unwrap());
    }

    #[test]
    fn total_charged_counts_usage_only() {
        let svc = service();
        credit(&svc, Usd::new(dec!(5)));
        svc.charge(1, Usd::new(dec!(0.4)), "a", None).unwrap();
        let total = svc.total_charged(1, Period::All).unwrap();
        assert_eq!(total.to_string(), "0.4000");
        // admin credit is not usage
        let today = svc.total_charged(1, Period::Today).unwrap();
        assert_eq!(today.to_string(), "0.4000");
    }

    #[test]
    fn admin_adjust_by_username() {
        let svc = service();
        let (before, after) = svc
            .admin_adjust(99, None, Some("@alice"), Usd::new(dec!(1.5)), Some("gift"))
            .unwrap();
        assert_eq!(before.to_string(), "0.0000");
        assert_eq!(after.to_string(), "1.5000");
    }
}
