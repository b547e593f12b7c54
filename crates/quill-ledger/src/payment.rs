//! Stars payment lifecycle.
//!
//! Commission: nominal = stars · rate; credited = nominal · (1 − k1 − k2 − k3).
//! k1/k2 are fixed platform fees, k3 is the operator margin. All rounding
//! 4-dp half-up. Crediting and refunding each run as one transaction:
//! payment row + balance write + audit row.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use quill_cache::UserCache;
use quill_core::config::BillingConfig;
use quill_core::{QuillError, Result, Usd};
use quill_store::balance_ops::{self, NewBalanceOperation};
use quill_store::types::{now_rfc3339, OperationType, Payment, PaymentStatus};
use quill_store::{payments, users, Store};

/// Commission vector applied to one payment.
#[derive(Debug, Clone, Copy)]
pub struct CommissionBreakdown {
    pub nominal_usd: Usd,
    pub credited_usd: Usd,
    pub k1: Decimal,
    pub k2: Decimal,
    pub k3: Decimal,
}

pub struct PaymentService {
    store: Arc<Store>,
    cache: Arc<UserCache>,
    billing: BillingConfig,
}

impl PaymentService {
    pub fn new(store: Arc<Store>, cache: Arc<UserCache>, billing: BillingConfig) -> Self {
        Self {
            store,
            cache,
            billing,
        }
    }

    fn decimal(value: f64, what: &str) -> Result<Decimal> {
        Decimal::try_from(value)
            .map_err(|e| QuillError::InvalidCommission(format!("{what}={value}: {e}")))
    }

    /// Validate rates and compute the commission breakdown for `stars_amount`.
    pub fn calculate_usd_amount(
        &self,
        stars_amount: i64,
        owner_margin: Option<f64>,
    ) -> Result<CommissionBreakdown> {
        let k1 = Self::decimal(self.billing.telegram_withdrawal_fee, "k1")?;
        let k2 = Self::decimal(self.billing.telegram_topics_fee, "k2")?;
        let k3 = Self::decimal(
            owner_margin.unwrap_or(self.billing.default_owner_margin),
            "k3",
        )?;

        if k3 < Decimal::ZERO || k3 > Decimal::ONE {
            return Err(QuillError::InvalidCommission(format!(
                "owner margin k3={k3} must be in [0, 1]"
            )));
        }
        let total = k1 + k2 + k3;
        // 1e-4 tolerance for rates that were configured as floats.
        if total > Decimal::ONE + Decimal::new(1, 4) {
            return Err(QuillError::InvalidCommission(format!(
                "k1+k2+k3={total} exceeds 1.0"
            )));
        }

        let rate = Self::decimal(self.billing.stars_to_usd_rate, "stars_to_usd_rate")?;
        let nominal = Usd::new(Decimal::from(stars_amount) * rate);
        let credited = nominal.mul(Decimal::ONE - k1 - k2 - k3);

        Ok(CommissionBreakdown {
            nominal_usd: nominal,
            credited_usd: credited,
            k1,
            k2,
            k3,
        })
    }

    /// Invoice payload: `topup_<user_id>_<unix_seconds>_<stars_amount>`.
    pub fn invoice_payload(&self, user_id: i64, stars_amount: i64) -> String {
        let ts = chrono::Utc::now().timestamp();
        format!("topup_{user_id}_{ts}_{stars_amount}")
    }

    /// Process a SuccessfulPayment update: reject duplicates, create the
    /// payment row, credit the balance, write the audit row — one transaction.
    pub fn process_successful_payment(
        &self,
        user_id: i64,
        charge_id: &str,
        stars_amount: i64,
        invoice_payload: &str,
        owner_margin: Option<f64>,
    ) -> Result<Payment> {
        let breakdown = self.calculate_usd_amount(stars_amount, owner_margin)?;

        let payment = self.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            if payments::get_by_charge_id(&tx, charge_id)?.is_some() {
                return Err(quill_store::StoreError::Constraint(format!(
                    "duplicate charge {charge_id}"
                )));
            }

            let user = users::get_by_id(&tx, user_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("user {user_id}")))?;

            let payment_id = payments::insert_completed(
                &tx,
                user_id,
                charge_id,
                stars_amount,
                breakdown.nominal_usd,
                breakdown.credited_usd,
                Usd::new(breakdown.k1),
                Usd::new(breakdown.k2),
                Usd::new(breakdown.k3),
                Some(invoice_payload),
            )?;

            let before = user.balance;
            let after = before + breakdown.credited_usd;
            users::set_balance(&tx, user_id, after)?;
            balance_ops::insert(
                &tx,
                &NewBalanceOperation {
                    user_id,
                    operation_type: OperationType::Payment,
                    amount: breakdown.credited_usd,
                    balance_before: before,
                    balance_after: after,
                    related_payment_id: Some(payment_id),
                    related_message_id: None,
                    admin_user_id: None,
                    description: Some(&format!(
                        "Top-up: {stars_amount} stars → ${}",
                        breakdown.credited_usd
                    )),
                },
            )?;
            tx.commit()?;

            payments::get_by_charge_id(conn, charge_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("payment {charge_id}")))
        });

        let payment = match payment {
            Ok(p) => p,
            Err(e) if matches!(&e, quill_store::StoreError::Constraint(_)) || e.is_unique_violation() => {
                return Err(QuillError::DuplicatePayment {
                    charge_id: charge_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            user_id,
            charge_id,
            stars = stars_amount,
            credited = %payment.credited_usd,
            "payment completed"
        );
        self.cache.invalidate(user_id);
        Ok(payment)
    }

    /// Refund validation chain: ownership → status → window → balance,
    /// then deduct, mark refunded, write the audit row.
    ///
    /// The platform-side refund API call is the caller's concern.
    pub fn process_refund(&self, user_id: i64, charge_id: &str) -> Result<Payment> {
        let refund_days = self.billing.refund_period_days;

        let result = self.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            let payment = payments::get_by_charge_id(&tx, charge_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("payment {charge_id}")))?;

            if payment.user_id != user_id {
                return Ok(Err(QuillError::PaymentNotFound {
                    charge_id: charge_id.to_string(),
                }));
            }
            if payment.status != PaymentStatus::Completed {
                return Ok(Err(QuillError::DuplicatePayment {
                    charge_id: charge_id.to_string(),
                }));
            }

            let created = chrono::DateTime::parse_from_rfc3339(&payment.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now());
            let age = chrono::Utc::now() - created;
            if age > chrono::Duration::days(refund_days) {
                return Ok(Err(QuillError::RefundWindowExpired { days: refund_days }));
            }

            let user = users::get_by_id(&tx, user_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("user {user_id}")))?;
            if user.balance < payment.credited_usd {
                return Ok(Err(QuillError::InsufficientBalance {
                    balance_usd: user.balance.to_string(),
                }));
            }

            let before = user.balance;
            let after = before - payment.credited_usd;
            users::set_balance(&tx, user_id, after)?;
            payments::mark_refunded(&tx, payment.id)?;
            balance_ops::insert(
                &tx,
                &NewBalanceOperation {
                    user_id,
                    operation_type: OperationType::Refund,
                    amount: -payment.credited_usd,
                    balance_before: before,
                    balance_after: after,
                    related_payment_id: Some(payment.id),
                    related_message_id: None,
                    admin_user_id: None,
                    description: Some(&format!("Refund of {charge_id}")),
                },
            )?;
            tx.commit()?;

            let refreshed = payments::get_by_charge_id(conn, charge_id)?
                .ok_or_else(|| quill_store::StoreError::NotFound(format!("payment {charge_id}")))?;
            Ok(Ok(refreshed))
        });

        let payment = match result {
            Ok(Ok(p)) => p,
            Ok(Err(domain)) => return Err(domain),
            Err(quill_store::StoreError::NotFound(_)) => {
                return Err(QuillError::PaymentNotFound {
                    charge_id: charge_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id, charge_id, refunded = %payment.credited_usd, "payment refunded");
        self.cache.invalidate(user_id);
        Ok(payment)
    }
}
