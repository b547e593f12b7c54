//! The money layer: atomic balance mutations with an audit row per change,
//! and the Stars payment lifecycle (commission, credit, refund).

pub mod balance;
pub mod payment;

pub use balance::{BalanceService, Period};
pub use payment::{CommissionBreakdown, PaymentService};
