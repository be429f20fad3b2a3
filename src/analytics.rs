//! Payment analytics
//!
//! Aggregation over a state snapshot; read-only and side-effect free.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{PaymentStatus, PersistedState};

/// Aggregated payment figures for a date range and currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentAnalytics {
    /// Sum of matching payment amounts, in minor units.
    pub total_amount: i64,
    /// Number of matching payments.
    pub total_count: u64,
    /// Payments that reached a successful capture (including ones refunded
    /// afterwards).
    pub successful_count: u64,
    /// Payments that failed terminally.
    pub failed_count: u64,
    /// Sum of refunded amounts, in minor units.
    pub refunded_amount: i64,
}

/// Aggregate payments created in `[from, to]` denominated in `currency`.
pub fn aggregate(
    state: &PersistedState,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    currency: &str,
) -> PaymentAnalytics {
    let currency = currency.to_uppercase();
    let mut analytics = PaymentAnalytics::default();

    for payment in state.payments.values() {
        if payment.created_at < from || payment.created_at > to {
            continue;
        }
        if !payment.currency.eq_ignore_ascii_case(&currency) {
            continue;
        }

        analytics.total_count += 1;
        analytics.total_amount += payment.amount;
        analytics.refunded_amount += payment.refunded_amount;
        match payment.status {
            PaymentStatus::Succeeded
            | PaymentStatus::Refunded
            | PaymentStatus::PartiallyRefunded => analytics.successful_count += 1,
            PaymentStatus::Failed => analytics.failed_count += 1,
            PaymentStatus::Created | PaymentStatus::Pending => {}
        }
    }

    analytics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payment, PaymentMethod};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn payment(
        id: &str,
        amount: i64,
        currency: &str,
        status: PaymentStatus,
        refunded: i64,
        day: u32,
    ) -> Payment {
        Payment {
            id: id.to_string(),
            amount,
            currency: currency.to_string(),
            status,
            payment_method: PaymentMethod::Card,
            customer_id: None,
            description: None,
            metadata: Default::default(),
            refunded_amount: refunded,
            created_at: Utc.with_ymd_and_hms(2026, 8, day, 12, 0, 0).unwrap(),
            version: 1,
        }
    }

    fn state() -> PersistedState {
        let mut state = PersistedState::default();
        for p in [
            payment("pay_1", 500, "USD", PaymentStatus::Succeeded, 0, 10),
            payment("pay_2", 1200, "USD", PaymentStatus::Failed, 0, 11),
            payment("pay_3", 800, "USD", PaymentStatus::Refunded, 800, 12),
            payment("pay_4", 950, "EUR", PaymentStatus::Succeeded, 0, 12),
            payment("pay_5", 300, "USD", PaymentStatus::Pending, 0, 25),
        ] {
            state.payments.insert(p.id.clone(), p);
        }
        state
    }

    #[test]
    fn aggregates_by_range_and_currency() {
        let state = state();
        let from = Utc.with_ymd_and_hms(2026, 8, 10, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 8, 15, 0, 0, 0).unwrap();

        let result = aggregate(&state, from, to, "usd");
        assert_eq!(
            result,
            PaymentAnalytics {
                total_amount: 2500,
                total_count: 3,
                successful_count: 2,
                failed_count: 1,
                refunded_amount: 800,
            }
        );
    }

    #[test]
    fn empty_range_yields_zeroes() {
        let state = state();
        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(aggregate(&state, from, to, "USD"), PaymentAnalytics::default());
    }
}
