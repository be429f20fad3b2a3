//! Request parameter types and local validation
//!
//! Validation runs before any network call. A request that fails validation
//! is rejected with [`Error::Validation`] and issues no request at all.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Metadata, PaymentMethod};

/// Currency codes the platform settles in.
const RECOGNIZED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "SEK", "NOK", "DKK", "BTC", "ETH",
];

fn validate_currency(currency: &str) -> Result<()> {
    if currency.is_empty() {
        return Err(Error::Validation("currency is required".into()));
    }
    let upper = currency.to_uppercase();
    if !RECOGNIZED_CURRENCIES.contains(&upper.as_str()) {
        return Err(Error::Validation(format!("unrecognized currency: {currency}")));
    }
    Ok(())
}

fn validate_id(id: &str, what: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation(format!("{what} id must be non-empty")));
    }
    Ok(())
}

/// Parameters for creating a payment.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    /// Amount in integer minor units. Must be positive.
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Payment instrument.
    pub payment_method: PaymentMethod,
    /// Customer to attach the payment to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque metadata, passed through verbatim.
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl CreatePaymentRequest {
    /// Minimal request for the common case.
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            payment_method: PaymentMethod::Card,
            customer_id: None,
            description: None,
            metadata: Metadata::new(),
        }
    }

    /// Validate locally; no request is issued on failure.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::Validation("amount must be a positive integer".into()));
        }
        validate_currency(&self.currency)?;
        if let Some(customer_id) = &self.customer_id {
            validate_id(customer_id, "customer")?;
        }
        Ok(())
    }
}

/// Parameters for refunding a payment.
#[derive(Debug, Clone, Serialize)]
pub struct RefundPaymentRequest {
    /// Amount to refund in minor units; `None` refunds in full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    /// Refund reason, passed to the remote side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RefundPaymentRequest {
    /// Full refund.
    pub fn full() -> Self {
        Self {
            amount: None,
            reason: None,
        }
    }

    /// Partial refund of `amount` minor units.
    pub fn partial(amount: i64) -> Self {
        Self {
            amount: Some(amount),
            reason: None,
        }
    }

    pub(crate) fn validate(&self, payment_id: &str) -> Result<()> {
        validate_id(payment_id, "payment")?;
        if let Some(amount) = self.amount {
            if amount <= 0 {
                return Err(Error::Validation("refund amount must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Cursor query for listing payments.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListPaymentsQuery {
    /// Page size; remote default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Resume after this payment id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_after: Option<String>,
    /// Restrict to one customer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl ListPaymentsQuery {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            if limit == 0 || limit > 100 {
                return Err(Error::Validation("limit must be between 1 and 100".into()));
            }
        }
        if let Some(cursor) = &self.starting_after {
            validate_id(cursor, "cursor payment")?;
        }
        Ok(())
    }
}

/// Parameters for creating a customer.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCustomerRequest {
    /// Contact email.
    pub email: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque metadata.
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl CreateCustomerRequest {
    /// Request with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            metadata: Metadata::new(),
        }
    }

    /// Validate locally.
    pub fn validate(&self) -> Result<()> {
        // Deliverability is the remote side's problem; we only catch inputs
        // that cannot possibly be addresses.
        if self.email.is_empty() || !self.email.contains('@') {
            return Err(Error::Validation(format!("invalid email: {:?}", self.email)));
        }
        Ok(())
    }
}

/// Parameters for updating a customer. All fields optional; only provided
/// fields change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCustomerRequest {
    /// New contact email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Replacement metadata mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl UpdateCustomerRequest {
    pub(crate) fn validate(&self, customer_id: &str) -> Result<()> {
        validate_id(customer_id, "customer")?;
        if let Some(email) = &self.email {
            if email.is_empty() || !email.contains('@') {
                return Err(Error::Validation(format!("invalid email: {email:?}")));
            }
        }
        Ok(())
    }
}

/// Validate a bare entity id for get/capture/delete style calls.
pub(crate) fn validate_entity_id(id: &str, what: &str) -> Result<()> {
    validate_id(id, what)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payment_rejects_bad_amounts() {
        for amount in [0, -1, -500] {
            let req = CreatePaymentRequest::new(amount, "USD");
            assert!(matches!(req.validate(), Err(Error::Validation(_))), "amount {amount}");
        }
        assert!(CreatePaymentRequest::new(1, "USD").validate().is_ok());
    }

    #[test]
    fn create_payment_rejects_unknown_currency() {
        assert!(CreatePaymentRequest::new(500, "").validate().is_err());
        assert!(CreatePaymentRequest::new(500, "ZZZ").validate().is_err());
        // Case-insensitive.
        assert!(CreatePaymentRequest::new(500, "usd").validate().is_ok());
    }

    #[test]
    fn refund_rejects_non_positive_partial_amount() {
        assert!(RefundPaymentRequest::partial(0).validate("pay_1").is_err());
        assert!(RefundPaymentRequest::partial(-5).validate("pay_1").is_err());
        assert!(RefundPaymentRequest::full().validate("pay_1").is_ok());
        assert!(RefundPaymentRequest::full().validate("  ").is_err());
    }

    #[test]
    fn list_query_bounds_limit() {
        let mut query = ListPaymentsQuery::default();
        assert!(query.validate().is_ok());
        query.limit = Some(0);
        assert!(query.validate().is_err());
        query.limit = Some(101);
        assert!(query.validate().is_err());
        query.limit = Some(100);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn customer_requests_validate_email() {
        assert!(CreateCustomerRequest::new("a@b.co").validate().is_ok());
        assert!(CreateCustomerRequest::new("not-an-email").validate().is_err());

        let update = UpdateCustomerRequest {
            email: Some("still-not-an-email".into()),
            ..Default::default()
        };
        assert!(update.validate("cus_1").is_err());
    }

    #[test]
    fn metadata_keys_pass_through_serialization() {
        let mut req = CreatePaymentRequest::new(500, "USD");
        req.metadata.insert(
            "unrecognized.key".into(),
            crate::model::MetadataValue::String("kept".into()),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["metadata"]["unrecognized.key"], "kept");
    }
}
