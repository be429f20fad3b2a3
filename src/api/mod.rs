//! Remote payment API client
//!
//! [`ApiClient`] issues request/response calls against the platform's REST
//! API. Three guarantees shape everything in here:
//!
//! - **Idempotency**: every mutating call carries a client-generated
//!   idempotency key, stable across retries of the same logical call, so
//!   the remote side can dedup a retry after a timeout that committed.
//! - **Bounded retries**: transient failures (network errors, 5xx, 429)
//!   retry with exponential backoff and jitter; 4xx surface immediately.
//! - **Fail fast on bad input**: requests are validated locally and issue
//!   no network call when invalid.

pub mod client;
pub mod requests;
pub mod retry;

pub use client::{ApiClient, ApiConfig};
pub use requests::{
    CreateCustomerRequest, CreatePaymentRequest, ListPaymentsQuery, RefundPaymentRequest,
    UpdateCustomerRequest,
};
pub use retry::RetryPolicy;
