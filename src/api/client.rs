//! HTTP client for the payment API

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::requests::{
    validate_entity_id, CreateCustomerRequest, CreatePaymentRequest, ListPaymentsQuery,
    RefundPaymentRequest, UpdateCustomerRequest,
};
use crate::api::retry::{self, RetryPolicy};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{Customer, Payment, PaymentList};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the API, e.g. `https://api.defiant.sh`.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Backoff policy for transient failures.
    pub retry: RetryPolicy,
    /// Optional overall deadline per call. Expiry surfaces
    /// [`Error::Timeout`]; it does not imply the request was not committed
    /// server-side, the idempotency key covers any later retry.
    pub deadline: Option<Duration>,
}

impl ApiConfig {
    /// Config with default retry policy and no deadline.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

/// Error body shape returned by the API.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
}

/// Typed client for payment and customer operations.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    cancel: CancelToken,
}

impl ApiClient {
    /// Create a client with its own cancellation token.
    pub fn new(config: ApiConfig) -> Self {
        Self::with_cancel_token(config, CancelToken::new())
    }

    /// Create a client sharing an external cancellation token, so teardown
    /// can stop in-flight retry loops.
    pub fn with_cancel_token(config: ApiConfig, cancel: CancelToken) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            cancel,
        }
    }

    /// The cancellation token governing this client's retry loops.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    // ---- Payments ----

    /// Create a payment.
    pub async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<Payment> {
        request.validate()?;
        self.mutate(Method::POST, "v1/payments", Some(request)).await
    }

    /// Fetch a payment by id.
    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        validate_entity_id(payment_id, "payment")?;
        self.fetch(&format!("v1/payments/{payment_id}"), None).await
    }

    /// List payments with cursor pagination.
    pub async fn list_payments(&self, query: &ListPaymentsQuery) -> Result<PaymentList> {
        query.validate()?;
        let mut parts = Vec::new();
        if let Some(limit) = query.limit {
            parts.push(format!("limit={limit}"));
        }
        if let Some(cursor) = &query.starting_after {
            parts.push(format!("starting_after={cursor}"));
        }
        if let Some(customer_id) = &query.customer_id {
            parts.push(format!("customer_id={customer_id}"));
        }
        let query_string = (!parts.is_empty()).then(|| parts.join("&"));
        self.fetch("v1/payments", query_string.as_deref()).await
    }

    /// Refund a payment, fully or partially.
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        request: &RefundPaymentRequest,
    ) -> Result<Payment> {
        request.validate(payment_id)?;
        self.mutate(
            Method::POST,
            &format!("v1/payments/{payment_id}/refund"),
            Some(request),
        )
        .await
    }

    /// Capture a previously authorized payment.
    pub async fn capture_payment(&self, payment_id: &str) -> Result<Payment> {
        validate_entity_id(payment_id, "payment")?;
        self.mutate::<Payment, ()>(
            Method::POST,
            &format!("v1/payments/{payment_id}/capture"),
            None,
        )
        .await
    }

    // ---- Customers ----

    /// Create a customer.
    pub async fn create_customer(&self, request: &CreateCustomerRequest) -> Result<Customer> {
        request.validate()?;
        self.mutate(Method::POST, "v1/customers", Some(request)).await
    }

    /// Fetch a customer by id.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Customer> {
        validate_entity_id(customer_id, "customer")?;
        self.fetch(&format!("v1/customers/{customer_id}"), None).await
    }

    /// Update a customer.
    pub async fn update_customer(
        &self,
        customer_id: &str,
        request: &UpdateCustomerRequest,
    ) -> Result<Customer> {
        request.validate(customer_id)?;
        self.mutate(
            Method::PUT,
            &format!("v1/customers/{customer_id}"),
            Some(request),
        )
        .await
    }

    /// Delete a customer. The response body, if any, is discarded.
    pub async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        validate_entity_id(customer_id, "customer")?;
        let idempotency_key = Uuid::new_v4().to_string();
        let url = self.url(&format!("v1/customers/{customer_id}"), None);

        let op = |_attempt: u32| {
            let builder = self
                .authorized(Method::DELETE, &url)
                .header("Idempotency-Key", &idempotency_key);
            Self::dispatch_unit(builder)
        };
        self.with_deadline(retry::with_backoff(&self.config.retry, &self.cancel, op))
            .await
    }

    // ---- Plumbing ----

    /// Read-only call with retries.
    async fn fetch<T: DeserializeOwned>(&self, path: &str, query: Option<&str>) -> Result<T> {
        let op = |_attempt: u32| {
            let url = self.url(path, query);
            async move { Self::dispatch(self.authorized(Method::GET, &url)).await }
        };
        self.with_deadline(retry::with_backoff(&self.config.retry, &self.cancel, op))
            .await
    }

    /// Mutating call: one idempotency key per logical call, reused verbatim
    /// on every retry so the remote side can dedup.
    async fn mutate<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: serde::Serialize + Sync,
    {
        let idempotency_key = Uuid::new_v4().to_string();
        let url = self.url(path, None);
        tracing::debug!(%method, %url, %idempotency_key, "Issuing mutating API call");

        let op = |_attempt: u32| {
            let mut builder = self
                .authorized(method.clone(), &url)
                .header("Idempotency-Key", &idempotency_key);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            Self::dispatch(builder)
        };
        self.with_deadline(retry::with_backoff(&self.config.retry, &self.cancel, op))
            .await
    }

    fn url(&self, path: &str, query: Option<&str>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{base}/{path}?{q}"),
            _ => format!("{base}/{path}"),
        }
    }

    fn authorized(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.config.api_key)
    }

    async fn dispatch<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn dispatch_unit(builder: RequestBuilder) -> Result<()> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| Error::Timeout(deadline.as_millis() as u64))?,
            None => fut.await,
        }
    }
}

/// Map a non-success status to the error taxonomy. Only 429 and 5xx are
/// retryable.
fn classify_status(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        });

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => Error::TransientNetwork(format!("rate limited: {message}")),
        s if s.is_server_error() => Error::TransientNetwork(message),
        s => Error::Api {
            code: s.as_u16(),
            message,
        },
    }
}
