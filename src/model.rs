//! Core data model
//!
//! Entities (payments, customers), the normalized [`Event`] envelope that all
//! ingestion paths converge on, and the durable [`PersistedState`] blob.
//!
//! Reconciliation rules rely on two fields defined here:
//!
//! - every entity carries a monotonically increasing `version`, bumped by the
//!   remote side on each accepted mutation and used as the merge tie-breaker;
//! - every event carries a source-assigned `id`, which may repeat across
//!   redeliveries and is used for best-effort dedup.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capacity of the dedup window in [`PersistedState::last_seen_event_ids`].
///
/// Eviction is least-recently-seen. Dedup is best-effort: an event id older
/// than the full window may be re-applied, at which point the version rule
/// still prevents state regression.
pub const DEDUP_CAPACITY: usize = 1024;

/// Current schema version of the persisted blob.
pub const SCHEMA_VERSION: u32 = 2;

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created but not yet submitted for processing.
    Created,
    /// Submitted, awaiting a terminal outcome.
    Pending,
    /// Funds captured successfully.
    Succeeded,
    /// Terminal failure.
    Failed,
    /// Fully refunded.
    Refunded,
    /// Partially refunded.
    PartiallyRefunded,
}

/// Payment instrument used for a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment.
    Card,
    /// Bank transfer.
    BankTransfer,
    /// Crypto settlement rail.
    Crypto,
    /// Apple Pay.
    ApplePay,
    /// Google Pay.
    GooglePay,
    /// PayPal.
    PayPal,
    /// Merchant-defined method.
    Custom,
}

/// Scalar value allowed in entity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// UTF-8 string value.
    String(String),
    /// Signed integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
}

/// Opaque key/value metadata attached to entities.
///
/// Unknown keys are preserved verbatim and round-trip through persistence
/// unmodified; they are never validated or dropped.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A payment record.
///
/// Owned exclusively by the reconciler; collaborators only ever see clones
/// taken from a state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Remote-assigned payment id.
    pub id: String,
    /// Amount in integer minor units (cents).
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Current lifecycle status.
    pub status: PaymentStatus,
    /// Instrument used.
    pub payment_method: PaymentMethod,
    /// Owning customer, if any.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque metadata, preserved verbatim.
    #[serde(default)]
    pub metadata: Metadata,
    /// Total amount refunded so far, in minor units.
    #[serde(default)]
    pub refunded_amount: i64,
    /// Creation time as reported by the remote side.
    pub created_at: DateTime<Utc>,
    /// Monotonic mutation counter; the merge tie-breaker.
    pub version: u64,
}

/// A customer record. Same ownership and versioning rules as [`Payment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Remote-assigned customer id.
    pub id: String,
    /// Contact email.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Account balance in integer minor units.
    pub balance: i64,
    /// Balance currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Whether the customer has unpaid invoices.
    pub delinquent: bool,
    /// Creation time as reported by the remote side.
    pub created_at: DateTime<Utc>,
    /// Monotonic mutation counter.
    pub version: u64,
}

/// A page of payments returned by the list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentList {
    /// Payments in this page.
    pub data: Vec<Payment>,
    /// Whether more pages exist beyond this one.
    pub has_more: bool,
    /// Total matching payments on the remote side.
    pub total: i64,
}

/// Where an event entered the system.
///
/// Source is metadata only: it never participates in merge precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Server-pushed event stream.
    Stream,
    /// Signed webhook callback.
    Webhook,
    /// Result of a local API call.
    LocalApi,
}

/// Closed set of event types.
///
/// New event types are a compile-time decision; the wire-side catch-all for
/// unrecognized type strings lives in the decoders, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A payment was created.
    #[serde(rename = "payment.created")]
    PaymentCreated,
    /// A payment changed state.
    #[serde(rename = "payment.updated")]
    PaymentUpdated,
    /// A payment was refunded (fully or partially).
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    /// An invoice was paid; carries the settled payment.
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
    /// A customer was created.
    #[serde(rename = "customer.created")]
    CustomerCreated,
    /// A customer changed state.
    #[serde(rename = "customer.updated")]
    CustomerUpdated,
    /// Diagnostic: the stream delivered an unparseable frame.
    #[serde(rename = "stream.error")]
    StreamError,
    /// Diagnostic: an authenticated webhook payload failed to decode.
    #[serde(rename = "webhook.error")]
    WebhookError,
    /// Diagnostic: a bus listener returned an error.
    #[serde(rename = "listener.error")]
    ListenerError,
    /// Diagnostic: a state persistence operation failed.
    #[serde(rename = "storage.error")]
    StorageError,
}

impl EventType {
    /// String form of the event type, matching the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCreated => "payment.created",
            Self::PaymentUpdated => "payment.updated",
            Self::PaymentRefunded => "payment.refunded",
            Self::InvoicePaid => "invoice.paid",
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::StreamError => "stream.error",
            Self::WebhookError => "webhook.error",
            Self::ListenerError => "listener.error",
            Self::StorageError => "storage.error",
        }
    }

    /// Whether events of this type mutate canonical state.
    pub fn is_entity_event(&self) -> bool {
        !matches!(
            self,
            Self::StreamError | Self::WebhookError | Self::ListenerError | Self::StorageError
        )
    }

    /// Whether this type creates an entity on first sight.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::PaymentCreated | Self::CustomerCreated)
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "payment.created" => Self::PaymentCreated,
            "payment.updated" => Self::PaymentUpdated,
            "payment.refunded" => Self::PaymentRefunded,
            "invoice.paid" => Self::InvoicePaid,
            "customer.created" => Self::CustomerCreated,
            "customer.updated" => Self::CustomerUpdated,
            "stream.error" => Self::StreamError,
            "webhook.error" => Self::WebhookError,
            "listener.error" => Self::ListenerError,
            "storage.error" => Self::StorageError,
            other => return Err(UnknownEventType(other.to_string())),
        })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a wire type string is not in the closed [`EventType`] set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl std::fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

/// Partial payment data carried by an event.
///
/// Remote sources routinely send deltas rather than whole records; only `id`
/// and `version` are mandatory. Missing fields leave the stored entity's
/// values untouched on apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPatch {
    /// Target payment id.
    pub id: String,
    /// Version implied by this change.
    pub version: u64,
    /// New status, if changed.
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    /// Amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Payment instrument.
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    /// Owning customer.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement metadata mapping.
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Total refunded amount in minor units.
    #[serde(default)]
    pub refunded_amount: Option<i64>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentPatch {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            version: p.version,
            status: Some(p.status),
            amount: Some(p.amount),
            currency: Some(p.currency),
            payment_method: Some(p.payment_method),
            customer_id: p.customer_id,
            description: p.description,
            metadata: Some(p.metadata),
            refunded_amount: Some(p.refunded_amount),
            created_at: Some(p.created_at),
        }
    }
}

impl PaymentPatch {
    /// Overlay this patch on an existing record. The caller has already
    /// checked the version rule.
    pub fn apply_to(&self, existing: &mut Payment) {
        existing.version = self.version;
        if let Some(status) = self.status {
            existing.status = status;
        }
        if let Some(amount) = self.amount {
            existing.amount = amount;
        }
        if let Some(currency) = &self.currency {
            existing.currency = currency.clone();
        }
        if let Some(method) = self.payment_method {
            existing.payment_method = method;
        }
        if let Some(customer_id) = &self.customer_id {
            existing.customer_id = Some(customer_id.clone());
        }
        if let Some(description) = &self.description {
            existing.description = Some(description.clone());
        }
        if let Some(metadata) = &self.metadata {
            existing.metadata = metadata.clone();
        }
        if let Some(refunded_amount) = self.refunded_amount {
            existing.refunded_amount = refunded_amount;
        }
    }

    /// Build a full record from this patch, for first-sight creation.
    /// Returns `None` when the patch lacks the required amount or currency.
    pub fn materialize(&self) -> Option<Payment> {
        Some(Payment {
            id: self.id.clone(),
            amount: self.amount?,
            currency: self.currency.clone()?,
            status: self.status.unwrap_or(PaymentStatus::Created),
            payment_method: self.payment_method.unwrap_or(PaymentMethod::Custom),
            customer_id: self.customer_id.clone(),
            description: self.description.clone(),
            metadata: self.metadata.clone().unwrap_or_default(),
            refunded_amount: self.refunded_amount.unwrap_or(0),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            version: self.version,
        })
    }
}

/// Partial customer data carried by an event. Same rules as [`PaymentPatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPatch {
    /// Target customer id.
    pub id: String,
    /// Version implied by this change.
    pub version: u64,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Balance in minor units.
    #[serde(default)]
    pub balance: Option<i64>,
    /// Balance currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Delinquency flag.
    #[serde(default)]
    pub delinquent: Option<bool>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<Customer> for CustomerPatch {
    fn from(c: Customer) -> Self {
        Self {
            id: c.id,
            version: c.version,
            email: Some(c.email),
            name: c.name,
            balance: Some(c.balance),
            currency: c.currency,
            delinquent: Some(c.delinquent),
            created_at: Some(c.created_at),
        }
    }
}

impl CustomerPatch {
    /// Overlay this patch on an existing record.
    pub fn apply_to(&self, existing: &mut Customer) {
        existing.version = self.version;
        if let Some(email) = &self.email {
            existing.email = email.clone();
        }
        if let Some(name) = &self.name {
            existing.name = Some(name.clone());
        }
        if let Some(balance) = self.balance {
            existing.balance = balance;
        }
        if let Some(currency) = &self.currency {
            existing.currency = Some(currency.clone());
        }
        if let Some(delinquent) = self.delinquent {
            existing.delinquent = delinquent;
        }
    }

    /// Build a full record from this patch. Returns `None` when the patch
    /// lacks the required email.
    pub fn materialize(&self) -> Option<Customer> {
        Some(Customer {
            id: self.id.clone(),
            email: self.email.clone()?,
            name: self.name.clone(),
            balance: self.balance.unwrap_or(0),
            currency: self.currency.clone(),
            delinquent: self.delinquent.unwrap_or(false),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            version: self.version,
        })
    }
}

/// Decoded, typed event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Payment-bearing payload.
    Payment(PaymentPatch),
    /// Customer-bearing payload.
    Customer(CustomerPatch),
    /// Diagnostic payload.
    Diagnostic {
        /// Human-readable condition description.
        message: String,
    },
}

/// A normalized event, immutable once constructed.
///
/// Every ingestion path (stream, webhook, local API result) produces these;
/// the reconciler and the bus consume them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source-assigned id. May repeat across redeliveries.
    pub id: String,
    /// Event type.
    pub event_type: EventType,
    /// Decoded payload.
    pub payload: EventPayload,
    /// Ingestion path this event arrived on.
    pub source: EventSource,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Build an entity event from a payment patch (or a full payment,
    /// via `Into`).
    pub fn payment(
        id: impl Into<String>,
        event_type: EventType,
        patch: impl Into<PaymentPatch>,
        source: EventSource,
    ) -> Self {
        Self {
            id: id.into(),
            event_type,
            payload: EventPayload::Payment(patch.into()),
            source,
            received_at: Utc::now(),
        }
    }

    /// Build an entity event from a customer patch.
    pub fn customer(
        id: impl Into<String>,
        event_type: EventType,
        patch: impl Into<CustomerPatch>,
        source: EventSource,
    ) -> Self {
        Self {
            id: id.into(),
            event_type,
            payload: EventPayload::Customer(patch.into()),
            source,
            received_at: Utc::now(),
        }
    }

    /// Build a diagnostic event with a fresh locally-assigned id.
    pub fn diagnostic(event_type: EventType, message: impl Into<String>, source: EventSource) -> Self {
        Self {
            id: format!("diag_{}", uuid::Uuid::new_v4().simple()),
            event_type,
            payload: EventPayload::Diagnostic {
                message: message.into(),
            },
            source,
            received_at: Utc::now(),
        }
    }
}

/// Bounded least-recently-seen set of event ids.
///
/// Insertion order doubles as recency order: re-seeing an id refreshes it.
/// Serialized as a plain ordered list, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    /// Whether `id` is inside the window.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record `id`, evicting the least recently seen entry at capacity.
    /// Re-recording an existing id refreshes its recency.
    pub fn record(&mut self, id: &str) {
        if self.seen.contains(id) {
            self.order.retain(|e| e != id);
        } else {
            self.seen.insert(id.to_string());
        }
        self.order.push_back(id.to_string());
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl From<Vec<String>> for DedupWindow {
    fn from(ids: Vec<String>) -> Self {
        let mut window = Self::default();
        for id in &ids {
            window.record(id);
        }
        window
    }
}

impl From<DedupWindow> for Vec<String> {
    fn from(window: DedupWindow) -> Self {
        window.order.into_iter().collect()
    }
}

/// The durable canonical state blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Layout version of this blob; see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// All known payments, keyed by id.
    pub payments: HashMap<String, Payment>,
    /// All known customers, keyed by id.
    pub customers: HashMap<String, Customer>,
    /// Bounded dedup window over recently applied event ids.
    #[serde(default)]
    pub last_seen_event_ids: DedupWindow,
    /// Whether the runtime has completed first-run initialization.
    pub initialized: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            payments: HashMap::new(),
            customers: HashMap::new(),
            last_seen_event_ids: DedupWindow::default(),
            initialized: false,
        }
    }
}
