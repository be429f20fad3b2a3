//! WebSocket consumer with reconnect

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::api::retry::RetryPolicy;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{Event, EventSource, EventType};
use crate::wire::{self, DecodeError};

/// Callback invoked for every normalized stream event.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Derive the push-channel URL from the API base URL: `http(s)` becomes
/// `ws(s)` and the `/ws` endpoint is appended.
pub fn derive_ws_url(api_url: &str) -> Result<String> {
    let mut url = Url::parse(api_url)
        .map_err(|e| Error::Validation(format!("bad API URL {api_url:?}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Validation(format!(
                "unsupported API URL scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Validation("cannot set websocket scheme".into()))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

/// Maintains one logical subscription to the server-pushed event feed.
pub struct StreamConsumer {
    ws_url: String,
    api_key: String,
    reconnect: RetryPolicy,
}

impl StreamConsumer {
    /// Consumer for `ws_url`, authenticating with `api_key`.
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_key: api_key.into(),
            reconnect: RetryPolicy::reconnect(),
        }
    }

    /// Override the reconnect backoff policy.
    pub fn with_reconnect_policy(mut self, reconnect: RetryPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Start consuming. Events are delivered to `on_event` until the
    /// returned handle is stopped.
    pub fn start<F>(self, on_event: F) -> StreamHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let callback: EventCallback = Arc::new(on_event);

        let task = tokio::spawn(async move {
            self.run(task_cancel, callback).await;
        });

        StreamHandle {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(self, cancel: CancelToken, on_event: EventCallback) {
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_and_read(&cancel, &on_event).await {
                Ok(()) => {
                    // Clean read loop exit means either cancellation or a
                    // server-side close; reconnect fresh in the latter case.
                    consecutive_failures = 0;
                }
                Err(error) => {
                    tracing::warn!(url = %self.ws_url, error = %error, "Stream connection failed");
                    consecutive_failures = consecutive_failures.saturating_add(1);
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            let delay = self.reconnect.delay_for(consecutive_failures.saturating_sub(1));
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting stream");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!(url = %self.ws_url, "Stream consumer stopped");
    }

    async fn connect_and_read(&self, cancel: &CancelToken, on_event: &EventCallback) -> Result<()> {
        let (ws_stream, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;
        tracing::info!(url = %self.ws_url, "Stream connected");

        let (mut write, mut read) = ws_stream.split();
        let subscribe = serde_json::json!({
            "type": "subscribe",
            "api_key": self.api_key,
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;

        loop {
            let message = tokio::select! {
                message = read.next() => message,
                _ = cancel.cancelled() => return Ok(()),
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    self.handle_frame(text.as_bytes(), on_event);
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Stream closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for us.
                }
                Some(Err(error)) => {
                    return Err(Error::TransientNetwork(error.to_string()));
                }
            }
        }
    }

    /// Decode one frame. Unparseable frames become `stream.error`
    /// diagnostics; unrecognized-but-well-formed types are dropped quietly.
    /// Neither terminates the subscription.
    fn handle_frame(&self, raw: &[u8], on_event: &EventCallback) {
        match wire::decode_event(raw, EventSource::Stream) {
            Ok(event) => on_event(event),
            Err(DecodeError::UnknownType(ty)) => {
                tracing::debug!(event_type = %ty, "Dropping unrecognized stream event type");
            }
            Err(DecodeError::Unparseable(reason)) => {
                tracing::warn!(error = %reason, "Unparseable stream frame");
                on_event(Event::diagnostic(
                    EventType::StreamError,
                    reason,
                    EventSource::Stream,
                ));
            }
        }
    }
}

/// Handle to a running stream subscription.
pub struct StreamHandle {
    cancel: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    /// Stop the subscription.
    ///
    /// Idempotent. When this returns, the consumer task has exited and no
    /// further callbacks will fire, even though the underlying connection
    /// teardown may still complete in the background of the OS.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::warn!(error = %error, "Stream task ended abnormally");
                }
            }
        }
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        // Last-resort teardown for handles dropped without stop().
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn derives_ws_urls_like_the_api_base() {
        assert_eq!(derive_ws_url("http://api.test").unwrap(), "ws://api.test/ws");
        assert_eq!(
            derive_ws_url("https://api.defiant.sh/").unwrap(),
            "wss://api.defiant.sh/ws"
        );
        assert!(derive_ws_url("ftp://api.test").is_err());
        assert!(derive_ws_url("not a url").is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_callbacks() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        // Unroutable endpoint: the consumer sits in its reconnect loop.
        let consumer = StreamConsumer::new("ws://127.0.0.1:1/ws", "sk_test")
            .with_reconnect_policy(RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            });
        let handle = consumer.start(move |_| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;
        handle.stop().await;
        assert!(handle.is_stopped());

        let after_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn unparseable_frame_becomes_diagnostic() {
        let consumer = StreamConsumer::new("ws://unused/ws", "sk_test");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_inner = seen.clone();
        let callback: EventCallback = Arc::new(move |event| {
            seen_inner.lock().push(event);
        });

        consumer.handle_frame(b"garbage", &callback);
        consumer.handle_frame(br#"{"id":"evt_1","type":"wat.wat","data":{}}"#, &callback);
        consumer.handle_frame(
            br#"{"id":"evt_2","type":"payment.updated","data":{"id":"pay_1","version":2}}"#,
            &callback,
        );

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event_type, EventType::StreamError);
        assert_eq!(seen[1].event_type, EventType::PaymentUpdated);
        assert_eq!(seen[1].source, EventSource::Stream);
    }
}
