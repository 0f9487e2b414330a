//! Delivery tasks and their results.

use crate::error::Error;
use mailfleet_mime::Message;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Callback receiving a task's result. May run concurrently for
/// different tasks.
pub type ResultCallback = Arc<dyn Fn(DeliveryResult) + Send + Sync>;

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryResult {
    /// Task id.
    pub id: String,
    /// Time from the start of the attempt to its end.
    pub duration: Duration,
    /// Why the attempt failed; `None` on success.
    pub error: Option<Error>,
}

impl DeliveryResult {
    /// Returns true if the message was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A message to deliver, with its id and result callback.
///
/// The callback fires exactly once per task, on success and on every
/// failure path, including rejection by a stopped pipeline.
pub struct Email {
    id: String,
    message: Arc<Message>,
    callback: Option<ResultCallback>,
}

impl Email {
    /// Creates a task without a callback.
    #[must_use]
    pub fn new(id: impl Into<String>, message: Message) -> Self {
        Self {
            id: id.into(),
            message: Arc::new(message),
            callback: None,
        }
    }

    /// Sets the result callback.
    #[must_use]
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(DeliveryResult) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Task id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The message to render.
    #[must_use]
    pub const fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Reports the outcome of an attempt that began at `started`.
    pub(crate) fn finish(self, started: Instant, outcome: crate::Result<()>) {
        let duration = started.elapsed();
        let error = outcome.err();
        match &error {
            None => info!(
                id = %self.id,
                to = %self.message.to().email(),
                duration_ms = duration.as_millis(),
                "delivered"
            ),
            Some(err) => warn!(
                id = %self.id,
                to = %self.message.to().email(),
                duration_ms = duration.as_millis(),
                error = %err,
                "delivery failed"
            ),
        }

        if let Some(callback) = self.callback {
            callback(DeliveryResult {
                id: self.id,
                duration,
                error,
            });
        }
    }

    /// Reports a task that never reached a delivery attempt.
    pub(crate) fn reject(self, error: Error) {
        self.finish(Instant::now(), Err(error));
    }
}

impl fmt::Debug for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Email")
            .field("id", &self.id)
            .field("from", &self.message.from().email())
            .field("to", &self.message.to().email())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn message() -> Message {
        Message::builder()
            .from("Alice <a@x.tld>")
            .to("Bob <b@y.tld>")
            .text("Hello")
            .build()
            .unwrap()
    }

    #[test]
    fn test_finish_fires_callback_once() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let email = Email::new("42", message()).on_result(move |r| sink.lock().unwrap().push(r));

        email.finish(Instant::now(), Ok(()));

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "42");
        assert!(results[0].is_success());
    }

    #[test]
    fn test_reject_carries_error() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let email = Email::new("7", message()).on_result(move |r| sink.lock().unwrap().push(r));

        email.reject(Error::PipelineStopped);

        let results = results.lock().unwrap();
        let error = results[0].error.as_ref().unwrap();
        assert_eq!(error.to_string(), "421 delivery pipeline stopped");
    }

    #[test]
    fn test_debug_summary() {
        let email = Email::new("1", message());
        let debug = format!("{email:?}");
        assert!(debug.contains("a@x.tld"));
        assert!(debug.contains("callback: false"));
    }
}
