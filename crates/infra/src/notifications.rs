//! Notification queue + delivery worker.
//!
//! The ledger engine enqueues and moves on: delivery success or failure is
//! never observed by ledger transactions, so they never wait on external IO.
//! Retry/backoff is owned by the worker, delivery by the injected sender.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use bursar_core::TenantId;

use crate::worker::WorkerHandle;

/// Opaque reference to a notification recipient (subject id, email handle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientRef(String);

impl RecipientRef {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self(recipient.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentVerified,
    PaymentRejected,
    WaiverApproved,
    WaiverRejected,
}

/// A queued notification awaiting asynchronous delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub recipient: RecipientRef,
    pub notification_type: NotificationType,
    pub payload: JsonValue,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        tenant_id: TenantId,
        recipient: RecipientRef,
        notification_type: NotificationType,
        payload: JsonValue,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            recipient,
            notification_type,
            payload,
            enqueued_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification queue disconnected")]
    Disconnected,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Producer half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationMessage>,
}

impl NotificationQueue {
    /// Create a queue plus the receiver to hand to a worker.
    pub fn channel() -> (Self, mpsc::Receiver<NotificationMessage>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, message: NotificationMessage) -> Result<(), NotificationError> {
        self.tx
            .send(message)
            .map_err(|_| NotificationError::Disconnected)
    }
}

/// Delivery seam (email gateway, SMS bridge, ...).
pub trait NotificationSender: Send {
    fn send(&mut self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// Worker-side retry policy (fixed delay).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Background delivery worker.
#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<S>(
        name: &'static str,
        receiver: mpsc::Receiver<NotificationMessage>,
        mut sender: S,
        retry: RetryPolicy,
    ) -> WorkerHandle
    where
        S: NotificationSender + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let tick = Duration::from_millis(250);
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    match receiver.recv_timeout(tick) {
                        Ok(message) => deliver_with_retry(name, &mut sender, &message, retry),
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn notification worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn deliver_with_retry<S: NotificationSender>(
    name: &str,
    sender: &mut S,
    message: &NotificationMessage,
    retry: RetryPolicy,
) {
    let attempts = retry.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sender.send(message) {
            Ok(()) => return,
            Err(err) if attempt < attempts => {
                warn!(worker = name, id = %message.id, attempt, error = %err, "delivery failed, retrying");
                thread::sleep(retry.delay);
            }
            Err(err) => {
                warn!(worker = name, id = %message.id, error = %err, "delivery abandoned after retries");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CollectingSender {
        delivered: Arc<Mutex<Vec<NotificationMessage>>>,
        failures_before_success: Arc<Mutex<u32>>,
    }

    impl NotificationSender for CollectingSender {
        fn send(&mut self, message: &NotificationMessage) -> Result<(), NotificationError> {
            let mut failures = self.failures_before_success.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(NotificationError::Delivery("transient".to_string()));
            }
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn message() -> NotificationMessage {
        NotificationMessage::new(
            TenantId::new(),
            RecipientRef::new("student-1"),
            NotificationType::PaymentVerified,
            serde_json::json!({"amount": 20_000}),
            Utc::now(),
        )
    }

    #[test]
    fn queued_messages_are_delivered() {
        let (queue, receiver) = NotificationQueue::channel();
        let sender = CollectingSender::default();
        let delivered = sender.delivered.clone();

        let handle = NotificationWorker::spawn(
            "notify-test",
            receiver,
            sender,
            RetryPolicy::default(),
        );

        queue.enqueue(message()).unwrap();
        queue.enqueue(message()).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        handle.shutdown();

        assert_eq!(delivered.lock().unwrap().len(), 2);
    }

    #[test]
    fn transient_delivery_failures_are_retried() {
        let (queue, receiver) = NotificationQueue::channel();
        let sender = CollectingSender::default();
        *sender.failures_before_success.lock().unwrap() = 2;
        let delivered = sender.delivered.clone();

        let handle = NotificationWorker::spawn(
            "notify-retry-test",
            receiver,
            sender,
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(10),
            },
        );

        queue.enqueue(message()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        handle.shutdown();

        assert_eq!(delivered.lock().unwrap().len(), 1);
    }
}
