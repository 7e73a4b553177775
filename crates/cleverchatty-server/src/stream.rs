//! Notification subscribers and broadcast fan-out.
//!
//! A client that sends the literal `__subscribe_notifications__` over a
//! streaming request gets a persistent status-update channel. Broadcasts
//! are best-effort: a subscriber whose channel refuses a send is removed
//! before the next broadcast.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cleverchatty_core::types::Notification;
use cleverchatty_protocol::a2a::{codes, Part, TaskStatusUpdateEvent};

/// Cadence of per-subscriber keepalive events.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Buffered events per subscriber before sends start failing.
pub const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    task_id: String,
    tx: mpsc::Sender<TaskStatusUpdateEvent>,
    keepalive: JoinHandle<()>,
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    inner: DashMap<String, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber under `context_id`, replacing (and thereby
    /// closing) any prior subscription for the same context.
    pub fn subscribe(
        self: &Arc<Self>,
        context_id: &str,
        task_id: &str,
        tx: mpsc::Sender<TaskStatusUpdateEvent>,
    ) {
        let keepalive = self.spawn_keepalive(context_id, task_id, tx.clone());
        let subscriber = Subscriber {
            task_id: task_id.to_string(),
            tx,
            keepalive,
        };
        if self
            .inner
            .insert(context_id.to_string(), subscriber)
            .is_some()
        {
            info!(context_id, "replaced existing notification subscriber");
        } else {
            info!(context_id, "notification subscriber registered");
        }
    }

    pub fn remove(&self, context_id: &str) {
        if self.inner.remove(context_id).is_some() {
            debug!(context_id, "notification subscriber removed");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Seven positional parts, fanned out to every subscriber.
    pub fn broadcast_notification(&self, notification: &Notification) {
        let params = serde_json::to_string(&notification.params).unwrap_or_default();
        self.broadcast(vec![
            Part::text(codes::MCP_NOTIFICATION),
            Part::text(&notification.server),
            Part::text(&notification.method),
            Part::text(&notification.description),
            Part::text(notification.monitoring_status.as_str()),
            Part::text(notification.processing_status.as_str()),
            Part::text(params),
        ]);
    }

    /// Two positional parts: `[agent_message, text]`.
    pub fn broadcast_agent_message(&self, text: &str) {
        self.broadcast(vec![Part::text(codes::AGENT_MESSAGE), Part::text(text)]);
    }

    fn broadcast(&self, parts: Vec<Part>) {
        let mut dead: Vec<String> = Vec::new();
        for entry in self.inner.iter() {
            let event = TaskStatusUpdateEvent::working(
                &entry.value().task_id,
                entry.key(),
                parts.clone(),
            );
            if entry.value().tx.try_send(event).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for context_id in dead {
            warn!(context_id = %context_id, "subscriber unreachable, dropping");
            self.inner.remove(&context_id);
        }
    }

    fn spawn_keepalive(
        self: &Arc<Self>,
        context_id: &str,
        task_id: &str,
        tx: mpsc::Sender<TaskStatusUpdateEvent>,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let context_id = context_id.to_string();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let event = TaskStatusUpdateEvent::working(
                    &task_id,
                    &context_id,
                    vec![Part::text(codes::KEEPALIVE), Part::text("keepalive")],
                );
                if tx.send(event).await.is_err() {
                    if let Some(registry) = registry.upgrade() {
                        registry.remove(&context_id);
                    }
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn notification() -> Notification {
        let mut params = HashMap::new();
        params.insert("subject".to_string(), serde_json::json!("hi"));
        Notification::new("email", "notifications/new_email", params)
    }

    #[tokio::test]
    async fn broadcast_carries_seven_ordered_parts() {
        let registry = SubscriberRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.subscribe("ctx-1", "task-1", tx);

        registry.broadcast_notification(&notification());

        let event = rx.recv().await.unwrap();
        let parts = event.status.message.unwrap().parts;
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[0].as_text(), "mcp_notification");
        assert_eq!(parts[1].as_text(), "email");
        assert_eq!(parts[2].as_text(), "notifications/new_email");
        assert_eq!(parts[4].as_text(), "none");
        assert_eq!(parts[5].as_text(), "none");
        assert!(parts[6].as_text().contains("subject"));
    }

    #[tokio::test]
    async fn agent_message_is_two_parts() {
        let registry = SubscriberRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.subscribe("ctx-1", "task-1", tx);

        registry.broadcast_agent_message("mail server is down");

        let event = rx.recv().await.unwrap();
        let parts = event.status.message.unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), "agent_message");
        assert_eq!(parts[1].as_text(), "mail server is down");
    }

    #[tokio::test]
    async fn resubscribe_replaces_the_prior_channel() {
        let registry = SubscriberRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        registry.subscribe("ctx-1", "task-1", tx1);
        let (tx2, mut rx2) = mpsc::channel(8);
        registry.subscribe("ctx-1", "task-2", tx2);

        assert_eq!(registry.len(), 1);
        registry.broadcast_agent_message("ping");

        // the first channel was closed by replacement, the second delivers
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn dead_subscribers_are_dropped_on_broadcast() {
        let registry = SubscriberRegistry::new();
        let (tx, rx) = mpsc::channel(8);
        registry.subscribe("ctx-1", "task-1", tx);
        drop(rx);

        registry.broadcast_agent_message("ping");
        assert!(registry.is_empty());
    }
}
