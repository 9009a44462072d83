//! Ties one store subscription to the roster mirror and the notification queue.

use chrono::{DateTime, Utc};

use crate::mirror::RosterMirror;
use crate::notify::NotificationQueue;
use crate::store::{BatchResult, DocumentStore, StoreError, Subscription};

pub struct RosterSync {
    mirror: RosterMirror,
    notifications: NotificationQueue,
    subscription: Option<Subscription>,
}

impl RosterSync {
    pub fn new(notification_limit: usize) -> Self {
        RosterSync {
            mirror: RosterMirror::new(),
            notifications: NotificationQueue::new(notification_limit),
            subscription: None,
        }
    }

    pub fn mirror(&self) -> &RosterMirror {
        &self.mirror
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationQueue {
        &mut self.notifications
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Starts a fresh subscription. Anything left from a previous one is torn
    /// down first, so the next batch is treated as a baseline.
    pub async fn subscribe(
        &mut self,
        store: &dyn DocumentStore,
        collection: &str,
        order_field: &str,
    ) -> Result<(), StoreError> {
        self.teardown();
        self.mirror.begin();
        match store.subscribe(collection, order_field).await {
            Ok(sub) => {
                tracing::info!(collection, order_field, "roster subscription started");
                self.subscription = Some(sub);
                Ok(())
            }
            Err(e) => {
                self.mirror.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Waits for the next event from the live subscription. Never resolves
    /// while there is none.
    pub async fn next_event(&mut self) -> Option<BatchResult> {
        match self.subscription.as_mut() {
            Some(sub) => sub.next_batch().await,
            None => std::future::pending().await,
        }
    }

    /// Applies one event; returns how many notifications it queued.
    pub fn handle_event(&mut self, event: Option<BatchResult>, now: DateTime<Utc>) -> usize {
        match event {
            Some(Ok(batch)) => {
                let candidates = self.mirror.apply(&batch);
                let queued = candidates.len();
                for c in candidates {
                    self.notifications.push(c, now);
                }
                tracing::debug!(
                    documents = batch.documents.len(),
                    changes = batch.changes.len(),
                    queued,
                    "batch applied"
                );
                queued
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "roster subscription failed");
                self.mirror.fail(e.to_string());
                self.subscription = None;
                0
            }
            None => {
                if self.subscription.take().is_some() {
                    tracing::warn!("roster subscription closed by the store");
                    self.mirror.fail("subscription closed");
                }
                0
            }
        }
    }

    /// Sign-out: detach from the store and forget everything derived from it.
    pub fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        self.mirror.teardown();
        self.notifications.clear();
    }
}
