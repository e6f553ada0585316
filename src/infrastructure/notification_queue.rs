//! In-process notification queues.
//!
//! Notifications are held in memory until their effective date has passed
//! according to the shared clock. Delivery happens either from a background
//! poller, when a poll interval is configured, or from explicit
//! `process_ready_notifications` calls.

use crate::domain::clock::Clock;
use crate::domain::notification::{
    NotificationEvent, NotificationQueue, NotificationQueueHandler, NotificationQueueRef,
    NotificationQueueService, QueueError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PendingNotification {
    effective_date: DateTime<Utc>,
    sequence: u64,
    event: NotificationEvent,
    user_token: Uuid,
    account_record_id: Option<u64>,
    tenant_record_id: u64,
}

struct QueueInner {
    handler: Arc<dyn NotificationQueueHandler>,
    clock: Arc<dyn Clock>,
    pending: Mutex<Vec<PendingNotification>>,
    sequence: AtomicU64,
    started: AtomicBool,
}

impl QueueInner {
    /// Removes and returns the due notifications, oldest first.
    async fn take_ready(&self) -> Vec<PendingNotification> {
        let now = self.clock.utc_now();
        let mut pending = self.pending.lock().await;
        let (mut ready, rest): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|notification| notification.effective_date <= now);
        *pending = rest;
        ready.sort_by_key(|notification| (notification.effective_date, notification.sequence));
        ready
    }

    /// Delivers due notifications until none are left. Handlers run without
    /// the queue lock held, so they may record new notifications.
    async fn process_ready(&self) -> usize {
        let mut delivered = 0;
        while self.started.load(Ordering::SeqCst) {
            let ready = self.take_ready().await;
            if ready.is_empty() {
                break;
            }
            let mut ready = ready.into_iter();
            while let Some(notification) = ready.next() {
                if !self.started.load(Ordering::SeqCst) {
                    let mut pending = self.pending.lock().await;
                    pending.push(notification);
                    pending.extend(ready);
                    return delivered;
                }
                self.handler
                    .handle_ready_notification(
                        &notification.event,
                        notification.effective_date,
                        notification.user_token,
                        notification.account_record_id,
                        notification.tenant_record_id,
                    )
                    .await;
                delivered += 1;
            }
        }
        delivered
    }
}

pub struct InMemoryNotificationQueue {
    service_name: String,
    queue_name: String,
    inner: Arc<QueueInner>,
    poll_interval: Option<Duration>,
    shutdown: Arc<Notify>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryNotificationQueue {
    async fn next_effective_date(&self) -> Option<DateTime<Utc>> {
        let pending = self.inner.pending.lock().await;
        pending.iter().map(|notification| notification.effective_date).min()
    }

    async fn pending_notifications(&self) -> Vec<(DateTime<Utc>, NotificationEvent)> {
        let mut pending = self.inner.pending.lock().await.clone();
        pending.sort_by_key(|notification| (notification.effective_date, notification.sequence));
        pending
            .into_iter()
            .map(|notification| (notification.effective_date, notification.event))
            .collect()
    }
}

#[async_trait]
impl NotificationQueue for InMemoryNotificationQueue {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn record_future_notification(
        &self,
        effective_date: DateTime<Utc>,
        event: NotificationEvent,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    ) -> Result<(), QueueError> {
        debug!(
            queue = %self.queue_name,
            event_type = event.type_name(),
            %effective_date,
            "Recording notification"
        );
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        self.inner.pending.lock().await.push(PendingNotification {
            effective_date,
            sequence,
            event,
            user_token,
            account_record_id,
            tenant_record_id,
        });
        Ok(())
    }

    async fn start_queue(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(service = %self.service_name, queue = %self.queue_name, "Starting notification queue");
        let Some(interval) = self.poll_interval else {
            return;
        };
        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        inner.process_ready().await;
                    }
                }
            }
        });
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn stop_queue(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(service = %self.service_name, queue = %self.queue_name, "Stopping notification queue");
        self.shutdown.notify_one();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }
}

impl Drop for InMemoryNotificationQueue {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            handle.abort();
        }
    }
}

type QueueKey = (String, String);

/// Creates and tracks the in-memory queues, one per (service, queue) pair.
pub struct InMemoryNotificationQueueService {
    clock: Arc<dyn Clock>,
    poll_interval: Option<Duration>,
    queues: Mutex<HashMap<QueueKey, Arc<InMemoryNotificationQueue>>>,
}

impl InMemoryNotificationQueueService {
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Option<Duration>) -> Self {
        Self {
            clock,
            poll_interval,
            queues: Mutex::new(HashMap::new()),
        }
    }

    async fn snapshot(&self) -> Vec<Arc<InMemoryNotificationQueue>> {
        self.queues.lock().await.values().cloned().collect()
    }

    /// Delivers every due notification of every started queue, returning
    /// how many were delivered.
    pub async fn process_ready_notifications(&self) -> usize {
        let mut delivered = 0;
        for queue in self.snapshot().await {
            delivered += queue.inner.process_ready().await;
        }
        delivered
    }

    /// Earliest effective date pending on a started queue.
    pub async fn next_effective_date(&self) -> Option<DateTime<Utc>> {
        let mut next = None;
        for queue in self.snapshot().await {
            if !queue.is_started() {
                continue;
            }
            if let Some(date) = queue.next_effective_date().await {
                next = Some(next.map_or(date, |current: DateTime<Utc>| current.min(date)));
            }
        }
        next
    }

    pub async fn pending_notifications(
        &self,
        service_name: &str,
        queue_name: &str,
    ) -> Vec<(DateTime<Utc>, NotificationEvent)> {
        let queue = self
            .queues
            .lock()
            .await
            .get(&(service_name.to_string(), queue_name.to_string()))
            .cloned();
        match queue {
            Some(queue) => queue.pending_notifications().await,
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl NotificationQueueService for InMemoryNotificationQueueService {
    async fn create_notification_queue(
        &self,
        service_name: &str,
        queue_name: &str,
        handler: Arc<dyn NotificationQueueHandler>,
    ) -> Result<NotificationQueueRef, QueueError> {
        let mut queues = self.queues.lock().await;
        let key = (service_name.to_string(), queue_name.to_string());
        if queues.contains_key(&key) {
            return Err(QueueError::AlreadyExists {
                service_name: key.0,
                queue_name: key.1,
            });
        }
        let queue = Arc::new(InMemoryNotificationQueue {
            service_name: service_name.to_string(),
            queue_name: queue_name.to_string(),
            inner: Arc::new(QueueInner {
                handler,
                clock: self.clock.clone(),
                pending: Mutex::new(Vec::new()),
                sequence: AtomicU64::new(0),
                started: AtomicBool::new(false),
            }),
            poll_interval: self.poll_interval,
            shutdown: Arc::new(Notify::new()),
            worker: std::sync::Mutex::new(None),
        });
        queues.insert(key, queue.clone());
        Ok(queue)
    }

    async fn delete_notification_queue(
        &self,
        service_name: &str,
        queue_name: &str,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        match queues.remove(&(service_name.to_string(), queue_name.to_string())) {
            Some(_) => Ok(()),
            None => Err(QueueError::NoSuchNotificationQueue {
                service_name: service_name.to_string(),
                queue_name: queue_name.to_string(),
            }),
        }
    }
}
