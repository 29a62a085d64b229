//! Notification Hub
//!
//! Turns execution events into user notifications.
//!
//! # Pipeline
//!
//! 1. Convert: only qualifying events produce a notification
//! 2. Throttle: drop it if an event with the same
//!    `(source, status, workflow_id)` key was accepted within the window
//! 3. Store: at capacity, evict the oldest non-persistent notification
//!
//! | event                         | notification                          |
//! |-------------------------------|---------------------------------------|
//! | execution completed           | success, expires after the TTL        |
//! | execution failed              | error, persistent, retry + view logs  |
//! | execution paused              | warning, persistent, resume           |
//! | step failed, critical         | error, persistent, investigate        |
//! | alternative suggested         | info, lists fallback steps            |
//! | execution cancelled           | info                                  |

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::execution::{EventBus, WorkflowEvent};
use crate::recovery::Severity;

use super::model::{NotificationKind, WorkflowNotification};

/// `(source, status, workflow_id)`
type ThrottleKey = (&'static str, &'static str, String);

#[derive(Debug, Default)]
struct HubState {
    /// Oldest first
    store: VecDeque<WorkflowNotification>,
    last_accepted: HashMap<ThrottleKey, DateTime<Utc>>,
}

/// Throttled, capacity-bounded notification store.
#[derive(Debug)]
pub struct NotificationHub {
    config: HubConfig,
    state: Mutex<HubState>,
}

impl NotificationHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HubState::default()),
        }
    }

    pub fn observe(&self, event: &WorkflowEvent) -> Option<WorkflowNotification> {
        self.observe_at(event, Utc::now())
    }

    /// Converts, throttles and stores one event observed at `now`.
    ///
    /// Returns the stored notification, or `None` if the event does not
    /// qualify or was throttled.
    pub fn observe_at(&self, event: &WorkflowEvent, now: DateTime<Utc>) -> Option<WorkflowNotification> {
        let notification = self.convert(event, now)?;
        let key: ThrottleKey = (event.source(), event.status(), event.workflow_id().to_string());

        let mut state = self.lock();
        self.prune(&mut state, now);
        if let Some(last) = state.last_accepted.get(&key) {
            if now - *last < self.config.throttle_window() {
                debug!(
                    "Throttled {} {} notification for workflow '{}'",
                    key.0, key.1, key.2
                );
                return None;
            }
        }
        state.last_accepted.insert(key, now);

        Self::insert(&mut state, self.config.capacity, notification.clone());
        Some(notification)
    }

    /// Stores a notification directly, bypassing conversion and throttling.
    pub fn push(&self, notification: WorkflowNotification) {
        let mut state = self.lock();
        Self::insert(&mut state, self.config.capacity, notification);
    }

    /// Live notifications, newest first. Expired entries are hidden even
    /// before the next cleanup removes them.
    pub fn list(&self) -> Vec<WorkflowNotification> {
        let now = Utc::now();
        self.lock()
            .store
            .iter()
            .rev()
            .filter(|n| !n.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn unread(&self) -> Vec<WorkflowNotification> {
        let now = Utc::now();
        self.lock()
            .store
            .iter()
            .rev()
            .filter(|n| !n.read && !n.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        let now = Utc::now();
        self.lock()
            .store
            .iter()
            .filter(|n| !n.read && !n.is_expired(now))
            .count()
    }

    /// Returns false if no notification has this id.
    pub fn mark_read(&self, id: &str) -> bool {
        match self.lock().store.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        for notification in self.lock().store.iter_mut() {
            notification.read = true;
        }
    }

    /// Removes a notification, persistent or not.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.store.len();
        state.store.retain(|n| n.id != id);
        state.store.len() != before
    }

    pub fn clear(&self) {
        self.lock().store.clear();
    }

    /// Drops expired non-persistent notifications and anything older than
    /// the maximum age. Returns how many were removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        self.prune(&mut state, now)
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    /// Follows `bus` on a background task until the bus closes.
    pub fn spawn_listener(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        self.observe(&event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Notification listener lagged, {} events dropped", missed)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn convert(&self, event: &WorkflowEvent, now: DateTime<Utc>) -> Option<WorkflowNotification> {
        let notification = match event {
            WorkflowEvent::ExecutionCompleted { workflow_id, metrics, .. } => {
                WorkflowNotification::new(
                    NotificationKind::Success,
                    "Workflow completed",
                    format!(
                        "{} step(s) completed, {} skipped in {}ms",
                        metrics.completed_steps,
                        metrics.skipped_steps,
                        metrics.duration_ms.unwrap_or(0)
                    ),
                    workflow_id,
                )
                .expiring_at(now + self.config.success_ttl())
            }
            WorkflowEvent::ExecutionFailed { workflow_id, error, .. } => {
                WorkflowNotification::new(NotificationKind::Error, "Workflow failed", error, workflow_id)
                    .persistent()
                    .with_action("retry", "Retry")
                    .with_action("view_logs", "View logs")
            }
            WorkflowEvent::ExecutionPaused { workflow_id, step_id, .. } => {
                let message = match step_id {
                    Some(step) => format!("Paused at step '{}'", step),
                    None => "Paused".to_string(),
                };
                let mut n = WorkflowNotification::new(NotificationKind::Warning, "Workflow paused", message, workflow_id)
                    .persistent()
                    .with_action("resume", "Resume");
                n.step_id = step_id.clone();
                n
            }
            WorkflowEvent::StepFailed { workflow_id, step_id, error, .. } if error.severity == Severity::Critical => {
                WorkflowNotification::new(
                    NotificationKind::Error,
                    format!("Critical error in step '{}'", step_id),
                    &error.message,
                    workflow_id,
                )
                .with_step(step_id)
                .persistent()
                .with_action("investigate", "Investigate")
            }
            WorkflowEvent::AlternativeSuggested {
                workflow_id,
                step_id,
                fallback_steps,
                notify_user: true,
                ..
            } => {
                let message = if fallback_steps.is_empty() {
                    format!("Step '{}' failed; no fallback steps are configured", step_id)
                } else {
                    format!("Step '{}' failed; fallback steps: {}", step_id, fallback_steps.join(", "))
                };
                WorkflowNotification::new(NotificationKind::Info, "Alternative available", message, workflow_id)
                    .with_step(step_id)
            }
            WorkflowEvent::ExecutionCancelled { workflow_id, .. } => WorkflowNotification::new(
                NotificationKind::Info,
                "Workflow cancelled",
                "Execution was cancelled",
                workflow_id,
            ),
            _ => return None,
        };

        Some(
            notification
                .with_execution(event.execution_id())
                .with_timestamp(now),
        )
    }

    fn insert(state: &mut HubState, capacity: usize, notification: WorkflowNotification) {
        if state.store.len() >= capacity {
            match state.store.iter().position(|n| !n.persistent) {
                Some(oldest) => {
                    if let Some(evicted) = state.store.remove(oldest) {
                        debug!("Evicted notification '{}'", evicted.title);
                    }
                }
                None => warn!(
                    "Notification store over capacity ({}): all entries are persistent",
                    state.store.len() + 1
                ),
            }
        }
        state.store.push_back(notification);
    }

    /// Drops expired and over-age notifications along with throttle
    /// entries whose window has passed.
    fn prune(&self, state: &mut HubState, now: DateTime<Utc>) -> usize {
        let max_age = self.config.max_age();
        let window = self.config.throttle_window();

        let before = state.store.len();
        state
            .store
            .retain(|n| !n.is_expired(now) && now - n.timestamp <= max_age);
        state.last_accepted.retain(|_, last| now - *last < window);

        let removed = before - state.store.len();
        if removed > 0 {
            debug!("Cleaned up {} notification(s)", removed);
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::execution::ExecutionMetrics;
    use crate::recovery::{ErrorType, WorkflowError};

    fn completed(workflow_id: &str) -> WorkflowEvent {
        WorkflowEvent::ExecutionCompleted {
            execution_id: "e1".to_string(),
            workflow_id: workflow_id.to_string(),
            metrics: ExecutionMetrics::default(),
        }
    }

    fn failed(workflow_id: &str) -> WorkflowEvent {
        WorkflowEvent::ExecutionFailed {
            execution_id: "e1".to_string(),
            workflow_id: workflow_id.to_string(),
            error: "boom".to_string(),
            metrics: ExecutionMetrics::default(),
        }
    }

    fn hub(capacity: usize) -> NotificationHub {
        NotificationHub::new(HubConfig {
            capacity,
            ..HubConfig::default()
        })
    }

    #[test]
    fn test_throttle_within_window() {
        let hub = hub(50);
        let t0 = Utc::now();

        assert!(hub.observe_at(&completed("wf"), t0).is_some());
        assert!(hub.observe_at(&completed("wf"), t0 + Duration::milliseconds(4999)).is_none());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_throttle_after_window() {
        let hub = hub(50);
        let t0 = Utc::now();

        hub.observe_at(&completed("wf"), t0);
        assert!(hub.observe_at(&completed("wf"), t0 + Duration::seconds(5)).is_some());
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_throttle_key_distinguishes_workflow_and_status() {
        let hub = hub(50);
        let t0 = Utc::now();

        hub.observe_at(&completed("wf"), t0);
        assert!(hub.observe_at(&completed("other"), t0).is_some());
        assert!(hub.observe_at(&failed("wf"), t0).is_some());
        assert_eq!(hub.len(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest_non_persistent() {
        let hub = hub(3);
        let t0 = Utc::now();

        hub.observe_at(&failed("a"), t0);
        let first_success = hub.observe_at(&completed("b"), t0).unwrap();
        hub.observe_at(&completed("c"), t0);
        hub.observe_at(&completed("d"), t0);

        let ids: Vec<String> = hub.list().into_iter().map(|n| n.workflow_id).collect();
        assert_eq!(ids, vec!["d", "c", "a"]);
        assert!(hub.list().iter().all(|n| n.id != first_success.id));
    }

    #[test]
    fn test_capacity_never_evicts_persistent() {
        let hub = hub(2);
        let t0 = Utc::now();

        hub.observe_at(&failed("a"), t0);
        hub.observe_at(&failed("b"), t0);
        hub.observe_at(&failed("c"), t0);

        assert_eq!(hub.len(), 3);
        assert!(hub.list().iter().all(|n| n.persistent));
    }

    #[test]
    fn test_conversions() {
        let hub = hub(50);
        let t0 = Utc::now();

        let success = hub.observe_at(&completed("wf"), t0).unwrap();
        assert_eq!(success.kind, NotificationKind::Success);
        assert!(!success.persistent);
        assert_eq!(success.expires_at, Some(t0 + Duration::seconds(10)));

        let failure = hub.observe_at(&failed("wf"), t0).unwrap();
        assert_eq!(failure.kind, NotificationKind::Error);
        assert!(failure.persistent);
        let actions: Vec<&str> = failure.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(actions, vec!["retry", "view_logs"]);

        let paused = WorkflowEvent::ExecutionPaused {
            execution_id: "e1".to_string(),
            workflow_id: "wf".to_string(),
            step_id: Some("s1".to_string()),
        };
        let paused = hub.observe_at(&paused, t0).unwrap();
        assert_eq!(paused.kind, NotificationKind::Warning);
        assert_eq!(paused.actions[0].name, "resume");
        assert_eq!(paused.step_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_only_critical_step_failures_notify() {
        let hub = hub(50);
        let step_failed = |severity| WorkflowEvent::StepFailed {
            execution_id: "e1".to_string(),
            workflow_id: "wf".to_string(),
            step_id: "s1".to_string(),
            error: WorkflowError::new("e1", "s1", ErrorType::System, severity, "fatal crash"),
        };

        assert!(hub.observe(&step_failed(Severity::High)).is_none());

        let critical = hub.observe(&step_failed(Severity::Critical)).unwrap();
        assert_eq!(critical.kind, NotificationKind::Error);
        assert!(critical.title.contains("s1"));
        assert_eq!(critical.actions[0].name, "investigate");
    }

    #[test]
    fn test_non_qualifying_events_ignored() {
        let hub = hub(50);
        let started = WorkflowEvent::ExecutionStarted {
            execution_id: "e1".to_string(),
            workflow_id: "wf".to_string(),
        };
        assert!(hub.observe(&started).is_none());

        let silent = WorkflowEvent::AlternativeSuggested {
            execution_id: "e1".to_string(),
            workflow_id: "wf".to_string(),
            step_id: "s1".to_string(),
            fallback_steps: vec![],
            notify_user: false,
        };
        assert!(hub.observe(&silent).is_none());
        assert!(hub.is_empty());
    }

    #[test]
    fn test_read_and_dismiss() {
        let hub = hub(50);
        let t0 = Utc::now();
        let a = hub.observe_at(&failed("a"), t0).unwrap();
        hub.observe_at(&failed("b"), t0);

        assert_eq!(hub.unread_count(), 2);
        assert!(hub.mark_read(&a.id));
        assert_eq!(hub.unread().len(), 1);

        hub.mark_all_read();
        assert_eq!(hub.unread_count(), 0);

        assert!(hub.dismiss(&a.id));
        assert!(!hub.dismiss(&a.id));
        assert_eq!(hub.len(), 1);

        hub.clear();
        assert!(hub.is_empty());
    }

    #[test]
    fn test_cleanup_expired_and_old() {
        let hub = hub(50);
        let t0 = Utc::now();
        hub.observe_at(&completed("wf"), t0);
        hub.observe_at(&failed("wf"), t0);

        assert_eq!(hub.cleanup(t0 + Duration::seconds(5)), 0);
        assert_eq!(hub.cleanup(t0 + Duration::seconds(11)), 1);
        assert_eq!(hub.len(), 1);

        assert_eq!(hub.cleanup(t0 + Duration::days(2)), 1);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_observe_drops_expired_notifications() {
        let hub = hub(50);
        let now = Utc::now();

        let stale = hub.observe_at(&completed("wf"), now - Duration::seconds(60)).unwrap();
        assert!(hub.list().is_empty());
        assert_eq!(hub.unread_count(), 0);

        let fresh = hub.observe_at(&completed("wf"), now).unwrap();
        assert_eq!(hub.len(), 1);
        let listed = hub.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);
        assert!(listed.iter().all(|n| n.id != stale.id));
    }

    #[test]
    fn test_observe_prunes_stale_throttle_keys() {
        let hub = hub(50);
        let t0 = Utc::now();

        hub.observe_at(&failed("a"), t0);
        hub.observe_at(&failed("b"), t0);
        assert_eq!(hub.lock().last_accepted.len(), 2);

        hub.observe_at(&failed("c"), t0 + Duration::seconds(6));
        let state = hub.lock();
        assert_eq!(state.last_accepted.len(), 1);
        assert_eq!(state.store.len(), 3);
    }

    #[tokio::test]
    async fn test_listener_follows_bus() {
        let bus = EventBus::new(16);
        let hub = Arc::new(NotificationHub::default());
        let handle = Arc::clone(&hub).spawn_listener(&bus);

        bus.publish(failed("wf"));
        drop(bus);
        handle.await.unwrap();

        assert_eq!(hub.len(), 1);
    }
}
