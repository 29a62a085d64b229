//! Notification records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    Info,
}

/// Named action a user can take from a notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub name: String,
    pub label: String,
}

impl NotificationAction {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// A user-facing notification.
///
/// Non-persistent notifications are dropped on expiry or under capacity
/// pressure; persistent ones stay until dismissed or too old.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub workflow_id: String,
    pub execution_id: Option<String>,
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub persistent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

impl WorkflowNotification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            workflow_id: workflow_id.into(),
            execution_id: None,
            step_id: None,
            timestamp: Utc::now(),
            read: false,
            persistent: false,
            expires_at: None,
            actions: Vec::new(),
        }
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_action(mut self, name: &str, label: &str) -> Self {
        self.actions.push(NotificationAction::new(name, label));
        self
    }

    /// True once a non-persistent notification is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.persistent && self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder() {
        let n = WorkflowNotification::new(NotificationKind::Error, "Failed", "boom", "wf")
            .with_execution("e1")
            .with_step("s1")
            .persistent()
            .with_action("retry", "Retry");

        assert!(n.persistent);
        assert!(!n.read);
        assert_eq!(n.step_id.as_deref(), Some("s1"));
        assert_eq!(n.actions[0].name, "retry");
    }

    #[test]
    fn test_expiry_ignores_persistent() {
        let now = Utc::now();
        let n = WorkflowNotification::new(NotificationKind::Success, "Done", "ok", "wf")
            .expiring_at(now - Duration::seconds(1));
        assert!(n.is_expired(now));
        assert!(!n.persistent().is_expired(now));
    }

    #[test]
    fn test_serializes_kind_as_type() {
        let n = WorkflowNotification::new(NotificationKind::Info, "t", "m", "wf");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "info");
    }
}
