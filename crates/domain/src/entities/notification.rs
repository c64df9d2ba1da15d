//! 实时通知实体定义

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知流最多保留的条数
pub const MAX_NOTIFICATIONS: usize = 50;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::Info => write!(f, "info"),
            NotificationType::Success => write!(f, "success"),
            NotificationType::Warning => write!(f, "warning"),
            NotificationType::Error => write!(f, "error"),
        }
    }
}

/// 实时通知，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeNotification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl RealtimeNotification {
    /// 创建新通知
    pub fn new(
        id: NotificationId,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            notification_type,
            title: title.into(),
            message: message.into(),
            timestamp,
            user_id: None,
            username: None,
            action_url: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.username = Some(username.into());
        self
    }

    pub fn with_action_url(mut self, action_url: impl Into<String>) -> Self {
        self.action_url = Some(action_url.into());
        self
    }
}

/// `chapter-completed` 事件载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCompleted {
    pub user_id: UserId,
    pub username: String,
    pub chapter_id: String,
    pub chapter_title: String,
    pub timestamp: Timestamp,
}

impl ChapterCompleted {
    /// 规范化为通知流中的条目
    pub fn into_notification(self, id: NotificationId) -> RealtimeNotification {
        let message = format!("{} completed {}", self.username, self.chapter_title);
        let action_url = format!("/chapters/{}", self.chapter_id);
        RealtimeNotification::new(
            id,
            NotificationType::Success,
            "Chapter completed",
            message,
            self.timestamp,
        )
        .with_user(self.user_id, self.username)
        .with_action_url(action_url)
    }
}
