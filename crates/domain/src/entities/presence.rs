//! 在线状态实体定义

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::{Timestamp, UserId};

/// 用户在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Online,
    Away,
    Offline,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Online => write!(f, "online"),
            UserStatus::Away => write!(f, "away"),
            UserStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 服务端下发的用户在线信息（`user-joined` / `presence-update` 载荷）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Timestamp>,
}

/// 本地维护的在线用户条目
///
/// 集合以 `user_id` 为键，同一ID至多一条。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub current_chapter: Option<String>,
    pub joined_at: Timestamp,
    pub last_activity: Timestamp,
}

impl OnlineUser {
    /// 由入站载荷构造条目，`now` 作为加入时间
    pub fn from_presence(presence: UserPresence, now: Timestamp) -> Self {
        Self {
            user_id: presence.user_id,
            username: presence.username,
            status: presence.status,
            current_chapter: presence.current_chapter,
            joined_at: now,
            last_activity: presence.last_seen.unwrap_or(now),
        }
    }
}

/// 出站的部分在线信息（`update-presence` 载荷），至少包含 `userId`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<String>,
}

impl PresenceUpdate {
    /// 宣告本地用户上线
    pub fn announce(user_id: UserId, username: impl Into<String>, status: UserStatus) -> Self {
        Self {
            user_id,
            username: Some(username.into()),
            status: Some(status),
            last_seen: None,
            current_chapter: None,
        }
    }

    pub fn status(user_id: UserId, status: UserStatus) -> Self {
        Self {
            user_id,
            username: None,
            status: Some(status),
            last_seen: None,
            current_chapter: None,
        }
    }

    pub fn chapter(user_id: UserId, chapter_id: impl Into<String>) -> Self {
        Self {
            user_id,
            username: None,
            status: None,
            last_seen: None,
            current_chapter: Some(chapter_id.into()),
        }
    }

    pub fn with_last_seen(mut self, last_seen: Timestamp) -> Self {
        self.last_seen = Some(last_seen);
        self
    }
}
