//! 通道入站事件
//!
//! 传输层以字符串事件名 + JSON 载荷的形式投递事件，这里把已知事件
//! 收敛为可穷举匹配的枚举，未知事件名与格式错误的载荷在此处被拒绝。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::entities::{ChapterCompleted, RealtimeNotification, UserPresence};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::UserId;

/// 出站事件名
pub mod outbound {
    /// 本地用户在线信息变更
    pub const UPDATE_PRESENCE: &str = "update-presence";
    /// 请求服务端下发全量在线列表
    pub const REQUEST_PRESENCE_SYNC: &str = "request-presence-sync";
}

/// 已知的入站事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    UserJoined,
    UserLeft,
    PresenceUpdate,
    Notification,
    ChapterCompleted,
}

impl ChannelEventKind {
    /// 全部入站事件类型
    pub const ALL: [ChannelEventKind; 5] = [
        ChannelEventKind::UserJoined,
        ChannelEventKind::UserLeft,
        ChannelEventKind::PresenceUpdate,
        ChannelEventKind::Notification,
        ChannelEventKind::ChapterCompleted,
    ];

    /// 通道上的事件名
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEventKind::UserJoined => "user-joined",
            ChannelEventKind::UserLeft => "user-left",
            ChannelEventKind::PresenceUpdate => "presence-update",
            ChannelEventKind::Notification => "notification",
            ChannelEventKind::ChapterCompleted => "chapter-completed",
        }
    }
}

impl fmt::Display for ChannelEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelEventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::unknown_event(s))
    }
}

/// `user-left` 载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: UserId,
}

/// 入站通道事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// 用户加入
    UserJoined(UserPresence),
    /// 用户离开
    UserLeft { user_id: UserId },
    /// 全量在线列表（权威替换）
    PresenceSynced(Vec<UserPresence>),
    /// 单个用户的在线信息变更
    PresenceChanged(UserPresence),
    /// 服务端推送的通知
    Notification(RealtimeNotification),
    /// 有用户完成章节
    ChapterCompleted(ChapterCompleted),
}

impl ChannelEvent {
    /// 按事件类型解码载荷
    pub fn decode(kind: ChannelEventKind, payload: Value) -> DomainResult<Self> {
        let malformed = |err: serde_json::Error| DomainError::malformed_payload(kind.as_str(), err.to_string());

        let event = match kind {
            ChannelEventKind::UserJoined => {
                ChannelEvent::UserJoined(serde_json::from_value(payload).map_err(malformed)?)
            }
            ChannelEventKind::UserLeft => {
                let left: UserLeft = serde_json::from_value(payload).map_err(malformed)?;
                ChannelEvent::UserLeft {
                    user_id: left.user_id,
                }
            }
            ChannelEventKind::PresenceUpdate => match payload {
                Value::Array(_) => {
                    ChannelEvent::PresenceSynced(serde_json::from_value(payload).map_err(malformed)?)
                }
                Value::Object(_) => {
                    ChannelEvent::PresenceChanged(serde_json::from_value(payload).map_err(malformed)?)
                }
                other => {
                    return Err(DomainError::malformed_payload(
                        kind.as_str(),
                        format!("expected array or object, got {other}"),
                    ))
                }
            },
            ChannelEventKind::Notification => {
                ChannelEvent::Notification(serde_json::from_value(payload).map_err(malformed)?)
            }
            ChannelEventKind::ChapterCompleted => {
                ChannelEvent::ChapterCompleted(serde_json::from_value(payload).map_err(malformed)?)
            }
        };

        Ok(event)
    }

    /// 按事件名解码，未知事件名返回错误
    pub fn decode_named(event: &str, payload: Value) -> DomainResult<Self> {
        let kind = event.parse::<ChannelEventKind>()?;
        Self::decode(kind, payload)
    }

    /// 获取事件类型
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::UserJoined(_) => ChannelEventKind::UserJoined,
            ChannelEvent::UserLeft { .. } => ChannelEventKind::UserLeft,
            ChannelEvent::PresenceSynced(_) | ChannelEvent::PresenceChanged(_) => {
                ChannelEventKind::PresenceUpdate
            }
            ChannelEvent::Notification(_) => ChannelEventKind::Notification,
            ChannelEvent::ChapterCompleted(_) => ChannelEventKind::ChapterCompleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ChannelEventKind::ALL {
            assert_eq!(kind.as_str().parse::<ChannelEventKind>().unwrap(), kind);
        }
        assert!("typing".parse::<ChannelEventKind>().is_err());
    }

    #[test]
    fn test_presence_update_array_is_full_sync() {
        let event = ChannelEvent::decode(
            ChannelEventKind::PresenceUpdate,
            json!([
                {"userId": "u1", "username": "Alice", "status": "online"},
                {"userId": "u2", "username": "Bob", "status": "away"}
            ]),
        )
        .unwrap();

        match event {
            ChannelEvent::PresenceSynced(users) => assert_eq!(users.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_presence_update_object_is_change() {
        let event = ChannelEvent::decode(
            ChannelEventKind::PresenceUpdate,
            json!({"userId": "u1", "username": "Alice", "status": "away"}),
        )
        .unwrap();
        assert!(matches!(event, ChannelEvent::PresenceChanged(_)));
        assert_eq!(event.kind(), ChannelEventKind::PresenceUpdate);
    }

    #[test]
    fn test_user_left_payload() {
        let event = ChannelEvent::decode_named("user-left", json!({"userId": "u9"})).unwrap();
        assert_eq!(
            event,
            ChannelEvent::UserLeft {
                user_id: UserId::from("u9")
            }
        );
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let err = ChannelEvent::decode(ChannelEventKind::UserJoined, json!({"username": 42}))
            .unwrap_err();
        assert!(matches!(err, DomainError::MalformedPayload { .. }));

        let err = ChannelEvent::decode(ChannelEventKind::PresenceUpdate, json!("nope")).unwrap_err();
        assert!(matches!(err, DomainError::MalformedPayload { .. }));
    }

    #[test]
    fn test_unknown_event_name() {
        let err = ChannelEvent::decode_named("typing", json!({})).unwrap_err();
        assert_eq!(err, DomainError::unknown_event("typing"));
    }
}
