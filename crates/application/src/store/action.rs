use domain::{
    ConnectionState, NotificationId, OnlineUser, PresenceUpdate, RealtimeNotification, Timestamp,
    UserId, UserPresence, UserStatus,
};

/// 封闭的动作集合
///
/// 前半部分是界面发起的意图，后半部分由桥接层根据连接与入站事件产生。
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeAction {
    ConnectRequested,
    DisconnectRequested,
    ClearNotifications,
    RemoveNotification {
        id: NotificationId,
    },
    AnnouncePresence {
        user_id: UserId,
        username: String,
        status: UserStatus,
    },
    /// 本地用户的后续在线信息变更（状态、章节）
    UpdateLocalPresence(PresenceUpdate),
    /// 会话结束时恢复初始状态
    Reset,

    ConnectionStateChanged {
        state: ConnectionState,
        attempts: u32,
    },
    ConnectionFailed {
        message: String,
    },
    UserJoined(OnlineUser),
    UserLeft {
        user_id: UserId,
    },
    PresenceSynced(Vec<OnlineUser>),
    PresenceChanged {
        presence: UserPresence,
        observed_at: Timestamp,
    },
    NotificationReceived(RealtimeNotification),
}

impl RealtimeAction {
    /// 日志用的动作名
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeAction::ConnectRequested => "connect-requested",
            RealtimeAction::DisconnectRequested => "disconnect-requested",
            RealtimeAction::ClearNotifications => "clear-notifications",
            RealtimeAction::RemoveNotification { .. } => "remove-notification",
            RealtimeAction::AnnouncePresence { .. } => "announce-presence",
            RealtimeAction::UpdateLocalPresence(_) => "update-local-presence",
            RealtimeAction::Reset => "reset",
            RealtimeAction::ConnectionStateChanged { .. } => "connection-state-changed",
            RealtimeAction::ConnectionFailed { .. } => "connection-failed",
            RealtimeAction::UserJoined(_) => "user-joined",
            RealtimeAction::UserLeft { .. } => "user-left",
            RealtimeAction::PresenceSynced(_) => "presence-synced",
            RealtimeAction::PresenceChanged { .. } => "presence-changed",
            RealtimeAction::NotificationReceived(_) => "notification-received",
        }
    }
}
