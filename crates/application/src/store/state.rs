use domain::ConnectionState;

use crate::notification::NotificationFeed;
use crate::presence::PresenceRegistry;

/// 聚合状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealtimeState {
    pub connection_state: ConnectionState,
    pub reconnect_attempts: u32,
    pub online_users: PresenceRegistry,
    pub notifications: NotificationFeed,
    /// 最近一次终止性错误，重新连接成功后清除
    pub error: Option<String>,
}

impl RealtimeState {
    pub fn new() -> Self {
        Self::default()
    }
}
