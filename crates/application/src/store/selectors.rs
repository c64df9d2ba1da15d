//! 只读派生视图

use domain::{ConnectionState, OnlineUser, RealtimeNotification, Timestamp};

use super::state::RealtimeState;

pub fn is_connected(state: &RealtimeState) -> bool {
    state.connection_state.is_connected()
}

pub fn online_count(state: &RealtimeState) -> usize {
    state.online_users.len()
}

pub fn online_users(state: &RealtimeState) -> &[OnlineUser] {
    state.online_users.users()
}

/// 最近 n 条通知，最新的在前
pub fn recent_notifications(state: &RealtimeState, n: usize) -> Vec<RealtimeNotification> {
    state.notifications.recent(n).cloned().collect()
}

/// 晚于 `since` 的通知条数
pub fn unread_count(state: &RealtimeState, since: Timestamp) -> usize {
    state.notifications.count_since(since)
}

/// 连接状态指示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    Connected,
    Connecting,
    Reconnecting { attempt: u32 },
    Offline,
}

pub fn status_indicator(state: &RealtimeState) -> StatusIndicator {
    match state.connection_state {
        ConnectionState::Connected => StatusIndicator::Connected,
        ConnectionState::Connecting => StatusIndicator::Connecting,
        ConnectionState::Reconnecting => StatusIndicator::Reconnecting {
            attempt: state.reconnect_attempts,
        },
        ConnectionState::Disconnected | ConnectionState::Disconnecting => StatusIndicator::Offline,
    }
}

/// 以容器版本号为键的缓存选择器
///
/// 版本号不变时直接返回上次结果，不重新计算。
pub struct Memoized<T> {
    select: Box<dyn Fn(&RealtimeState) -> T + Send + Sync>,
    cached: Option<(u64, T)>,
}

impl<T> Memoized<T> {
    pub fn new(select: impl Fn(&RealtimeState) -> T + Send + Sync + 'static) -> Self {
        Self {
            select: Box::new(select),
            cached: None,
        }
    }

    pub fn get(&mut self, revision: u64, state: &RealtimeState) -> &T {
        if self.cached.as_ref().map(|(cached, _)| *cached) != Some(revision) {
            self.cached = None;
        }
        let select = &self.select;
        let (_, value) = self.cached.get_or_insert_with(|| (revision, select(state)));
        value
    }
}
