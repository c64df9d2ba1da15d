use domain::ConnectionState;

use super::action::RealtimeAction;
use super::state::RealtimeState;

/// 纯函数 `(state, action) -> state`
///
/// 对所有动作都有定义，不产生状态变化的动作原样返回输入。
pub fn reduce(mut state: RealtimeState, action: &RealtimeAction) -> RealtimeState {
    match action {
        RealtimeAction::ConnectRequested => {
            state.error = None;
        }
        RealtimeAction::DisconnectRequested | RealtimeAction::UpdateLocalPresence(_) => {}
        RealtimeAction::ClearNotifications => state.notifications.clear(),
        RealtimeAction::RemoveNotification { id } => {
            state.notifications.remove(id);
        }
        RealtimeAction::AnnouncePresence {
            user_id,
            username,
            status,
        } => {
            state
                .online_users
                .announce(user_id.clone(), username.clone(), *status);
        }
        RealtimeAction::Reset => return RealtimeState::default(),
        RealtimeAction::ConnectionStateChanged { state: next, attempts } => {
            state.connection_state = *next;
            state.reconnect_attempts = *attempts;
            if *next == ConnectionState::Connected {
                state.error = None;
            }
        }
        RealtimeAction::ConnectionFailed { message } => {
            state.error = Some(message.clone());
        }
        RealtimeAction::UserJoined(user) => {
            state.online_users.on_join(user.clone());
        }
        RealtimeAction::UserLeft { user_id } => {
            state.online_users.on_leave(user_id);
        }
        RealtimeAction::PresenceSynced(users) => {
            state.online_users.on_full_sync(users.clone());
        }
        RealtimeAction::PresenceChanged {
            presence,
            observed_at,
        } => {
            state
                .online_users
                .apply_presence_change(presence.clone(), *observed_at);
        }
        RealtimeAction::NotificationReceived(notification) => {
            state.notifications.append(notification.clone());
        }
    }
    state
}
