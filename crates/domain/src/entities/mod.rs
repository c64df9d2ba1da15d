//! 领域实体定义
//!
//! 包含连接状态、在线用户、实时通知。

pub mod connection;
pub mod notification;
pub mod presence;

// 重新导出核心实体
pub use connection::ConnectionState;
pub use notification::{
    ChapterCompleted, NotificationType, RealtimeNotification, MAX_NOTIFICATIONS,
};
pub use presence::{OnlineUser, PresenceUpdate, UserPresence, UserStatus};
