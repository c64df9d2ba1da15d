//! 应用层实现。
//!
//! 实时同步核心：传输端口、连接管理、在线状态登记、通知流、
//! 纯函数状态容器，以及把它们连在一起的事件桥。

pub mod backoff;
pub mod bridge;
pub mod client;
pub mod clock;
pub mod connection;
pub mod error;
pub mod notification;
pub mod presence;
pub mod store;
pub mod transport;

pub use backoff::Backoff;
pub use bridge::{
    action_for_event, intent_for_action, BridgeHandle, EventBridge, SyncRequest, TransportIntent,
};
pub use client::RealtimeClient;
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{ConnectionManager, EventStream, Transition};
pub use error::ConnectionError;
pub use notification::NotificationFeed;
pub use presence::PresenceRegistry;
pub use store::{selectors, Memoized, RealtimeAction, RealtimeState, StatusIndicator, Store};
pub use transport::{Connector, Frame, RemoteEnd, TransportError, TransportLink};
