//! 基础设施层实现。
//!
//! 提供传输端口的 WebSocket 适配器，以及从配置组装实时客户端的构建器。

pub mod builder;
pub mod websocket;

pub use builder::{Infrastructure, InfrastructureError};
pub use websocket::{with_query_token, WebSocketConnector};
