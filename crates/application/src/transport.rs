//! 传输层端口
//!
//! 核心只认识“事件名 + JSON 载荷”的帧和一对收发通道，具体的线路实现
//! （WebSocket 等）由基础设施层提供。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// 通道上的一帧：`{"event": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// 已建立的一条链路（客户端一侧）
///
/// `inbound` 返回 `None` 表示链路被对端或网络关闭；丢弃 `outbound`
/// 表示本端主动关闭。
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// 链路的另一端，由传输实现（或测试）持有
#[derive(Debug)]
pub struct RemoteEnd {
    /// 客户端发出的帧
    pub sent: mpsc::Receiver<Frame>,
    /// 向客户端投递帧
    pub deliver: mpsc::Sender<Frame>,
}

impl TransportLink {
    /// 创建一对相连的链路端点
    pub fn pair(buffer: usize) -> (TransportLink, RemoteEnd) {
        let (outbound, sent) = mpsc::channel(buffer);
        let (deliver, inbound) = mpsc::channel(buffer);
        (
            TransportLink { outbound, inbound },
            RemoteEnd { sent, deliver },
        )
    }
}

/// 传输层错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("channel closed")]
    Closed,
}

/// 建立链路的能力
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<TransportLink, TransportError>;
}
