//! 领域模型错误定义
//!
//! 入站载荷在进入纯状态层之前的所有失败都归到这里。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 通道事件名未知
    #[error("未知通道事件: {event}")]
    UnknownEvent { event: String },

    /// 载荷格式错误
    #[error("载荷格式错误: {event}: {message}")]
    MalformedPayload { event: String, message: String },
}

impl DomainError {
    /// 创建未知事件错误
    pub fn unknown_event(event: impl Into<String>) -> Self {
        Self::UnknownEvent {
            event: event.into(),
        }
    }

    /// 创建载荷格式错误
    pub fn malformed_payload(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            event: event.into(),
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
