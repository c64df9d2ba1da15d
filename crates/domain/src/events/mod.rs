//! 领域事件定义
//!
//! 通道上的事件名在这里收敛为封闭的联合类型

pub mod channel_event;

// 重新导出事件类型
pub use channel_event::*;
