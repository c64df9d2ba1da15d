//! 实时同步核心领域模型
//!
//! 包含在线用户、实时通知、连接状态等核心实体，以及通道事件的封闭联合类型。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
