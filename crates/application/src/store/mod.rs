//! 单向数据流的状态容器
//!
//! dispatch -> reducer -> selector。reducer 是纯函数，所有副作用都在
//! `bridge` 中完成。

pub mod action;
pub mod container;
pub mod reducer;
pub mod selectors;
pub mod state;

pub use action::RealtimeAction;
pub use container::Store;
pub use reducer::reduce;
pub use selectors::{Memoized, StatusIndicator};
pub use state::RealtimeState;
