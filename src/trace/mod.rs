//! 事件派发记录（用于离线分析/回放）
//!
//! 设计目标：
//! - **结构化**：用 JSON 记录而不是解析文本日志
//! - **轻量**：只记录时间、序号与上下文，不持有事件本身

mod types;

pub use types::{DispatchLogger, DispatchRecord};
