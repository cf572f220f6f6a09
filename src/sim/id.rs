//! 标识符类型
//!
//! 定义事件上下文（模拟节点）标识符与事件句柄。

use super::time::SimTime;

/// 事件上下文：把事件归属到某个“模拟节点”，只用于日志/统计，不影响排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl ContextId {
    /// 运行循环之外调度的事件所使用的上下文
    pub const NONE: ContextId = ContextId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::NONE
    }
}

/// 事件句柄：轻量、可复制，不持有事件本身。
///
/// 只能用来取消事件或查询其生命周期状态；事件本身始终归调度器所有。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    pub(crate) seq: u64,
    pub(crate) at: SimTime,
    pub(crate) context: ContextId,
}

impl EventHandle {
    /// 插入序号（同一个 `Simulator` 内严格递增、不复用）
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// 事件被调度到的绝对时间
    pub fn at(&self) -> SimTime {
        self.at
    }

    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// 事件生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventState {
    Pending,
    Running,
    Executed,
    Cancelled,
}

impl EventState {
    /// `Executed` 和 `Cancelled` 是终态
    pub fn is_expired(self) -> bool {
        matches!(self, EventState::Executed | EventState::Cancelled)
    }
}
