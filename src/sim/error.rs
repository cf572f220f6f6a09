//! 调度器错误类型

use super::id::ContextId;
use super::time::{Delay, SimTime};
use thiserror::Error;

/// 事件动作返回的错误（类型擦除）。
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 事件动作的返回值。
pub type ActionResult = Result<(), ActionError>;

/// 调度器错误
#[derive(Debug, Error)]
pub enum SimError {
    /// 负时延（调度到过去）或时间溢出；调度器状态不变。
    #[error("invalid delay {delay:?}: events cannot be scheduled in the past or beyond the end of time")]
    InvalidDelay { delay: Delay },

    /// 某个事件动作返回了错误；运行循环在此处终止，时钟停在该事件时间。
    #[error("event seq={seq} (context {context:?}) failed at {at}")]
    ActionFailed {
        at: SimTime,
        seq: u64,
        context: ContextId,
        #[source]
        source: ActionError,
    },

    /// 句柄来自 `destroy` 之前的一次运行。
    #[error("event handle seq={seq} belongs to a simulation that was destroyed")]
    UseAfterDestroy { seq: u64 },

    /// 在事件动作内部调用了 `run`/`destroy` 等不可重入操作。
    #[error("`{op}` cannot be called from inside a running event")]
    Reentrant { op: &'static str },
}

impl SimError {
    /// 失败发生时的仿真时间（仅对 `ActionFailed` 有意义）
    pub fn failed_at(&self) -> Option<SimTime> {
        match self {
            SimError::ActionFailed { at, .. } => Some(*at),
            _ => None,
        }
    }
}
