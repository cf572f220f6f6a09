//! 仿真核心模块
//!
//! 此模块包含事件驱动仿真的核心组件，如仿真时间、事件、句柄、世界和仿真器。

// 子模块声明
mod error;
mod event;
mod id;
mod scheduled_event;
mod simulator;
mod time;
mod world;

// 重新导出公共接口
pub use error::{ActionError, ActionResult, SimError};
pub use event::Event;
pub use id::{ContextId, EventHandle, EventState};
pub use scheduled_event::ScheduledEvent;
pub use simulator::{RunSummary, Simulator};
pub use time::{Delay, SimTime};
pub use world::World;
