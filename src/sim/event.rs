//! 事件 trait
//!
//! 定义仿真事件接口，以及把闭包包装成事件的适配器。

use super::error::ActionResult;
use super::simulator::Simulator;
use super::world::World;

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
///
/// 返回 `Err` 会中止 `Simulator::run`，错误原样交给调用方。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult;
}

/// 闭包事件（由 `Simulator::schedule_fn*` 构造）
pub(crate) struct FnEvent<F>(pub(crate) F);

impl<F> Event for FnEvent<F>
where
    F: FnOnce(&mut Simulator, &mut dyn World) -> ActionResult + Send + 'static,
{
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        (self.0)(sim, world)
    }
}
