//! 世界 trait
//!
//! 定义仿真世界接口。

use super::simulator::Simulator;
use std::any::Any;

/// 仿真世界：由业务层实现（例如节点状态/统计等）。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// 每个事件执行完后调用一次
    fn on_tick(&mut self, _sim: &mut Simulator) {}
}

/// 不需要业务状态的仿真可以直接用 `()` 作为世界。
impl World for () {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
