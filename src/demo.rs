//! 演示场景
//!
//! 环形拓扑上的周期信标 + 邻居存活超时：每个节点周期性地向后继节点发送信标，
//! 收到信标的节点取消旧的超时事件并重新布置一个。节点失效后，其后继节点的超时
//! 最终触发并记录一次 `NeighborLost`。

use crate::sim::{
    ActionError, ActionResult, ContextId, Delay, Event, EventHandle, SimError, SimTime, Simulator,
    World,
};
use crate::trace::DispatchLogger;
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;
use tracing::{debug, info};

/// 场景构建错误
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// 信标场景配置选项
#[derive(Debug, Clone)]
pub struct BeaconOpts {
    pub nodes: u32,
    pub period: Delay,
    pub timeout: Delay,
    pub link_delay: Delay,
    pub until: SimTime,
    /// (节点, 失效时间)
    pub failures: Vec<(u32, SimTime)>,
}

impl Default for BeaconOpts {
    fn default() -> Self {
        Self {
            nodes: 4,
            period: Delay::from_micros(100),
            timeout: Delay::from_micros(250),
            link_delay: Delay::from_micros(2),
            until: SimTime::from_millis(10),
            failures: Vec::new(),
        }
    }
}

impl BeaconOpts {
    pub fn validate(&self) -> Result<(), DemoError> {
        if self.nodes < 2 {
            return Err(DemoError::InvalidScenario(format!(
                "need at least 2 nodes, got {}",
                self.nodes
            )));
        }
        if self.period.0 <= 0 {
            return Err(DemoError::InvalidScenario("period must be positive".into()));
        }
        if self.link_delay.is_negative() {
            return Err(DemoError::InvalidScenario(
                "link delay must not be negative".into(),
            ));
        }
        if self.timeout <= self.period {
            return Err(DemoError::InvalidScenario(
                "timeout must be longer than the beacon period".into(),
            ));
        }
        if let Some((node, _)) = self.failures.iter().find(|(n, _)| *n >= self.nodes) {
            return Err(DemoError::InvalidScenario(format!(
                "failure refers to unknown node {node}"
            )));
        }
        Ok(())
    }
}

fn micros(us: u64) -> Delay {
    Delay::from_micros(i64::try_from(us).unwrap_or(i64::MAX))
}

/// 场景文件（JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub schema_version: u32,
    pub nodes: u32,
    pub period_us: u64,
    pub timeout_us: u64,
    #[serde(default)]
    pub link_delay_us: Option<u64>,
    #[serde(default)]
    pub until_ms: Option<u64>,
    #[serde(default)]
    pub failures: Vec<FailureSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSpec {
    pub node: u32,
    pub at_us: u64,
}

impl TryFrom<&ScenarioSpec> for BeaconOpts {
    type Error = DemoError;

    fn try_from(spec: &ScenarioSpec) -> Result<Self, Self::Error> {
        if spec.schema_version != 1 {
            return Err(DemoError::InvalidScenario(format!(
                "unsupported schema_version {}",
                spec.schema_version
            )));
        }
        let defaults = BeaconOpts::default();
        let opts = BeaconOpts {
            nodes: spec.nodes,
            period: micros(spec.period_us),
            timeout: micros(spec.timeout_us),
            link_delay: spec.link_delay_us.map_or(defaults.link_delay, micros),
            until: spec.until_ms.map_or(defaults.until, SimTime::from_millis),
            failures: spec
                .failures
                .iter()
                .map(|f| (f.node, SimTime::from_micros(f.at_us)))
                .collect(),
        };
        opts.validate()?;
        Ok(opts)
    }
}

/// 单个节点的状态
#[derive(Debug, Default)]
pub struct BeaconNode {
    pub alive: bool,
    pub beacons_sent: u64,
    pub beacons_received: u64,
    /// 当前布置的邻居超时事件
    pub timeout: Option<EventHandle>,
}

/// 某节点判定前驱邻居失联
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborLost {
    pub node: u32,
    pub neighbor: u32,
    pub at_ns: u64,
}

/// 信标场景的世界
#[derive(Debug, Default)]
pub struct BeaconWorld {
    pub nodes: Vec<BeaconNode>,
    pub period: Delay,
    pub timeout: Delay,
    pub link_delay: Delay,
    pub lost: Vec<NeighborLost>,
    /// 销毁钩子执行时仍在等待的超时数量
    pub torn_down: Option<usize>,
    pub trace: Option<DispatchLogger>,
}

impl World for BeaconWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_tick(&mut self, sim: &mut Simulator) {
        if let Some(trace) = self.trace.as_mut() {
            trace.record_last(sim, None);
        }
    }
}

impl BeaconWorld {
    fn successor(&self, node: u32) -> u32 {
        (node + 1) % self.nodes.len() as u32
    }

    fn predecessor(&self, node: u32) -> u32 {
        let n = self.nodes.len() as u32;
        (node + n - 1) % n
    }

    fn node_mut(&mut self, node: u32) -> &mut BeaconNode {
        &mut self.nodes[node as usize]
    }

    pub fn total_sent(&self) -> u64 {
        self.nodes.iter().map(|n| n.beacons_sent).sum()
    }

    pub fn total_received(&self) -> u64 {
        self.nodes.iter().map(|n| n.beacons_received).sum()
    }
}

fn beacon_world(world: &mut dyn World) -> Result<&mut BeaconWorld, ActionError> {
    world
        .as_any_mut()
        .downcast_mut::<BeaconWorld>()
        .ok_or_else(|| "world must be BeaconWorld".into())
}

/// 布置场景：创建节点、启动信标、布置初始超时、安排失效与停止时间。
pub fn install(
    sim: &mut Simulator,
    world: &mut BeaconWorld,
    opts: &BeaconOpts,
) -> Result<(), DemoError> {
    opts.validate()?;

    world.nodes = (0..opts.nodes)
        .map(|_| BeaconNode {
            alive: true,
            ..Default::default()
        })
        .collect();
    world.period = opts.period;
    world.timeout = opts.timeout;
    world.link_delay = opts.link_delay;

    for node in 0..opts.nodes {
        let ctx = ContextId(node);
        sim.schedule_now_with_context(ctx, SendBeacon { node })?;
        let neighbor = world.predecessor(node);
        let h = sim.schedule_with_context(ctx, opts.timeout, NeighborTimeout { node, neighbor })?;
        world.node_mut(node).timeout = Some(h);
    }
    for &(node, at) in &opts.failures {
        let delay = at.saturating_since(sim.now());
        sim.schedule_with_context(ContextId(node), delay, FailNode { node })?;
    }
    sim.schedule_destroy(TearDown)?;
    sim.stop_after(opts.until.saturating_since(sim.now()))?;

    info!(nodes = opts.nodes, until = ?opts.until, "信标场景已布置");
    Ok(())
}

/// 事件：节点发送一个信标，并调度下一次发送。
#[derive(Debug)]
pub struct SendBeacon {
    pub node: u32,
}

impl Event for SendBeacon {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        let SendBeacon { node } = *self;
        let w = beacon_world(world)?;
        if !w.nodes[node as usize].alive {
            return Ok(());
        }
        w.node_mut(node).beacons_sent += 1;

        let to = w.successor(node);
        sim.schedule_with_context(ContextId(to), w.link_delay, ReceiveBeacon { from: node, to })?;
        sim.schedule(w.period, SendBeacon { node })?;
        debug!(node, to, now = ?sim.now(), "📡 发送信标");
        Ok(())
    }
}

/// 事件：信标到达，刷新邻居超时。
#[derive(Debug)]
pub struct ReceiveBeacon {
    pub from: u32,
    pub to: u32,
}

impl Event for ReceiveBeacon {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        let ReceiveBeacon { from, to } = *self;
        let w = beacon_world(world)?;
        let timeout = w.timeout;
        let n = w.node_mut(to);
        if !n.alive {
            return Ok(());
        }
        n.beacons_received += 1;
        if let Some(h) = n.timeout.take() {
            sim.cancel(h)?;
        }
        n.timeout = Some(sim.schedule(timeout, NeighborTimeout { node: to, neighbor: from })?);
        Ok(())
    }
}

/// 事件：邻居超时触发，判定前驱失联。
#[derive(Debug)]
pub struct NeighborTimeout {
    pub node: u32,
    pub neighbor: u32,
}

impl Event for NeighborTimeout {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        let NeighborTimeout { node, neighbor } = *self;
        let w = beacon_world(world)?;
        w.node_mut(node).timeout = None;
        w.lost.push(NeighborLost {
            node,
            neighbor,
            at_ns: sim.now().0,
        });
        info!(node, neighbor, now = ?sim.now(), "⚠️  邻居失联");
        Ok(())
    }
}

/// 事件：节点失效，停止发送并撤销自己的超时。
#[derive(Debug)]
pub struct FailNode {
    pub node: u32,
}

impl Event for FailNode {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        let FailNode { node } = *self;
        let w = beacon_world(world)?;
        let n = w.node_mut(node);
        n.alive = false;
        if let Some(h) = n.timeout.take() {
            sim.cancel(h)?;
        }
        info!(node, now = ?sim.now(), "💥 节点失效");
        Ok(())
    }
}

/// 销毁钩子：统计仍在等待的超时
#[derive(Debug)]
pub struct TearDown;

impl Event for TearDown {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) -> ActionResult {
        let w = beacon_world(world)?;
        let outstanding = w
            .nodes
            .iter()
            .filter_map(|n| n.timeout)
            .filter(|h| !sim.is_expired(*h))
            .count();
        w.torn_down = Some(outstanding);
        debug!(outstanding, "销毁钩子执行");
        Ok(())
    }
}
