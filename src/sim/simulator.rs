//! 仿真器
//!
//! 定义事件驱动仿真器：维护当前时间、事件队列、取消标记与停止边界。
//!
//! 取消采用惰性删除：被取消的事件留在堆里作为墓碑，出队时跳过并回收；
//! 墓碑超过堆大小一半时整体压缩一次。墓碑集合的大小因此以堆大小为上界，
//! 与累计取消次数无关。

use super::error::{ActionResult, SimError};
use super::event::{Event, FnEvent};
use super::id::{ContextId, EventHandle, EventState};
use super::scheduled_event::ScheduledEvent;
use super::time::{Delay, SimTime};
use super::world::World;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, trace, warn};

/// 墓碑数量低于该值时不做压缩
const COMPACT_MIN_TOMBSTONES: usize = 64;

/// 一次 `run` 的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 本次执行的事件数
    pub executed: u64,
    /// 出队时被跳过的已取消事件数
    pub skipped_cancelled: u64,
    /// 返回时的仿真时间
    pub final_time: SimTime,
    /// 停止边界之后仍有未执行的事件
    pub stopped_early: bool,
}

/// 事件驱动仿真器：维护当前时间与事件队列。
#[derive(Default)]
pub struct Simulator {
    now: SimTime,
    next_seq: u64,
    /// 当前这次仿真（最近一次 `destroy` 之后）的第一个序号
    epoch_start: u64,
    q: BinaryHeap<ScheduledEvent>,
    /// 仍在等待执行的事件（含销毁钩子）
    pending: HashSet<u64>,
    /// 仍留在堆中的已取消事件（墓碑）
    cancelled: HashSet<u64>,
    /// 已取消的销毁钩子，`destroy` 时清空
    cancelled_hooks: HashSet<u64>,
    destroy_q: VecDeque<ScheduledEvent>,
    running: Option<EventHandle>,
    last_dispatched: Option<EventHandle>,
    stop_at: Option<SimTime>,
    in_run: bool,
    executed: u64,
    cancelled_count: u64,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 当前正在执行的事件的上下文；运行循环之外为 `ContextId::NONE`。
    pub fn context(&self) -> ContextId {
        self.running.map_or(ContextId::NONE, |h| h.context)
    }

    /// 当前正在执行的事件
    pub fn current_event(&self) -> Option<EventHandle> {
        self.running
    }

    /// 最近一次执行完的事件（供 `World::on_tick` 记录）
    pub fn last_dispatched(&self) -> Option<EventHandle> {
        self.last_dispatched
    }

    /// 调度事件在 `delay` 之后执行，上下文继承自当前事件。
    pub fn schedule<E: Event>(&mut self, delay: Delay, ev: E) -> Result<EventHandle, SimError> {
        let ctx = self.context();
        self.schedule_with_context(ctx, delay, ev)
    }

    /// 调度事件在 `delay` 之后执行，并显式指定上下文。
    #[tracing::instrument(skip(self, ev), fields(event_type = std::any::type_name::<E>()))]
    pub fn schedule_with_context<E: Event>(
        &mut self,
        ctx: ContextId,
        delay: Delay,
        ev: E,
    ) -> Result<EventHandle, SimError> {
        let Some(at) = self.now.checked_add_delay(delay) else {
            warn!(now = ?self.now, ?delay, "拒绝调度：非法时延");
            return Err(SimError::InvalidDelay { delay });
        };
        Ok(self.insert(at, ctx, Box::new(ev)))
    }

    /// 调度事件在当前时间执行（排在所有同一时刻已有事件之后）。
    pub fn schedule_now<E: Event>(&mut self, ev: E) -> Result<EventHandle, SimError> {
        self.schedule(Delay::ZERO, ev)
    }

    pub fn schedule_now_with_context<E: Event>(
        &mut self,
        ctx: ContextId,
        ev: E,
    ) -> Result<EventHandle, SimError> {
        self.schedule_with_context(ctx, Delay::ZERO, ev)
    }

    /// 调度事件在绝对时间 `at` 执行；`at` 早于当前时间时报错。
    pub fn schedule_at<E: Event>(&mut self, at: SimTime, ev: E) -> Result<EventHandle, SimError> {
        if at < self.now {
            let delay = Delay(0i64.saturating_sub(self.now.saturating_since(at).0));
            warn!(now = ?self.now, ?at, "拒绝调度：时间早于当前时间");
            return Err(SimError::InvalidDelay { delay });
        }
        let ctx = self.context();
        Ok(self.insert(at, ctx, Box::new(ev)))
    }

    /// 以闭包作为事件动作
    pub fn schedule_fn<F>(&mut self, delay: Delay, f: F) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Simulator, &mut dyn World) -> ActionResult + Send + 'static,
    {
        self.schedule(delay, FnEvent(f))
    }

    pub fn schedule_fn_with_context<F>(
        &mut self,
        ctx: ContextId,
        delay: Delay,
        f: F,
    ) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Simulator, &mut dyn World) -> ActionResult + Send + 'static,
    {
        self.schedule_with_context(ctx, delay, FnEvent(f))
    }

    /// 注册一个在 `destroy` 时执行的事件（按注册顺序执行）。
    pub fn schedule_destroy<E: Event>(&mut self, ev: E) -> Result<EventHandle, SimError> {
        let item = ScheduledEvent {
            at: self.now,
            seq: self.alloc_seq(),
            context: self.context(),
            ev: Box::new(ev),
        };
        let handle = item.handle();
        self.pending.insert(item.seq);
        self.destroy_q.push_back(item);
        trace!(seq = handle.seq, "注册销毁钩子");
        Ok(handle)
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn insert(&mut self, at: SimTime, context: ContextId, ev: Box<dyn Event>) -> EventHandle {
        let seq = self.alloc_seq();
        trace!(now = ?self.now, ?at, seq, ?context, "调度事件");

        let item = ScheduledEvent {
            at,
            seq,
            context,
            ev,
        };
        let handle = item.handle();
        self.pending.insert(seq);
        self.q.push(item);

        debug!(queue_size = self.q.len(), "事件已加入队列");
        handle
    }

    /// 取消一个尚未执行的事件。
    ///
    /// 已执行、已取消或正在执行（包括在自身动作里取消自己）的事件：什么都不做。
    pub fn cancel(&mut self, handle: EventHandle) -> Result<(), SimError> {
        if handle.seq < self.epoch_start {
            return Err(SimError::UseAfterDestroy { seq: handle.seq });
        }
        if !self.pending.remove(&handle.seq) {
            trace!(seq = handle.seq, "取消：事件已过期，忽略");
            return Ok(());
        }
        self.cancelled_count += 1;

        let hooks = self.destroy_q.len();
        self.destroy_q.retain(|e| e.seq != handle.seq);
        if self.destroy_q.len() == hooks {
            self.cancelled.insert(handle.seq);
            self.maybe_compact();
        } else {
            self.cancelled_hooks.insert(handle.seq);
        }
        debug!(seq = handle.seq, at = ?handle.at, tombstones = self.cancelled.len(), "事件已取消");
        Ok(())
    }

    fn maybe_compact(&mut self) {
        let tombstones = self.cancelled.len();
        if tombstones < COMPACT_MIN_TOMBSTONES || tombstones * 2 <= self.q.len() {
            return;
        }
        let before = self.q.len();
        let cancelled = &self.cancelled;
        self.q.retain(|e| !cancelled.contains(&e.seq));
        self.cancelled.clear();
        debug!(before, after = self.q.len(), "压缩事件队列");
    }

    /// 查询事件生命周期状态；句柄来自已销毁的仿真时报错。
    ///
    /// 被取消事件的墓碑回收（出队或压缩）之后，只能确定它已过期，此时报告
    /// `Executed`；动作 panic 的事件同样报告 `Executed`。`is_expired` 不受影响。
    pub fn state(&self, handle: EventHandle) -> Result<EventState, SimError> {
        if handle.seq < self.epoch_start {
            return Err(SimError::UseAfterDestroy { seq: handle.seq });
        }
        let state = if self.running.is_some_and(|r| r.seq == handle.seq) {
            EventState::Running
        } else if self.pending.contains(&handle.seq) {
            EventState::Pending
        } else if self.cancelled.contains(&handle.seq)
            || self.cancelled_hooks.contains(&handle.seq)
        {
            EventState::Cancelled
        } else {
            EventState::Executed
        };
        Ok(state)
    }

    /// 事件已执行或已取消（已销毁仿真里的事件也算过期）
    pub fn is_expired(&self, handle: EventHandle) -> bool {
        self.state(handle).map_or(true, EventState::is_expired)
    }

    /// 距离事件触发还剩多久；事件不再等待时为 0。
    pub fn delay_left(&self, handle: EventHandle) -> Delay {
        match self.state(handle) {
            Ok(EventState::Pending) => handle.at.saturating_since(self.now),
            _ => Delay::ZERO,
        }
    }

    /// 队列中等待执行的事件数（不含销毁钩子）
    pub fn pending_count(&self) -> usize {
        self.q.len() - self.cancelled.len()
    }

    /// 尚未回收的取消记录数（墓碑 + 已取消的销毁钩子）
    pub(crate) fn cancelled_backlog(&self) -> usize {
        self.cancelled.len() + self.cancelled_hooks.len()
    }

    pub fn is_finished(&self) -> bool {
        self.pending_count() == 0
    }

    /// 下一个将要执行的事件的时间
    pub fn next_event_time(&self) -> Option<SimTime> {
        match self.q.peek() {
            Some(top) if !self.cancelled.contains(&top.seq) => Some(top.at),
            Some(_) => self
                .q
                .iter()
                .filter(|e| !self.cancelled.contains(&e.seq))
                .map(|e| e.at)
                .min(),
            None => None,
        }
    }

    /// 本次仿真累计执行的事件数
    pub fn executed_count(&self) -> u64 {
        self.executed
    }

    /// 本次仿真累计取消的事件数
    pub fn cancelled_count(&self) -> u64 {
        self.cancelled_count
    }

    /// 请求在处理完所有时间 ≤ 当前时间的事件后停止。
    pub fn stop(&mut self) {
        self.request_stop(self.now);
    }

    /// 请求在处理完所有时间 ≤ 当前时间 + `delay` 的事件后停止。
    pub fn stop_after(&mut self, delay: Delay) -> Result<(), SimError> {
        let Some(at) = self.now.checked_add_delay(delay) else {
            warn!(now = ?self.now, ?delay, "拒绝停止请求：非法时延");
            return Err(SimError::InvalidDelay { delay });
        };
        self.request_stop(at);
        Ok(())
    }

    /// 多次请求时最早的停止时间生效
    fn request_stop(&mut self, at: SimTime) {
        let at = self.stop_at.map_or(at, |s| s.min(at));
        debug!(stop_at = ?at, "请求停止");
        self.stop_at = Some(at);
    }

    /// 运行直到事件队列为空或到达 `until`。
    pub fn run_until(
        &mut self,
        until: SimTime,
        world: &mut dyn World,
    ) -> Result<RunSummary, SimError> {
        if self.in_run {
            return Err(SimError::Reentrant { op: "run_until" });
        }
        self.request_stop(until.max(self.now));
        self.run(world)
    }

    /// 运行所有事件直到队列为空或到达停止边界。
    ///
    /// 事件动作返回的错误会立即终止运行并原样返回，时钟停在出错事件的时间；
    /// 动作里的 panic 也会继续向外传播。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) -> Result<RunSummary, SimError> {
        if self.in_run {
            warn!("拒绝嵌套 run");
            return Err(SimError::Reentrant { op: "run" });
        }
        let res = self.guarded(|sim| sim.run_loop(world));
        let stop = self.stop_at.take();
        let mut summary = res?;
        if let Some(stop) = stop {
            self.now = self.now.max(stop);
        }
        summary.final_time = self.now;

        info!(
            total_events = summary.executed,
            skipped_cancelled = summary.skipped_cancelled,
            stopped_early = summary.stopped_early,
            final_time = ?self.now,
            "✅ 仿真完成"
        );
        Ok(summary)
    }

    /// 在“运行中”标记下执行 `f`；panic 时先恢复标记再继续传播。
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.in_run = true;
        let res = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        self.in_run = false;
        self.running = None;
        match res {
            Ok(v) => v,
            Err(payload) => {
                self.stop_at = None;
                panic::resume_unwind(payload)
            }
        }
    }

    fn run_loop(&mut self, world: &mut dyn World) -> Result<RunSummary, SimError> {
        info!("▶️  开始运行仿真");
        debug!(now = ?self.now, queue_size = self.q.len(), stop_at = ?self.stop_at, "初始状态");

        let mut summary = RunSummary::default();
        while let Some(top) = self.q.peek() {
            if self.cancelled.contains(&top.seq) {
                let seq = top.seq;
                trace!(seq, "跳过已取消事件");
                self.q.pop();
                self.cancelled.remove(&seq);
                summary.skipped_cancelled += 1;
                continue;
            }
            if let Some(stop) = self.stop_at {
                if top.at > stop {
                    summary.stopped_early = true;
                    break;
                }
            }
            let Some(item) = self.q.pop() else { break };
            summary.executed += 1;
            self.now = item.at;

            debug!(
                event_num = summary.executed,
                now = ?self.now,
                seq = item.seq,
                context = ?item.context,
                remaining_queue = self.q.len(),
                "执行事件"
            );

            self.execute(item, world)?;
            world.on_tick(self);
        }
        Ok(summary)
    }

    fn execute(&mut self, item: ScheduledEvent, world: &mut dyn World) -> Result<(), SimError> {
        let handle = item.handle();
        self.pending.remove(&handle.seq);
        self.running = Some(handle);
        let res = item.ev.execute(self, world);
        self.running = None;
        self.executed += 1;
        self.last_dispatched = Some(handle);

        res.map_err(|source| {
            warn!(at = ?handle.at, seq = handle.seq, error = %source, "事件执行失败");
            SimError::ActionFailed {
                at: handle.at,
                seq: handle.seq,
                context: handle.context,
                source,
            }
        })
    }

    /// 执行销毁钩子，丢弃所有未执行事件，把仿真器恢复到初始状态。
    ///
    /// 钩子出错不会中断清理；第一个错误在清理完成后返回。
    pub fn destroy(&mut self, world: &mut dyn World) -> Result<(), SimError> {
        if self.in_run {
            return Err(SimError::Reentrant { op: "destroy" });
        }
        let hook_res = self.guarded(|sim| {
            let mut first_err = None;
            while let Some(item) = sim.destroy_q.pop_front() {
                debug!(seq = item.seq, "执行销毁钩子");
                if let Err(e) = sim.execute(item, &mut *world) {
                    first_err.get_or_insert(e);
                }
            }
            first_err
        });

        let discarded = self.pending_count();
        self.q.clear();
        self.pending.clear();
        self.cancelled.clear();
        self.cancelled_hooks.clear();
        self.now = SimTime::ZERO;
        self.stop_at = None;
        self.running = None;
        self.last_dispatched = None;
        self.executed = 0;
        self.cancelled_count = 0;
        self.epoch_start = self.next_seq;
        info!(discarded, "🧹 仿真已销毁");

        match hook_res {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
