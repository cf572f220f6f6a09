use crate::sim::{ContextId, EventHandle, Simulator};
use serde::{Deserialize, Serialize};

/// 一条派发记录（JSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// 仿真时间（纳秒，和 `SimTime.0` 同口径）
    pub t_ns: u64,
    pub seq: u64,
    /// `None` 表示事件不属于任何节点
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<u32>,
    /// 业务层给出的事件标签
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DispatchRecord {
    pub fn from_handle(h: EventHandle) -> Self {
        let ctx = h.context();
        Self {
            t_ns: h.at().0,
            seq: h.seq(),
            context: (ctx != ContextId::NONE).then_some(ctx.0),
            label: None,
        }
    }
}

/// 一个简单的记录收集器（存内存，仿真结束写 JSON 文件）
#[derive(Debug, Default)]
pub struct DispatchLogger {
    pub records: Vec<DispatchRecord>,
}

impl DispatchLogger {
    pub fn push(&mut self, rec: DispatchRecord) {
        self.records.push(rec);
    }

    /// 记录仿真器刚刚执行完的事件，通常在 `World::on_tick` 里调用。
    pub fn record_last(&mut self, sim: &Simulator, label: Option<&str>) {
        if let Some(h) = sim.last_dispatched() {
            let mut rec = DispatchRecord::from_handle(h);
            rec.label = label.map(str::to_owned);
            self.push(rec);
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records)
    }
}
