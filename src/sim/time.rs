//! 仿真时间类型
//!
//! 定义绝对仿真时间（`SimTime`）与相对时延（`Delay`）及其单位转换。

use std::fmt;

/// 仿真时间（纳秒）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub fn from_micros(us: u64) -> SimTime {
        SimTime(us.saturating_mul(1_000))
    }
    pub fn from_millis(ms: u64) -> SimTime {
        SimTime(ms.saturating_mul(1_000_000))
    }
    pub fn from_secs(s: u64) -> SimTime {
        SimTime(s.saturating_mul(1_000_000_000))
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// `self + delay`；负时延或溢出时返回 `None`。
    pub fn checked_add_delay(self, delay: Delay) -> Option<SimTime> {
        let d = u64::try_from(delay.0).ok()?;
        self.0.checked_add(d).map(SimTime)
    }

    /// 从 `earlier` 到 `self` 的时延（`earlier` 更晚时为 0）。
    pub fn saturating_since(self, earlier: SimTime) -> Delay {
        let ns = self.0.saturating_sub(earlier.0);
        Delay(i64::try_from(ns).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

/// 相对时延（纳秒，有符号）。
///
/// 有符号是为了能够表达“调度到过去”这种错误输入，调度器会以
/// `SimError::InvalidDelay` 拒绝负值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Delay(pub i64);

impl Delay {
    pub const ZERO: Delay = Delay(0);

    pub fn from_nanos(ns: i64) -> Delay {
        Delay(ns)
    }
    pub fn from_micros(us: i64) -> Delay {
        Delay(us.saturating_mul(1_000))
    }
    pub fn from_millis(ms: i64) -> Delay {
        Delay(ms.saturating_mul(1_000_000))
    }
    pub fn from_secs(s: i64) -> Delay {
        Delay(s.saturating_mul(1_000_000_000))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

impl From<SimTime> for Delay {
    /// 把一个绝对时间当作从零点起算的时延（超出 `i64` 时饱和）。
    fn from(t: SimTime) -> Delay {
        t.saturating_since(SimTime::ZERO)
    }
}
