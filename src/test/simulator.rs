use super::{Log, Push, new_log, snapshot};
use crate::sim::{
    ActionResult, ContextId, Delay, Event, EventState, SimTime, Simulator, World,
};
use std::any::Any;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct DummyWorld {
    ticks: usize,
}

impl World for DummyWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_tick(&mut self, _sim: &mut Simulator) {
        self.ticks = self.ticks.saturating_add(1);
    }
}

struct PushThenSchedule {
    id: u32,
    next_id: u32,
    delay: Delay,
    log: Log,
}

impl Event for PushThenSchedule {
    fn execute(self: Box<Self>, sim: &mut Simulator, _world: &mut dyn World) -> ActionResult {
        let PushThenSchedule {
            id,
            next_id,
            delay,
            log,
        } = *self;
        log.lock().expect("log lock").push(id);
        sim.schedule(delay, Push { id: next_id, log })?;
        Ok(())
    }
}

#[test]
fn scheduled_events_order_by_time_then_seq() {
    let log = new_log();

    let mut sim = Simulator::default();
    sim.schedule(Delay(5), Push::new(5, &log)).unwrap();
    sim.schedule(Delay(2), Push::new(21, &log)).unwrap();
    sim.schedule(Delay(2), Push::new(22, &log)).unwrap();

    let mut world = DummyWorld::default();
    let summary = sim.run(&mut world).unwrap();

    assert_eq!(snapshot(&log), [21, 22, 5]);
    assert_eq!(world.ticks, 3);
    assert_eq!(summary.executed, 3);
    assert!(!summary.stopped_early);
    assert_eq!(sim.now(), SimTime(5));
    assert!(sim.is_finished());
}

#[test]
fn equal_timestamps_dispatch_in_insertion_order() {
    let log = new_log();
    let mut sim = Simulator::new();
    for id in 0..50 {
        // 交错插入其他时间戳，不应影响同一时刻内的顺序
        sim.schedule(Delay(7), Push::new(id, &log)).unwrap();
        sim.schedule(Delay(1 + (id as i64 % 3) * 10), Push::new(1000 + id, &log))
            .unwrap();
    }
    sim.run(&mut ()).unwrap();

    let at_seven: Vec<u32> = snapshot(&log).into_iter().filter(|id| *id < 1000).collect();
    assert_eq!(at_seven, (0..50u32).collect::<Vec<_>>());
}

#[test]
fn event_scheduled_now_inside_event_runs_after_current_event() {
    let log = new_log();

    let mut sim = Simulator::default();
    sim.schedule_now(PushThenSchedule {
        id: 1,
        next_id: 2,
        delay: Delay::ZERO,
        log: Arc::clone(&log),
    })
    .unwrap();
    sim.schedule_now(Push::new(3, &log)).unwrap();

    let mut world = DummyWorld::default();
    sim.run(&mut world).unwrap();

    assert_eq!(snapshot(&log), [1, 3, 2]);
    assert_eq!(world.ticks, 3);
    assert_eq!(sim.now(), SimTime::ZERO);
}

#[test]
fn event_scheduled_from_action_runs_after_earlier_pending_events() {
    let log = new_log();
    let mut sim = Simulator::new();

    sim.schedule(
        Delay(3),
        PushThenSchedule {
            id: 3,
            next_id: 52,
            delay: Delay(2),
            log: Arc::clone(&log),
        },
    )
    .unwrap();
    sim.schedule(Delay(4), Push::new(4, &log)).unwrap();
    sim.schedule(Delay(5), Push::new(51, &log)).unwrap();
    sim.schedule(Delay(6), Push::new(6, &log)).unwrap();

    sim.run(&mut ()).unwrap();
    assert_eq!(snapshot(&log), [3, 4, 51, 52, 6]);
    assert_eq!(sim.now(), SimTime(6));
}

#[test]
fn clock_is_monotonic_across_dispatches() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sim = Simulator::new();

    // 简单 LCG，保证调度顺序与时间顺序无关
    let mut x: u64 = 12345;
    for _ in 0..500 {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let seen = Arc::clone(&seen);
        sim.schedule_fn(Delay((x >> 40) as i64), move |sim, _| {
            seen.lock().expect("seen lock").push(sim.now());
            Ok(())
        })
        .unwrap();
    }
    sim.run(&mut ()).unwrap();

    let seen = seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 500);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(sim.now(), *seen.last().unwrap());
}

struct Tick {
    period: Delay,
    count: Arc<Mutex<u32>>,
}

impl Event for Tick {
    fn execute(self: Box<Self>, sim: &mut Simulator, _world: &mut dyn World) -> ActionResult {
        *self.count.lock().expect("count lock") += 1;
        let period = self.period;
        sim.schedule(period, *self)?;
        Ok(())
    }
}

#[test]
fn self_rescheduling_event_stops_after_n_dispatches() {
    let count = Arc::new(Mutex::new(0));
    let period = Delay::from_micros(10);
    let n = 25;

    let mut sim = Simulator::new();
    sim.schedule(
        period,
        Tick {
            period,
            count: Arc::clone(&count),
        },
    )
    .unwrap();
    sim.stop_after(Delay(period.0 * n)).unwrap();
    let summary = sim.run(&mut ()).unwrap();

    assert_eq!(*count.lock().unwrap(), n as u32);
    assert_eq!(summary.executed, n as u64);
    assert!(summary.stopped_early);
    assert_eq!(sim.now(), SimTime((period.0 * n) as u64));
    assert_eq!(sim.pending_count(), 1);
}

#[test]
fn context_is_inherited_unless_given_explicitly() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sim = Simulator::new();
    assert_eq!(sim.context(), ContextId::NONE);

    let outer = Arc::clone(&seen);
    sim.schedule_fn_with_context(ContextId(7), Delay(1), move |sim, _| {
        outer.lock().unwrap().push(sim.context());
        let inherited = Arc::clone(&outer);
        sim.schedule_fn(Delay(1), move |sim, _| {
            inherited.lock().unwrap().push(sim.context());
            Ok(())
        })?;
        let explicit = Arc::clone(&outer);
        sim.schedule_fn_with_context(ContextId(9), Delay(1), move |sim, _| {
            explicit.lock().unwrap().push(sim.context());
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();
    let from_outside = Arc::clone(&seen);
    sim.schedule_fn(Delay(5), move |sim, _| {
        from_outside.lock().unwrap().push(sim.context());
        Ok(())
    })
    .unwrap();

    sim.run(&mut ()).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        [ContextId(7), ContextId(7), ContextId(9), ContextId::NONE]
    );
    assert_eq!(sim.context(), ContextId::NONE);
}

#[test]
fn handle_reports_running_inside_its_own_action() {
    let state = Arc::new(Mutex::new(None));
    let mut sim = Simulator::new();

    let seen = Arc::clone(&state);
    let h = sim
        .schedule_fn(Delay(3), move |sim, _| {
            let me = sim.current_event().expect("running event");
            *seen.lock().unwrap() = Some((sim.state(me)?, sim.is_expired(me), me.at()));
            Ok(())
        })
        .unwrap();
    assert_eq!(sim.state(h).unwrap(), EventState::Pending);
    assert_eq!(sim.delay_left(h), Delay(3));

    sim.run(&mut ()).unwrap();
    assert_eq!(
        *state.lock().unwrap(),
        Some((EventState::Running, false, SimTime(3)))
    );
    assert_eq!(sim.state(h).unwrap(), EventState::Executed);
    assert!(sim.is_expired(h));
    assert_eq!(sim.delay_left(h), Delay::ZERO);
    assert_eq!(sim.last_dispatched(), Some(h));
    assert_eq!(sim.executed_count(), 1);
}

#[test]
fn schedule_at_uses_absolute_time() {
    let log = new_log();
    let mut sim = Simulator::new();
    sim.schedule_at(SimTime(9), Push::new(9, &log)).unwrap();
    sim.schedule_at(SimTime(4), Push::new(4, &log)).unwrap();
    assert_eq!(sim.next_event_time(), Some(SimTime(4)));

    sim.run(&mut ()).unwrap();
    assert_eq!(snapshot(&log), [4, 9]);
    assert_eq!(sim.next_event_time(), None);
}

#[test]
fn sequence_numbers_strictly_increase() {
    let log = new_log();
    let mut sim = Simulator::new();
    let a = sim.schedule(Delay(10), Push::new(1, &log)).unwrap();
    let b = sim.schedule(Delay(1), Push::new(2, &log)).unwrap();
    let c = sim.schedule_now(Push::new(3, &log)).unwrap();
    assert!(a.seq() < b.seq() && b.seq() < c.seq());
    assert_eq!(b.at(), SimTime(1));
}

#[test]
fn run_until_skips_events_after_until_and_advances_time() {
    let log = new_log();

    let mut sim = Simulator::default();
    sim.schedule(Delay::ZERO, Push::new(1, &log)).unwrap();
    sim.schedule(Delay(10), Push::new(2, &log)).unwrap();

    let mut world = DummyWorld::default();
    sim.run_until(SimTime(5), &mut world).unwrap();

    assert_eq!(snapshot(&log), [1]);
    assert_eq!(world.ticks, 1);
    assert_eq!(sim.now(), SimTime(5));

    sim.run(&mut world).unwrap();
    assert_eq!(snapshot(&log), [1, 2]);
    assert_eq!(world.ticks, 2);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn run_until_executes_events_scheduled_exactly_at_until() {
    let log = new_log();

    let mut sim = Simulator::default();
    sim.schedule(Delay(5), Push::new(1, &log)).unwrap();

    let mut world = DummyWorld::default();
    sim.run_until(SimTime(5), &mut world).unwrap();

    assert_eq!(snapshot(&log), [1]);
    assert_eq!(world.ticks, 1);
    assert_eq!(sim.now(), SimTime(5));
}

#[test]
fn run_until_advances_time_even_if_there_are_no_events() {
    let mut sim = Simulator::default();
    let mut world = DummyWorld::default();

    sim.run_until(SimTime(7), &mut world).unwrap();
    assert_eq!(sim.now(), SimTime(7));
    assert_eq!(world.ticks, 0);

    // 不会倒退
    sim.run_until(SimTime(3), &mut world).unwrap();
    assert_eq!(sim.now(), SimTime(7));
}
