mod simulator;

use crate::sim::{ActionResult, Event, Simulator, World};
use std::sync::{Arc, Mutex};

pub(crate) type Log = Arc<Mutex<Vec<u32>>>;

pub(crate) fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn snapshot(log: &Log) -> Vec<u32> {
    log.lock().expect("log lock").clone()
}

/// 把自己的 id 追加到日志
pub(crate) struct Push {
    pub id: u32,
    pub log: Log,
}

impl Push {
    pub fn new(id: u32, log: &Log) -> Self {
        Push {
            id,
            log: Arc::clone(log),
        }
    }
}

impl Event for Push {
    fn execute(self: Box<Self>, _sim: &mut Simulator, _world: &mut dyn World) -> ActionResult {
        let Push { id, log } = *self;
        log.lock().expect("log lock").push(id);
        Ok(())
    }
}
