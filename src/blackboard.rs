use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc, time::Instant};

use edgebridge_gpio::{EdgeLevel, Tick};

#[derive(Clone, Debug)]
pub struct State {
    pub edges: BTreeMap<u32, u64>,
    pub watchdog_events: u64,
    pub last_edge: Option<(u32, EdgeLevel, Tick)>,
    pub last_range_m: Option<f64>,
    pub ranges_ok: u64,
    pub ranges_missed: u64,
    pub last_range_ts: Instant,
    pub faults: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            edges: BTreeMap::new(),
            watchdog_events: 0,
            last_edge: None,
            last_range_m: None,
            ranges_ok: 0,
            ranges_missed: 0,
            last_range_ts: Instant::now(),
            faults: Vec::new(),
        }
    }
}

pub type Blackboard = Arc<RwLock<State>>;

pub fn snapshot(bb: &Blackboard) -> State {
    (*bb.read()).clone()
}

pub fn record_edge(bb: &Blackboard, pin: u32, level: EdgeLevel, tick: Tick) {
    let mut g = bb.write();
    if level == EdgeLevel::NoChange {
        g.watchdog_events += 1;
    } else {
        *g.edges.entry(pin).or_default() += 1;
    }
    g.last_edge = Some((pin, level, tick));
}

pub fn record_range(bb: &Blackboard, meters: Option<f64>) {
    let mut g = bb.write();
    match meters {
        Some(_) => g.ranges_ok += 1,
        None => g.ranges_missed += 1,
    }
    g.last_range_m = meters;
    g.last_range_ts = Instant::now();
}

pub fn raise_fault(bb: &Blackboard, msg: &str) {
    let mut g = bb.write();
    if !g.faults.iter().any(|s| s == msg) {
        g.faults.push(msg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_counted_per_pin_and_watchdog_separately() {
        let bb: Blackboard = Arc::default();
        record_edge(&bb, 5, EdgeLevel::High, Tick(1));
        record_edge(&bb, 5, EdgeLevel::Low, Tick(2));
        record_edge(&bb, 6, EdgeLevel::NoChange, Tick(3));
        let s = snapshot(&bb);
        assert_eq!(s.edges.get(&5), Some(&2));
        assert_eq!(s.edges.get(&6), None);
        assert_eq!(s.watchdog_events, 1);
        assert_eq!(s.last_edge, Some((6, EdgeLevel::NoChange, Tick(3))));
    }

    #[test]
    fn test_ranges_and_faults() {
        let bb: Blackboard = Arc::default();
        record_range(&bb, Some(1.5));
        record_range(&bb, None);
        raise_fault(&bb, "echo stuck");
        raise_fault(&bb, "echo stuck");
        let s = snapshot(&bb);
        assert_eq!((s.ranges_ok, s.ranges_missed), (1, 1));
        assert_eq!(s.last_range_m, None);
        assert_eq!(s.faults.len(), 1);
    }
}
