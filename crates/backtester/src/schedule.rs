//! Schedule generation: N independent strategy cadences collapsed into
//! one ordered event stream.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::strategy::{Strategy, Task};

/// Who is due at one timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub strategy_ids: Vec<String>,
    pub task_ids: Vec<String>,
}

/// Step each strategy's and task's `(time_unit, interval)` forward
/// independently from `start` to `end` (inclusive) and merge every due
/// time into one sorted timeline.
pub fn generate_schedule(
    strategies: &[Arc<dyn Strategy>],
    tasks: &[Arc<dyn Task>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BTreeMap<DateTime<Utc>, ScheduleEntry> {
    let mut schedule: BTreeMap<DateTime<Utc>, ScheduleEntry> = BTreeMap::new();

    for strategy in strategies {
        let step = strategy.time_unit().interval_duration(strategy.interval().max(1));
        let mut t = start;
        while t <= end {
            let entry = schedule.entry(t).or_default();
            if !entry.strategy_ids.iter().any(|id| id == strategy.id()) {
                entry.strategy_ids.push(strategy.id().to_string());
            }
            t = t + step;
        }
    }

    for task in tasks {
        let step = task.time_unit().interval_duration(task.interval().max(1));
        let mut t = start;
        while t <= end {
            let entry = schedule.entry(t).or_default();
            if !entry.task_ids.iter().any(|id| id == task.id()) {
                entry.task_ids.push(task.id().to_string());
            }
            t = t + step;
        }
    }

    // Deterministic invocation order within a timestamp.
    for entry in schedule.values_mut() {
        entry.strategy_ids.sort();
        entry.task_ids.sort();
    }
    schedule
}
