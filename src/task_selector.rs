use crate::task::{RunWindow, TaskRecord};
use chrono::NaiveDate;
use itertools::Itertools;
use tracing::debug;

/// Tasks chosen for one merge, one per (disease, geo_value, production_date)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSelection {
    tasks: Vec<TaskRecord>,
}

impl TaskSelection {
    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Zero tasks means there is nothing to merge; it is not a failure
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Sorted, deduplicated job ids of the selected tasks
    pub fn job_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.job_id.as_str()).sorted().dedup().collect()
    }
}

/// Keep the most recently run task per key among those inside `window`.
///
/// Records are stably sorted by key then `run_at` and each key group is folded
/// to its last element. When two records share a key and an identical `run_at`,
/// the one that came later in `records` wins. Output is ordered by key.
pub fn select_tasks(
    records: impl IntoIterator<Item = TaskRecord>,
    window: &RunWindow,
    production_date: Option<NaiveDate>,
) -> TaskSelection {
    let mut candidates: Vec<TaskRecord> = records
        .into_iter()
        .filter(|r| window.contains(r.run_at))
        .filter(|r| production_date.map_or(true, |d| r.production_date == d))
        .collect();

    candidates.sort_by(|a, b| a.key().cmp(&b.key()).then(a.run_at.cmp(&b.run_at)));
    let considered = candidates.len();

    let tasks: Vec<TaskRecord> = candidates
        .into_iter()
        .group_by(TaskRecord::key)
        .into_iter()
        .filter_map(|(_, group)| group.last())
        .collect();

    debug!(
        considered,
        selected = tasks.len(),
        "selected most recent task per (disease, geo_value, production_date)"
    );

    TaskSelection { tasks }
}
