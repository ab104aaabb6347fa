//! Label index
//!
//! Maps `(label_key, label_value)` to the set of tasks carrying that label.
//! The cost model only reads it during a round; maintenance happens between
//! rounds, so queries always see the label set as of round start. A task
//! relabelled mid-round may be matched under its old values for one round.

use std::collections::{BTreeSet, HashMap};

use crate::types::{TaskDescriptor, TaskId};

/// `key -> value -> set<task_id>` index over task labels
#[derive(Debug, Default)]
pub struct LabelIndex {
    by_key: HashMap<String, HashMap<String, BTreeSet<TaskId>>>,
}

impl LabelIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every label of a task
    pub fn add_task(&mut self, task: &TaskDescriptor) {
        for (key, value) in &task.labels {
            self.by_key
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(task.id);
        }
    }

    /// Drop every label of a task, pruning empty buckets
    pub fn remove_task(&mut self, task: &TaskDescriptor) {
        for (key, value) in &task.labels {
            let Some(values) = self.by_key.get_mut(key) else {
                continue;
            };
            if let Some(tasks) = values.get_mut(value) {
                tasks.remove(&task.id);
                if tasks.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                self.by_key.remove(key);
            }
        }
    }

    /// Tasks carrying exactly `(key, value)`
    #[must_use]
    pub fn tasks_with(&self, key: &str, value: &str) -> Option<&BTreeSet<TaskId>> {
        self.by_key.get(key)?.get(value)
    }

    /// Tasks carrying `key` under any value
    #[must_use]
    pub fn tasks_with_key(&self, key: &str) -> BTreeSet<TaskId> {
        self.by_key
            .get(key)
            .map(|values| values.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Check whether any task carries `key`
    #[must_use]
    pub fn key_in_use(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, ResourceVec};

    fn labelled_task(id: u64, labels: &[(&str, &str)]) -> TaskDescriptor {
        let mut td = TaskDescriptor::new(
            TaskId::new(id),
            JobId::new(1),
            "default",
            ResourceVec::new(100, 1 << 20),
        );
        for (k, v) in labels {
            td = td.with_label(*k, *v);
        }
        td
    }

    #[test]
    fn test_add_and_query() {
        let mut index = LabelIndex::new();
        index.add_task(&labelled_task(1, &[("app", "web"), ("tier", "front")]));
        index.add_task(&labelled_task(2, &[("app", "web")]));
        index.add_task(&labelled_task(3, &[("app", "db")]));

        let web = index.tasks_with("app", "web").unwrap();
        assert_eq!(web.len(), 2);
        assert!(web.contains(&TaskId::new(1)));
        assert!(web.contains(&TaskId::new(2)));

        assert_eq!(index.tasks_with_key("app").len(), 3);
        assert!(index.tasks_with("tier", "back").is_none());
    }

    #[test]
    fn test_remove_prunes_empty_buckets() {
        let mut index = LabelIndex::new();
        let t1 = labelled_task(1, &[("app", "web")]);
        let t2 = labelled_task(2, &[("app", "web")]);
        index.add_task(&t1);
        index.add_task(&t2);

        index.remove_task(&t1);
        assert_eq!(index.tasks_with("app", "web").unwrap().len(), 1);

        index.remove_task(&t2);
        assert!(index.tasks_with("app", "web").is_none());
        assert!(!index.key_in_use("app"));
    }

    #[test]
    fn test_remove_unknown_task_is_noop() {
        let mut index = LabelIndex::new();
        index.add_task(&labelled_task(1, &[("app", "web")]));
        index.remove_task(&labelled_task(9, &[("app", "web"), ("zone", "a")]));
        assert!(index.tasks_with("app", "web").is_some());
    }
}
