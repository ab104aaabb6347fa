//! Placement constraint evaluation
//!
//! Two predicate families: node-side predicates compare machine labels
//! against selector expressions, pod-side predicates compare the labels of
//! pods already running on a machine against a task's (anti-)affinity
//! terms. Hard predicates gate admission; soft predicates produce the raw
//! weighted scores the priority scorer normalises.
//!
//! Pod-side matching only sees `Running` tasks. Allowed namespaces default
//! to the scheduled task's own namespace unless a term lists namespaces
//! explicitly; the allowed set is local to each term.

use std::collections::{BTreeSet, HashMap};

use crate::labels::LabelIndex;
use crate::topology::ResourceTopology;
use crate::types::{
    Affinity, LabelSelector, NodeMatchExpression, NodeOperator, NodeSelectorTerm, PodAffinityTerm,
    PodMatchExpression, PodOperator, ResourceDescriptor, ResourceId, TaskDescriptor, TaskId,
};

/// Evaluates node and pod placement predicates for one frozen round
///
/// Borrows the round's topology, task map and label index; constructing one
/// is free, so callers build it per evaluation batch.
pub struct ConstraintEvaluator<'a> {
    topology: &'a ResourceTopology,
    tasks: &'a HashMap<TaskId, TaskDescriptor>,
    labels: &'a LabelIndex,
}

impl<'a> ConstraintEvaluator<'a> {
    /// Create an evaluator over the round's frozen state
    #[must_use]
    pub fn new(
        topology: &'a ResourceTopology,
        tasks: &'a HashMap<TaskId, TaskDescriptor>,
        labels: &'a LabelIndex,
    ) -> Self {
        Self {
            topology,
            tasks,
            labels,
        }
    }

    // ---- node-side predicates ----

    /// Evaluate one match expression against machine labels
    #[must_use]
    pub fn node_expression_matches(machine: &ResourceDescriptor, expr: &NodeMatchExpression) -> bool {
        let value = machine.labels.get(&expr.key);
        match expr.op {
            NodeOperator::In => value.is_some_and(|v| expr.values.contains(v)),
            NodeOperator::NotIn => value.is_none_or(|v| !expr.values.contains(v)),
            NodeOperator::Exists => value.is_some(),
            NodeOperator::DoesNotExist => value.is_none(),
            NodeOperator::Gt => Self::numeric_cmp(value, &expr.values, |a, b| a > b),
            NodeOperator::Lt => Self::numeric_cmp(value, &expr.values, |a, b| a < b),
        }
    }

    fn numeric_cmp(value: Option<&String>, bounds: &[String], cmp: fn(i64, i64) -> bool) -> bool {
        let (Some(value), Some(bound)) = (value, bounds.first()) else {
            return false;
        };
        match (value.parse::<i64>(), bound.parse::<i64>()) {
            (Ok(v), Ok(b)) => cmp(v, b),
            _ => false,
        }
    }

    /// Evaluate a node selector term (conjunction of expressions)
    ///
    /// An empty term matches no machine.
    #[must_use]
    pub fn node_term_matches(machine: &ResourceDescriptor, term: &NodeSelectorTerm) -> bool {
        !term.match_expressions.is_empty()
            && term
                .match_expressions
                .iter()
                .all(|expr| Self::node_expression_matches(machine, expr))
    }

    /// Evaluate the task-level node selectors (conjunction)
    #[must_use]
    pub fn satisfies_node_selectors(
        machine: &ResourceDescriptor,
        selectors: &[LabelSelector],
    ) -> bool {
        selectors.iter().all(|selector| {
            let value = machine.labels.get(&selector.key);
            match selector.op {
                PodOperator::In => value.is_some_and(|v| selector.values.contains(v)),
                PodOperator::NotIn => value.is_none_or(|v| !selector.values.contains(v)),
                PodOperator::Exists => value.is_some(),
                PodOperator::DoesNotExist => value.is_none(),
            }
        })
    }

    /// Evaluate required node affinity (disjunction of terms)
    ///
    /// A task without required terms passes everywhere.
    #[must_use]
    pub fn satisfies_node_affinity_required(
        machine: &ResourceDescriptor,
        affinity: Option<&Affinity>,
    ) -> bool {
        let Some(node_affinity) = affinity.and_then(|a| a.node_affinity.as_ref()) else {
            return true;
        };
        if node_affinity.required.is_empty() {
            return true;
        }
        node_affinity
            .required
            .iter()
            .any(|term| Self::node_term_matches(machine, term))
    }

    /// Combined node-side hard gate: selectors plus required node affinity
    #[must_use]
    pub fn satisfies_node_selector_and_node_affinity_required(
        machine: &ResourceDescriptor,
        task: &TaskDescriptor,
    ) -> bool {
        Self::satisfies_node_selectors(machine, &task.label_selectors)
            && Self::satisfies_node_affinity_required(machine, task.affinity.as_ref())
    }

    /// Raw soft node affinity score: sum of weights over matching terms
    ///
    /// Zero-weight and empty preference terms contribute nothing.
    #[must_use]
    pub fn node_preferred_raw_score(
        machine: &ResourceDescriptor,
        affinity: Option<&Affinity>,
    ) -> i64 {
        let Some(node_affinity) = affinity.and_then(|a| a.node_affinity.as_ref()) else {
            return 0;
        };
        node_affinity
            .preferred
            .iter()
            .filter(|weighted| weighted.weight != 0)
            .filter(|weighted| Self::node_term_matches(machine, &weighted.preference))
            .map(|weighted| weighted.weight)
            .sum()
    }

    // ---- pod-side predicates ----

    fn allowed_namespaces<'t>(task: &'t TaskDescriptor, term: &'t PodAffinityTerm) -> BTreeSet<&'t str> {
        if term.namespaces.is_empty() {
            BTreeSet::from([task.namespace.as_str()])
        } else {
            term.namespaces.iter().map(String::as_str).collect()
        }
    }

    fn task_running_on(&self, task_id: TaskId, machine: ResourceId) -> Option<&TaskDescriptor> {
        let td = self.tasks.get(&task_id)?;
        if !td.state.is_running() {
            return None;
        }
        let pu = td.scheduled_to?;
        (self.topology.machine_of(pu).ok()? == machine).then_some(td)
    }

    /// Key-bearing pods running on `machine` within the allowed namespaces
    fn key_bearers(
        &self,
        machine: ResourceId,
        key: &str,
        allowed: &BTreeSet<&str>,
    ) -> Vec<&TaskDescriptor> {
        self.labels
            .tasks_with_key(key)
            .into_iter()
            .filter_map(|tid| self.task_running_on(tid, machine))
            .filter(|td| allowed.contains(td.namespace.as_str()))
            .collect()
    }

    /// Some co-located pod carries `key` with a value from `values`
    fn match_with_values(
        &self,
        machine: ResourceId,
        key: &str,
        values: &[String],
        allowed: &BTreeSet<&str>,
    ) -> bool {
        values.iter().any(|value| {
            self.labels
                .tasks_with(key, value)
                .is_some_and(|tasks| {
                    tasks.iter().any(|tid| {
                        self.task_running_on(*tid, machine)
                            .is_some_and(|td| allowed.contains(td.namespace.as_str()))
                    })
                })
        })
    }

    /// Key is in use by some co-located pod, but never with a listed value
    ///
    /// Unsatisfied when no co-located pod in an allowed namespace carries
    /// the key at all.
    fn not_match_with_values(
        &self,
        machine: ResourceId,
        key: &str,
        values: &[String],
        allowed: &BTreeSet<&str>,
    ) -> bool {
        let bearers = self.key_bearers(machine, key, allowed);
        !bearers.is_empty()
            && bearers
                .iter()
                .all(|td| td.labels.get(key).is_none_or(|v| !values.contains(v)))
    }

    /// Some co-located pod carries `key` under any value
    fn match_keys(&self, machine: ResourceId, key: &str, allowed: &BTreeSet<&str>) -> bool {
        !self.key_bearers(machine, key, allowed).is_empty()
    }

    /// Pods run co-located in an allowed namespace, but none carries `key`
    fn not_match_keys(&self, machine: ResourceId, key: &str, allowed: &BTreeSet<&str>) -> bool {
        let mut seen_any = false;
        for tid in self.topology.running_tasks_below(machine) {
            let Some(td) = self.task_running_on(tid, machine) else {
                continue;
            };
            if !allowed.contains(td.namespace.as_str()) {
                continue;
            }
            seen_any = true;
            if td.labels.contains_key(key) {
                return false;
            }
        }
        seen_any
    }

    fn pod_expression_satisfied(
        &self,
        machine: ResourceId,
        expr: &PodMatchExpression,
        allowed: &BTreeSet<&str>,
    ) -> bool {
        match expr.op {
            PodOperator::In => self.match_with_values(machine, &expr.key, &expr.values, allowed),
            PodOperator::NotIn => {
                self.not_match_with_values(machine, &expr.key, &expr.values, allowed)
            }
            PodOperator::Exists => self.match_keys(machine, &expr.key, allowed),
            PodOperator::DoesNotExist => self.not_match_keys(machine, &expr.key, allowed),
        }
    }

    // Anti-affinity inverts the match direction of every expression.
    fn anti_expression_satisfied(
        &self,
        machine: ResourceId,
        expr: &PodMatchExpression,
        allowed: &BTreeSet<&str>,
    ) -> bool {
        match expr.op {
            PodOperator::In => {
                self.not_match_with_values(machine, &expr.key, &expr.values, allowed)
            }
            PodOperator::NotIn => self.match_with_values(machine, &expr.key, &expr.values, allowed),
            PodOperator::Exists => self.not_match_keys(machine, &expr.key, allowed),
            PodOperator::DoesNotExist => self.match_keys(machine, &expr.key, allowed),
        }
    }

    /// Evaluate a pod affinity term (conjunction of expressions)
    #[must_use]
    pub fn pod_term_satisfied(
        &self,
        machine: ResourceId,
        task: &TaskDescriptor,
        term: &PodAffinityTerm,
    ) -> bool {
        let allowed = Self::allowed_namespaces(task, term);
        term.match_expressions
            .iter()
            .all(|expr| self.pod_expression_satisfied(machine, expr, &allowed))
    }

    /// Evaluate a pod anti-affinity term (conjunction of inverted expressions)
    #[must_use]
    pub fn anti_term_satisfied(
        &self,
        machine: ResourceId,
        task: &TaskDescriptor,
        term: &PodAffinityTerm,
    ) -> bool {
        let allowed = Self::allowed_namespaces(task, term);
        term.match_expressions
            .iter()
            .all(|expr| self.anti_expression_satisfied(machine, expr, &allowed))
    }

    /// Combined pod-side hard gate: required affinity plus required anti-affinity
    #[must_use]
    pub fn satisfies_pod_affinity_antiaffinity_required(
        &self,
        machine: ResourceId,
        task: &TaskDescriptor,
    ) -> bool {
        let Some(affinity) = task.affinity.as_ref() else {
            return true;
        };
        if let Some(pod_affinity) = affinity.pod_affinity.as_ref() {
            if !pod_affinity
                .required
                .iter()
                .all(|term| self.pod_term_satisfied(machine, task, term))
            {
                return false;
            }
        }
        if let Some(anti) = affinity.pod_anti_affinity.as_ref() {
            if !anti
                .required
                .iter()
                .all(|term| self.anti_term_satisfied(machine, task, term))
            {
                return false;
            }
        }
        true
    }

    /// Full hard gate for one (task, machine) pair, short-circuiting
    #[must_use]
    pub fn satisfies_hard(&self, machine: &ResourceDescriptor, task: &TaskDescriptor) -> bool {
        Self::satisfies_node_selector_and_node_affinity_required(machine, task)
            && self.satisfies_pod_affinity_antiaffinity_required(machine.id, task)
    }

    /// Raw soft pod score: affinity terms that match plus anti-affinity
    /// terms that hold, each contributing its weight
    #[must_use]
    pub fn pod_preferred_raw_score(&self, machine: ResourceId, task: &TaskDescriptor) -> i64 {
        let Some(affinity) = task.affinity.as_ref() else {
            return 0;
        };
        let mut score = 0;
        if let Some(pod_affinity) = affinity.pod_affinity.as_ref() {
            score += pod_affinity
                .preferred
                .iter()
                .filter(|weighted| weighted.weight != 0)
                .filter(|weighted| self.pod_term_satisfied(machine, task, &weighted.term))
                .map(|weighted| weighted.weight)
                .sum::<i64>();
        }
        if let Some(anti) = affinity.pod_anti_affinity.as_ref() {
            score += anti
                .preferred
                .iter()
                .filter(|weighted| weighted.weight != 0)
                .filter(|weighted| self.anti_term_satisfied(machine, task, &weighted.term))
                .map(|weighted| weighted.weight)
                .sum::<i64>();
        }
        score
    }
}
