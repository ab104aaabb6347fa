//! Cost model API
//!
//! Prices every arc class of the scheduling flow graph. Hard placement
//! constraints are enforced by omitting machines from preference lists or
//! by returning zero-capacity arcs; soft preferences are projected into a
//! four-dimensional cost vector and flattened into the scalar the solver
//! consumes. Structural inconsistencies (an EC without a backing machine, a
//! task without a pinned request) abort the round with an error; they are
//! registry corruption, not schedulable conditions.
//!
//! All public calls are synchronous. Registry mutation (`add_task`,
//! `add_machine`, binding) must be quiesced against in-round queries; the
//! orchestrator drives one round at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constraints::ConstraintEvaluator;
use crate::labels::LabelIndex;
use crate::registry::EcRegistry;
use crate::scoring::PriorityScorer;
use crate::stats::{core_id_from_name, KnowledgeBase};
use crate::topology::{ResourceSubtree, ResourceTopology};
use crate::types::{
    Affinity, ArcDescriptor, CostVector, EquivClass, JobId, ResourceId, ResourceVec,
    TaskDescriptor, TaskId, TaskState,
};
use crate::{CostError, Result};

/// Fixed cost of leaving a task unscheduled for a round
pub const TASK_TO_UNSCHEDULED_COST: i64 = 2_560_000;

/// Tunables of the cost model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModelConfig {
    /// Upper bound on admission slots (multi-arcs) per machine
    pub max_multi_arcs_for_cpu: u64,
    /// Legacy PU-to-sink capacity, used when a machine has no `max_pods`
    pub max_tasks_per_pu: u64,
    /// Scoring scale factor mapping unit fractions to integer costs
    pub omega: i64,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            max_multi_arcs_for_cpu: 50,
            max_tasks_per_pu: 1,
            omega: 1000,
        }
    }
}

impl CostModelConfig {
    /// Set the per-machine multi-arc bound
    #[must_use]
    pub const fn with_max_multi_arcs(mut self, max: u64) -> Self {
        self.max_multi_arcs_for_cpu = max;
        self
    }

    /// Set the legacy PU capacity fallback
    #[must_use]
    pub const fn with_max_tasks_per_pu(mut self, max: u64) -> Self {
        self.max_tasks_per_pu = max;
        self
    }

    /// Set the scoring scale factor
    #[must_use]
    pub const fn with_omega(mut self, omega: i64) -> Self {
        self.omega = omega;
        self
    }
}

/// The CPU/memory cost model
///
/// Owns the round's frozen inputs (topology mirror, task map, label index)
/// and the round-scoped caches (EC registry pins, priority scores). The
/// flow solver queries arcs through the methods below; the orchestrator
/// mutates state between rounds.
pub struct CpuCostModel {
    config: CostModelConfig,
    topology: ResourceTopology,
    tasks: HashMap<TaskId, TaskDescriptor>,
    task_requests: HashMap<TaskId, ResourceVec>,
    labels: LabelIndex,
    registry: EcRegistry,
    scorer: PriorityScorer,
    knowledge_base: Arc<dyn KnowledgeBase>,
    /// Dynamic ceiling on flattened costs; grows, never shrinks
    infinity: i64,
}

impl CpuCostModel {
    /// Create a cost model over an external knowledge base
    #[must_use]
    pub fn new(config: CostModelConfig, knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        let infinity = config.omega * CostVector::DIMENSIONS + 1;
        Self {
            config,
            topology: ResourceTopology::new(),
            tasks: HashMap::new(),
            task_requests: HashMap::new(),
            labels: LabelIndex::new(),
            registry: EcRegistry::new(),
            scorer: PriorityScorer::new(),
            knowledge_base,
            infinity,
        }
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &CostModelConfig {
        &self.config
    }

    /// Current flattened-cost ceiling
    #[must_use]
    pub const fn infinity(&self) -> i64 {
        self.infinity
    }

    /// Resource topology mirror
    #[must_use]
    pub const fn topology(&self) -> &ResourceTopology {
        &self.topology
    }

    /// Equivalence-class registry
    #[must_use]
    pub const fn registry(&self) -> &EcRegistry {
        &self.registry
    }

    /// Look up a task descriptor
    #[must_use]
    pub fn task(&self, task_id: TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(&task_id)
    }

    // ---- lifecycle ----

    /// Register a machine subtree and mint its admission slot range
    ///
    /// The effective slot count is `min(max_pods, max_multi_arcs_for_cpu)`.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::OrphanNonMachine`] when the subtree root is not
    /// a machine.
    pub fn add_machine(&mut self, subtree: ResourceSubtree) -> Result<()> {
        let root = &subtree.descriptor;
        if !root.kind.is_machine() {
            return Err(CostError::OrphanNonMachine(root.id));
        }
        let machine = root.id;
        let slots = root.max_pods.min(self.config.max_multi_arcs_for_cpu);
        let name = root.friendly_name.clone();
        self.topology.add_subtree(subtree);
        self.registry.register_machine(machine, &name, slots);
        debug!(%machine, slots, "machine added to cost model");
        Ok(())
    }

    /// Drop a machine, its subtree and its EC slot range
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the machine was
    /// never added.
    pub fn remove_machine(&mut self, machine: ResourceId) -> Result<()> {
        if !self.registry.unregister_machine(machine) {
            return Err(CostError::MissingRegistryEntry(format!("machine {machine}")));
        }
        self.topology.remove_subtree(machine)?;
        debug!(%machine, "machine removed from cost model");
        Ok(())
    }

    /// Register a task, snapshotting its resource request
    ///
    /// Re-adding an id replaces the previous descriptor and its labels.
    pub fn add_task(&mut self, td: TaskDescriptor) {
        if let Some(old) = self.tasks.get(&td.id) {
            self.labels.remove_task(old);
        }
        self.task_requests.insert(td.id, td.resource_request);
        self.labels.add_task(&td);
        self.tasks.insert(td.id, td);
    }

    /// Drop a task and its request snapshot
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the task is unknown.
    pub fn remove_task(&mut self, task_id: TaskId) -> Result<()> {
        let td = self
            .tasks
            .remove(&task_id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task {}", task_id.get())))?;
        self.task_requests.remove(&task_id);
        self.labels.remove_task(&td);
        if let Some(pu) = td.scheduled_to {
            if let Some(rd) = self.topology.find_mut(pu) {
                rd.current_running_tasks.remove(&task_id);
            }
        }
        Ok(())
    }

    /// Bind a task to a processing unit, marking it running
    ///
    /// Applied by the orchestrator when the solver's flow assignment picks
    /// a placement; co-location state feeds the next round's affinity
    /// matching.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the task or the
    /// processing unit is unknown.
    pub fn bind_task(&mut self, task_id: TaskId, pu: ResourceId) -> Result<()> {
        if self.topology.find(pu).is_none() {
            return Err(CostError::MissingRegistryEntry(format!("resource {pu}")));
        }
        let td = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task {}", task_id.get())))?;
        if let Some(previous) = td.scheduled_to.take() {
            if let Some(rd) = self.topology.find_mut(previous) {
                rd.current_running_tasks.remove(&task_id);
            }
        }
        td.state = TaskState::Running;
        td.scheduled_to = Some(pu);
        if let Some(rd) = self.topology.find_mut(pu) {
            rd.current_running_tasks.insert(task_id);
        }
        Ok(())
    }

    /// Unbind a running task, returning it to the runnable pool
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the task is unknown.
    pub fn unbind_task(&mut self, task_id: TaskId) -> Result<()> {
        let td = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task {}", task_id.get())))?;
        td.state = TaskState::Runnable;
        if let Some(pu) = td.scheduled_to.take() {
            if let Some(rd) = self.topology.find_mut(pu) {
                rd.current_running_tasks.remove(&task_id);
            }
        }
        Ok(())
    }

    // ---- arc pricing ----

    /// Task to unscheduled aggregator
    #[must_use]
    pub const fn task_to_unscheduled_agg(&self, _task: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(TASK_TO_UNSCHEDULED_COST, 1, 0)
    }

    /// Unscheduled aggregator to sink
    #[must_use]
    pub const fn unscheduled_agg_to_sink(&self, _job: JobId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// Task directly to a resource node (preference override)
    #[must_use]
    pub const fn task_to_resource(&self, _task: TaskId, _res: ResourceId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// Resource node to its parent's flow node
    ///
    /// Capacity is the destination's aggregated slot count.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] for unknown resources.
    pub fn resource_to_resource(&self, _src: ResourceId, dst: ResourceId) -> Result<ArcDescriptor> {
        let rd = self
            .topology
            .find(dst)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("resource {dst}")))?;
        Ok(ArcDescriptor::new(0, rd.num_slots_below, 0))
    }

    /// Leaf (PU) to sink
    ///
    /// Capacity is the owning machine's admission ceiling, falling back to
    /// the legacy per-PU cap when the machine has none set.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] for unknown resources
    /// and [`CostError::OrphanNonMachine`] when the leaf has no machine
    /// above it.
    pub fn leaf_to_sink(&self, res: ResourceId) -> Result<ArcDescriptor> {
        let machine = self.topology.machine_of(res)?;
        let rd = self
            .topology
            .find(machine)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("machine {machine}")))?;
        let capacity = if rd.max_pods > 0 {
            rd.max_pods
        } else {
            self.config.max_tasks_per_pu
        };
        Ok(ArcDescriptor::new(0, capacity, 0))
    }

    /// Continuation arc for a running task
    ///
    /// TODO(preemption): price continuation against preemption once the
    /// preemption cost dimension exists; until then both arcs are free.
    #[must_use]
    pub const fn task_continuation(&self, _task: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// Preemption arc for a running task
    #[must_use]
    pub const fn task_preemption(&self, _task: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// Task to its equivalence-class aggregator
    #[must_use]
    pub const fn task_to_ec(&self, _task: TaskId, _ec: EquivClass) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// EC aggregator to a resource node; unit flow only
    #[must_use]
    pub const fn ec_to_resource(&self, _ec: EquivClass, _res: ResourceId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    /// Price a task-EC to machine-EC arc
    ///
    /// Admission is checked against the slot index: a machine that cannot
    /// hold `slot` replicas of the request ahead of this one yields a
    /// zero-capacity arc. Otherwise the cost vector combines the
    /// least-requested and balanced-allocation fractions with the
    /// normalised soft affinity scores.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when either EC (or the
    /// backing machine) is unknown; this is registry corruption.
    pub fn ec_to_ec(&mut self, ec1: EquivClass, ec2: EquivClass) -> Result<ArcDescriptor> {
        let request = *self
            .registry
            .request_of(ec1)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task EC {:#x}", ec1.get())))?;
        let machine = self
            .registry
            .machine_of_ec(ec2)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("machine EC {:#x}", ec2.get())))?;
        let slot = self
            .registry
            .slot_of_ec(ec2)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("machine EC {:#x}", ec2.get())))?;
        let rd = self
            .topology
            .find(machine)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("machine {machine}")))?;

        let ahead = request.scaled(slot);
        if !ahead.fits_within(&rd.available) {
            return Ok(ArcDescriptor::blocked());
        }
        let post = rd.available.saturating_sub(&ahead);

        let cpu_frac = used_fraction(rd.capacity.cpu_cores, post.cpu_cores);
        let ram_frac = used_fraction(rd.capacity.ram_cap, post.ram_cap);
        let omega = self.config.omega;
        let omega_f = omega as f64;

        let cpu_mem_cost = (((cpu_frac * omega_f) + (ram_frac * omega_f)) / 2.0) as i64;
        let mean = (cpu_frac + ram_frac) / 2.0;
        let variance = ((cpu_frac - mean).powi(2) + (ram_frac - mean).powi(2)) / 2.0;
        let balanced_res_cost = (variance * omega_f) as i64;

        let td = self
            .registry
            .representative_task(ec1)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task EC {:#x}", ec1.get())))?;
        let node_in_use = td.affinity.as_ref().is_some_and(Affinity::has_preferred_node_terms);
        let pod_in_use = td.affinity.as_ref().is_some_and(Affinity::has_preferred_pod_terms);

        let node_affinity_soft_cost = if node_in_use {
            omega - self.scorer.normalized_node_score(ec1, machine, omega).unwrap_or(0)
        } else {
            0
        };
        let pod_affinity_soft_cost = if pod_in_use {
            omega - self.scorer.normalized_pod_score(ec1, machine, omega).unwrap_or(0)
        } else {
            0
        };

        let vector = CostVector {
            cpu_mem_cost: cpu_mem_cost.clamp(0, omega),
            balanced_res_cost: balanced_res_cost.clamp(0, omega),
            node_affinity_soft_cost: node_affinity_soft_cost.clamp(0, omega),
            pod_affinity_soft_cost: pod_affinity_soft_cost.clamp(0, omega),
        };
        Ok(ArcDescriptor::new(self.flatten(vector), 1, 0))
    }

    /// Flatten a cost vector, growing the ceiling when needed
    fn flatten(&mut self, vector: CostVector) -> i64 {
        let flat = vector.flatten();
        if flat > self.infinity {
            debug!(flat, previous = self.infinity, "raising flattened-cost ceiling");
            self.infinity = flat + 1;
        }
        flat
    }

    // ---- graph shape queries ----

    /// Equivalence classes a task belongs to (currently always one)
    ///
    /// Resolving pins the EC to the task's request snapshot and a
    /// representative descriptor on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the task or its
    /// request snapshot is unknown.
    pub fn task_ecs(&mut self, task_id: TaskId) -> Result<Vec<EquivClass>> {
        let td = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task {}", task_id.get())))?;
        let request = *self
            .task_requests
            .get(&task_id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task {} request", task_id.get())))?;
        Ok(vec![self.registry.task_ec_for(td, request)])
    }

    /// Machines a task specifically prefers
    ///
    /// Always empty: all routing goes through the EC layer. Reserved for
    /// dedicated pins.
    #[must_use]
    pub fn task_preferences(&self, _task: TaskId) -> Vec<ResourceId> {
        Vec::new()
    }

    /// Resource nodes an EC points at
    ///
    /// Machine ECs point at their backing machine; task ECs route through
    /// machine ECs instead and have no direct resource preferences.
    #[must_use]
    pub fn outgoing_ec_pref_arcs(&self, ec: EquivClass) -> Vec<ResourceId> {
        self.registry.machine_of_ec(ec).into_iter().collect()
    }

    /// Machine ECs a task EC may route through this round
    ///
    /// The round's workhorse: walks every known machine, applies the hard
    /// node-side and pod-side gates, feeds the soft scores into the
    /// normalisation pipeline, and emits one machine EC per admission slot
    /// the machine still has room for.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when a registered
    /// machine lost its topology entry or the EC's representative task is
    /// gone; both indicate registry corruption.
    pub fn ec_to_ec_arcs(&mut self, ec: EquivClass) -> Result<Vec<EquivClass>> {
        let Some(request) = self.registry.request_of(ec).copied() else {
            // Unknown ECs produce no arcs; the solver routes via the
            // unscheduled aggregator.
            return Ok(Vec::new());
        };
        let td = self
            .registry
            .representative_task(ec)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("task EC {:#x}", ec.get())))?
            .clone();

        // Fresh scores for the whole node axis and this EC's pod axis; a
        // stale final score would survive normalisation otherwise.
        self.scorer.clear_node_scores();
        self.scorer.clear_pod_scores_for(ec);

        let node_in_use = td.affinity.as_ref().is_some_and(Affinity::has_preferred_node_terms);
        let pod_in_use = td.affinity.as_ref().is_some_and(Affinity::has_preferred_pod_terms);
        let evaluator = ConstraintEvaluator::new(&self.topology, &self.tasks, &self.labels);

        let mut pref = Vec::new();
        let mut admitted_machines = 0usize;
        for (machine_id, machine_ecs) in self.registry.machines() {
            let Some(rd) = self.topology.find(machine_id) else {
                return Err(CostError::MissingRegistryEntry(format!("machine {machine_id}")));
            };
            if !ConstraintEvaluator::satisfies_node_selector_and_node_affinity_required(rd, &td) {
                continue;
            }
            if node_in_use {
                let raw = ConstraintEvaluator::node_preferred_raw_score(rd, td.affinity.as_ref());
                self.scorer.record_node_score(ec, machine_id, raw, raw > 0);
            }
            if !evaluator.satisfies_pod_affinity_antiaffinity_required(machine_id, &td) {
                continue;
            }
            if pod_in_use {
                let raw = evaluator.pod_preferred_raw_score(machine_id, &td);
                self.scorer.record_pod_score(ec, machine_id, raw, true);
            }

            // Admission staircase: one machine EC per replica the machine
            // still has room for, bounded by the slot range.
            let before = pref.len();
            for (slot, machine_ec) in machine_ecs.iter().enumerate() {
                let needed = request.scaled(slot as u64 + 1);
                if !needed.fits_within(&rd.available) {
                    break;
                }
                pref.push(*machine_ec);
            }
            if pref.len() > before {
                admitted_machines += 1;
            }
        }
        debug!(
            ec = ec.get(),
            arcs = pref.len(),
            machines = admitted_machines,
            "computed EC preference arcs"
        );
        Ok(pref)
    }

    // ---- stats passes ----

    /// Reset a node's aggregates ahead of a stats pass
    ///
    /// Clears the running-task and slot aggregates, zeroes the aggregated
    /// cpu component on non-leaf nodes, and wipes the round's priority
    /// scores. PU availability survives so a machine without a fresh
    /// utilisation sample keeps its last observed vector.
    pub fn prepare_stats(&mut self, node: ResourceId) {
        self.scorer.clear();
        if let Some(rd) = self.topology.find_mut(node) {
            rd.num_running_tasks_below = 0;
            rd.num_slots_below = 0;
            if !rd.kind.is_pu() {
                rd.available.cpu_cores = 0;
            }
        }
    }

    /// Fold stats upward along one edge of the resource tree
    ///
    /// With `child = None` the accumulator borders the sink: a PU pulls its
    /// core's utilisation sample and publishes its running-task and slot
    /// counts. With a child, the accumulator absorbs the child's aggregates
    /// and, on machines, refreshes memory availability from the machine
    /// sample.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] for unknown resources,
    /// [`CostError::OrphanNonMachine`] for a PU with no machine above it,
    /// and [`CostError::CapacityExceeded`] when aggregated availability
    /// overruns capacity.
    pub fn gather_stats(&mut self, accumulator: ResourceId, child: Option<ResourceId>) -> Result<()> {
        match child {
            None => self.gather_leaf(accumulator),
            Some(child) => self.gather_child(accumulator, child),
        }
    }

    fn gather_leaf(&mut self, leaf: ResourceId) -> Result<()> {
        let kind = self
            .topology
            .find(leaf)
            .map(|rd| rd.kind)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("resource {leaf}")))?;
        if !kind.is_pu() {
            // Only PUs border the sink; other leaves have nothing to pull.
            return Ok(());
        }
        let machine = self.topology.machine_of(leaf)?;
        let max_pods = self
            .topology
            .find(machine)
            .map(|rd| rd.max_pods)
            .unwrap_or_default();
        let sample = self.knowledge_base.latest_machine_sample(machine);
        let Some(rd) = self.topology.find_mut(leaf) else {
            return Err(CostError::MissingRegistryEntry(format!("resource {leaf}")));
        };
        if let Some(sample) = sample {
            match core_id_from_name(&rd.friendly_name)
                .and_then(|core| sample.cpus_stats.get(core))
            {
                Some(core) => {
                    rd.available.cpu_cores =
                        (core.cpu_capacity as f64 * (1.0 - core.cpu_utilization)) as u64;
                }
                None => warn!(pu = %leaf, name = %rd.friendly_name, "no core sample for PU"),
            }
        }
        rd.num_running_tasks_below = rd.current_running_tasks.len() as u64;
        rd.num_slots_below = max_pods;
        Ok(())
    }

    fn gather_child(&mut self, accumulator: ResourceId, child: ResourceId) -> Result<()> {
        let child_desc = self
            .topology
            .find(child)
            .cloned()
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("resource {child}")))?;
        let kind = self
            .topology
            .find(accumulator)
            .map(|rd| rd.kind)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("resource {accumulator}")))?;
        let sample = if kind.is_machine() {
            self.knowledge_base.latest_machine_sample(accumulator)
        } else {
            None
        };
        let Some(rd) = self.topology.find_mut(accumulator) else {
            return Err(CostError::MissingRegistryEntry(format!("resource {accumulator}")));
        };
        if let Some(sample) = sample {
            rd.available.ram_cap =
                (sample.mem_capacity as f64 * (1.0 - sample.mem_utilization)) as u64;
        }
        let added = ResourceVec::new(child_desc.available.cpu_cores, 0);
        let bound = ResourceVec::new(rd.capacity.cpu_cores, u64::MAX);
        let owner = rd.id;
        rd.available.accumulate_within(&added, &bound, owner)?;
        rd.num_running_tasks_below += child_desc.num_running_tasks_below;
        rd.num_slots_below += child_desc.num_slots_below;
        Ok(())
    }

    /// Stats refresh hook after the solver runs; intentionally a no-op
    pub fn update_stats(&mut self, _node: ResourceId, _child: Option<ResourceId>) {}

    /// Run a full prepare-and-gather pass over every machine subtree
    ///
    /// Convenience for orchestrators that refresh the whole mirror at once
    /// rather than driving the per-edge calls themselves.
    ///
    /// # Errors
    ///
    /// Propagates the first [`gather_stats`](Self::gather_stats) failure.
    pub fn run_stats_pass(&mut self) -> Result<()> {
        let nodes: Vec<ResourceId> = self.topology.descriptors().map(|rd| rd.id).collect();
        for node in nodes {
            self.prepare_stats(node);
        }
        let machines: Vec<ResourceId> = self.registry.machines().map(|(id, _)| id).collect();
        for machine in machines {
            self.gather_subtree(machine)?;
        }
        Ok(())
    }

    fn gather_subtree(&mut self, node: ResourceId) -> Result<()> {
        let children = self.topology.children(node).to_vec();
        if children.is_empty() {
            return self.gather_stats(node, None);
        }
        for child in children {
            self.gather_subtree(child)?;
            self.gather_stats(node, Some(child))?;
        }
        Ok(())
    }
}

fn used_fraction(capacity: u64, available: u64) -> f64 {
    if capacity == 0 {
        return 1.0;
    }
    let used = capacity.saturating_sub(available);
    (used as f64 / capacity as f64).clamp(0.0, 1.0)
}
