//! Core data structures for the flow-graph cost model
//!
//! Identifiers for resources, tasks, jobs and equivalence classes, the
//! resource and task descriptor records, the node/pod affinity model, and
//! the `ArcDescriptor`/`CostVector` pair handed to the flow solver.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CostError, Result};

/// Opaque 128-bit identifier for a node in the resource tree.
///
/// Every machine, socket and processing unit carries one. Wraps a UUID so
/// identifiers can be minted independently on every cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    /// Create a `ResourceId` from an existing UUID
    #[inline]
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Mint a fresh random `ResourceId`
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[inline]
    #[must_use]
    pub const fn get(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Compact task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a `TaskId` from a u64
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Compact job identifier
///
/// All tasks of a job share one `JobId`; affinity-bearing jobs are
/// aggregated into a single task equivalence class keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    /// Create a `JobId` from a u64
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Equivalence-class identifier
///
/// 64-bit truncation of a domain-separated BLAKE3 signature. Task ECs group
/// interchangeable tasks; machine ECs represent one admission slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EquivClass(pub u64);

impl EquivClass {
    /// Create an `EquivClass` from a u64
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Create an `EquivClass` from the first 8 bytes of a BLAKE3 hash
    #[must_use]
    pub fn from_hash(hash: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        Self(u64::from_le_bytes(bytes))
    }
}

/// Resource tree node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Cluster coordinator, root of the whole tree
    Coordinator,
    /// A schedulable machine
    Machine,
    /// NUMA domain within a machine
    NumaNode,
    /// CPU socket
    Socket,
    /// Physical core
    Core,
    /// Processing unit, the leaf the solver routes flow through
    Pu,
}

impl ResourceKind {
    /// Check whether this node is a machine
    #[inline]
    #[must_use]
    pub const fn is_machine(self) -> bool {
        matches!(self, Self::Machine)
    }

    /// Check whether this node is a processing unit leaf
    #[inline]
    #[must_use]
    pub const fn is_pu(self) -> bool {
        matches!(self, Self::Pu)
    }
}

/// Task lifecycle state
///
/// The cost model observes but never drives these transitions; only
/// `Running` tasks count as co-located for affinity evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskState {
    /// Submitted but not yet runnable
    #[default]
    Created,
    /// Eligible for placement this round
    Runnable,
    /// Bound to a processing unit
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskState {
    /// Check whether the task currently occupies a slot
    #[inline]
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check whether the task has reached a terminal state
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Two-dimensional resource quantity: cpu in millicores, ram in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceVec {
    /// CPU in millicores
    pub cpu_cores: u64,
    /// RAM capacity in bytes
    pub ram_cap: u64,
}

impl ResourceVec {
    /// Create a new `ResourceVec`
    #[inline]
    #[must_use]
    pub const fn new(cpu_cores: u64, ram_cap: u64) -> Self {
        Self { cpu_cores, ram_cap }
    }

    /// The zero quantity
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            cpu_cores: 0,
            ram_cap: 0,
        }
    }

    /// Check whether both dimensions fit within `other`
    #[inline]
    #[must_use]
    pub const fn fits_within(&self, other: &Self) -> bool {
        self.cpu_cores <= other.cpu_cores && self.ram_cap <= other.ram_cap
    }

    /// Multiply both dimensions by a scalar, saturating at `u64::MAX`
    #[inline]
    #[must_use]
    pub const fn scaled(&self, factor: u64) -> Self {
        Self {
            cpu_cores: self.cpu_cores.saturating_mul(factor),
            ram_cap: self.ram_cap.saturating_mul(factor),
        }
    }

    /// Subtract `other` from both dimensions, saturating at zero
    #[inline]
    #[must_use]
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            ram_cap: self.ram_cap.saturating_sub(other.ram_cap),
        }
    }

    /// Accumulate `other` into `self`, failing if the sum would exceed `bound`
    ///
    /// # Errors
    ///
    /// Returns [`CostError::CapacityExceeded`] when either dimension of the
    /// sum lies above the corresponding dimension of `bound`.
    pub fn accumulate_within(&mut self, other: &Self, bound: &Self, owner: ResourceId) -> Result<()> {
        let cpu = self.cpu_cores.saturating_add(other.cpu_cores);
        let ram = self.ram_cap.saturating_add(other.ram_cap);
        if cpu > bound.cpu_cores || ram > bound.ram_cap {
            return Err(CostError::CapacityExceeded {
                resource: owner,
                accumulated: Self::new(cpu, ram),
                capacity: *bound,
            });
        }
        self.cpu_cores = cpu;
        self.ram_cap = ram;
        Ok(())
    }
}

/// Per-node record in the resource tree
///
/// Machines carry the admission ceiling (`max_pods`) and the label set the
/// node-side constraint predicates match against. The `*_below` aggregates
/// are recomputed by the stats pass every round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource identifier
    pub id: ResourceId,
    /// Node type
    pub kind: ResourceKind,
    /// Human-readable name; PU names follow the `"PU #<n>"` convention
    pub friendly_name: String,
    /// Parent resource, absent only on tree roots
    pub parent: Option<ResourceId>,
    /// Total capacity
    pub capacity: ResourceVec,
    /// Available resources as of the latest stats pass
    pub available: ResourceVec,
    /// Machine labels matched by node selectors and node affinity
    pub labels: BTreeMap<String, String>,
    /// Running tasks aggregated below this node
    pub num_running_tasks_below: u64,
    /// Admission slots aggregated below this node
    pub num_slots_below: u64,
    /// Admission ceiling, machine-scoped; 0 means unset
    pub max_pods: u64,
    /// Tasks currently bound to this node
    pub current_running_tasks: BTreeSet<TaskId>,
}

impl ResourceDescriptor {
    /// Create a descriptor with empty capacity and no labels
    #[must_use]
    pub fn new(id: ResourceId, kind: ResourceKind, friendly_name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            friendly_name: friendly_name.into(),
            parent: None,
            capacity: ResourceVec::zero(),
            available: ResourceVec::zero(),
            labels: BTreeMap::new(),
            num_running_tasks_below: 0,
            num_slots_below: 0,
            max_pods: 0,
            current_running_tasks: BTreeSet::new(),
        }
    }

    /// Set capacity and make the full capacity available
    #[must_use]
    pub fn with_capacity(mut self, capacity: ResourceVec) -> Self {
        self.capacity = capacity;
        self.available = capacity;
        self
    }

    /// Set the admission ceiling
    #[must_use]
    pub const fn with_max_pods(mut self, max_pods: u64) -> Self {
        self.max_pods = max_pods;
        self
    }

    /// Add a machine label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Operator in a node-side match expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOperator {
    /// Label value must be one of the listed values
    In,
    /// Label value must not be one of the listed values
    NotIn,
    /// Label key must be present
    Exists,
    /// Label key must be absent
    DoesNotExist,
    /// Label value, parsed as an integer, must be greater than the single listed value
    Gt,
    /// Label value, parsed as an integer, must be less than the single listed value
    Lt,
}

impl NodeOperator {
    /// Wire name of the operator
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
            Self::Gt => "Gt",
            Self::Lt => "Lt",
        }
    }
}

impl TryFrom<&str> for NodeOperator {
    type Error = CostError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            "Gt" => Ok(Self::Gt),
            "Lt" => Ok(Self::Lt),
            other => Err(CostError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// Operator in a pod-side match expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodOperator {
    /// Some co-located pod must carry one of the listed values
    In,
    /// No co-located pod may carry one of the listed values
    NotIn,
    /// Some co-located pod must carry the key
    Exists,
    /// No co-located pod may carry the key
    DoesNotExist,
}

impl PodOperator {
    /// Wire name of the operator
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        }
    }
}

impl TryFrom<&str> for PodOperator {
    type Error = CostError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(CostError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// Task-level label selector, matched against machine labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Machine label key
    pub key: String,
    /// Match operator
    pub op: PodOperator,
    /// Candidate values; empty for `Exists`/`DoesNotExist`
    pub values: Vec<String>,
}

/// Single match expression over machine labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMatchExpression {
    /// Machine label key
    pub key: String,
    /// Match operator
    pub op: NodeOperator,
    /// Candidate values; single element for `Gt`/`Lt`
    pub values: Vec<String>,
}

/// Conjunction of node match expressions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    /// Expressions that must all hold for the term to match
    pub match_expressions: Vec<NodeMatchExpression>,
}

/// Weighted node selector term for soft node affinity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedNodeSelectorTerm {
    /// Weight in `[1, 100]`; zero-weight terms are skipped
    pub weight: i64,
    /// The term to match
    pub preference: NodeSelectorTerm,
}

/// Node affinity: required terms form a disjunction, preferred terms score
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeAffinity {
    /// Hard constraint; any matching term admits the machine
    pub required: Vec<NodeSelectorTerm>,
    /// Soft constraint; matching terms contribute their weight
    pub preferred: Vec<WeightedNodeSelectorTerm>,
}

/// Single match expression over co-located pods' labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMatchExpression {
    /// Pod label key
    pub key: String,
    /// Match operator
    pub op: PodOperator,
    /// Candidate values; empty for `Exists`/`DoesNotExist`
    pub values: Vec<String>,
}

/// Pod (anti-)affinity term: a label selector plus a namespace scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodAffinityTerm {
    /// Expressions that must all hold for the term to match
    pub match_expressions: Vec<PodMatchExpression>,
    /// Namespaces the co-located pods are drawn from; empty means the
    /// scheduled task's own namespace
    pub namespaces: Vec<String>,
}

/// Weighted pod affinity term for the soft pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPodAffinityTerm {
    /// Weight in `[1, 100]`; zero-weight terms are skipped
    pub weight: i64,
    /// The term to match
    pub term: PodAffinityTerm,
}

/// Pod affinity or anti-affinity block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodAffinity {
    /// Hard terms; all must be satisfied
    pub required: Vec<PodAffinityTerm>,
    /// Soft terms; satisfied terms contribute their weight
    pub preferred: Vec<WeightedPodAffinityTerm>,
}

/// Full affinity specification of a task
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Affinity {
    /// Node affinity sub-spec
    pub node_affinity: Option<NodeAffinity>,
    /// Pod affinity sub-spec
    pub pod_affinity: Option<PodAffinity>,
    /// Pod anti-affinity sub-spec
    pub pod_anti_affinity: Option<PodAffinity>,
}

impl Affinity {
    /// Check whether any preferred node terms are present
    #[must_use]
    pub fn has_preferred_node_terms(&self) -> bool {
        self.node_affinity
            .as_ref()
            .is_some_and(|na| !na.preferred.is_empty())
    }

    /// Check whether any preferred pod or anti-pod terms are present
    #[must_use]
    pub fn has_preferred_pod_terms(&self) -> bool {
        self.pod_affinity
            .as_ref()
            .is_some_and(|pa| !pa.preferred.is_empty())
            || self
                .pod_anti_affinity
                .as_ref()
                .is_some_and(|pa| !pa.preferred.is_empty())
    }
}

/// Per-task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task identifier
    pub id: TaskId,
    /// Owning job
    pub job_id: JobId,
    /// Namespace for pod affinity scoping
    pub namespace: String,
    /// Lifecycle state
    pub state: TaskState,
    /// Requested resources per replica
    pub resource_request: ResourceVec,
    /// Task labels, matched by other tasks' pod affinity
    pub labels: BTreeMap<String, String>,
    /// Node selectors, matched against machine labels
    pub label_selectors: Vec<LabelSelector>,
    /// Optional affinity specification
    pub affinity: Option<Affinity>,
    /// Processing unit the task is bound to while `Running`
    pub scheduled_to: Option<ResourceId>,
}

impl TaskDescriptor {
    /// Create a runnable task with the given request
    #[must_use]
    pub fn new(id: TaskId, job_id: JobId, namespace: impl Into<String>, request: ResourceVec) -> Self {
        Self {
            id,
            job_id,
            namespace: namespace.into(),
            state: TaskState::Runnable,
            resource_request: request,
            labels: BTreeMap::new(),
            label_selectors: Vec::new(),
            affinity: None,
            scheduled_to: None,
        }
    }

    /// Add a task label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Attach an affinity specification
    #[must_use]
    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Attach node selectors
    #[must_use]
    pub fn with_selectors(mut self, selectors: Vec<LabelSelector>) -> Self {
        self.label_selectors = selectors;
        self
    }
}

/// Arc parameters returned to the flow solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcDescriptor {
    /// Arc cost
    pub cost: i64,
    /// Arc capacity; zero makes the arc inadmissible
    pub capacity: u64,
    /// Arc lower bound on flow
    pub lower_bound: u64,
}

impl ArcDescriptor {
    /// Create a new `ArcDescriptor`
    #[inline]
    #[must_use]
    pub const fn new(cost: i64, capacity: u64, lower_bound: u64) -> Self {
        Self {
            cost,
            capacity,
            lower_bound,
        }
    }

    /// The inadmissible arc: zero cost, zero capacity
    #[inline]
    #[must_use]
    pub const fn blocked() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Cost vector for a task-EC to machine-EC arc
///
/// Each dimension lies in `[0, omega]`; the solver consumes the flattened
/// scalar sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostVector {
    /// Least-requested priority dimension
    pub cpu_mem_cost: i64,
    /// Balanced-allocation priority dimension
    pub balanced_res_cost: i64,
    /// Soft node affinity dimension
    pub node_affinity_soft_cost: i64,
    /// Soft pod affinity and anti-affinity dimension
    pub pod_affinity_soft_cost: i64,
}

impl CostVector {
    /// Number of dimensions in the vector
    pub const DIMENSIONS: i64 = 4;

    /// Flatten the vector into the scalar the solver consumes
    #[inline]
    #[must_use]
    pub const fn flatten(&self) -> i64 {
        self.cpu_mem_cost
            + self.balanced_res_cost
            + self.node_affinity_soft_cost
            + self.pod_affinity_soft_cost
    }
}
