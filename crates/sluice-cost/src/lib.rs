//! CPU/Memory Cost Model for the Sluice Flow Scheduler
//!
//! This crate builds the cost side of a min-cost max-flow cluster scheduler:
//! for every scheduling round it prices the arcs of a flow graph whose nodes
//! are tasks, equivalence-class aggregators, resource-tree nodes and a sink.
//! The solver and the transport that feeds it live elsewhere; this crate only
//! answers "what does this arc cost and how much flow may it carry".
//!
//! # Key Components
//!
//! - **Resource Topology**: arena-backed mirror of the machine/PU tree
//! - **Label Index**: label to task lookup used by affinity matching
//! - **EC Registry**: task and machine equivalence-class assignment
//! - **Constraint Evaluator**: hard node/pod predicates, soft scoring
//! - **Priority Scorer**: per-EC min/max normalisation of soft scores
//! - **Cost Model**: the arc pricing API the solver consumes
//! - **Stats Aggregator**: per-round utilisation refresh over the tree

pub mod constraints;
pub mod cost_model;
pub mod labels;
pub mod registry;
pub mod scoring;
pub mod stats;
pub mod topology;
pub mod types;

pub use constraints::ConstraintEvaluator;
pub use cost_model::{CostModelConfig, CpuCostModel, TASK_TO_UNSCHEDULED_COST};
pub use labels::LabelIndex;
pub use registry::EcRegistry;
pub use scoring::{MinMaxScores, PriorityScore, PriorityScorer};
pub use stats::{CpuSample, KnowledgeBase, MachineSample, StaticKnowledgeBase};
pub use topology::{ResourceSubtree, ResourceTopology};
pub use types::{
    Affinity, ArcDescriptor, CostVector, EquivClass, JobId, LabelSelector, NodeAffinity,
    NodeMatchExpression, NodeOperator, NodeSelectorTerm, PodAffinity, PodAffinityTerm,
    PodMatchExpression, PodOperator, ResourceDescriptor, ResourceId, ResourceKind, ResourceVec,
    TaskDescriptor, TaskId, TaskState, WeightedNodeSelectorTerm, WeightedPodAffinityTerm,
};

use thiserror::Error;

/// Cost model error types
///
/// Every variant indicates caller error or registry corruption; none are
/// recovered locally. Unsatisfiable placements are expressed as
/// zero-capacity arcs, never as errors.
#[derive(Debug, Error)]
pub enum CostError {
    /// A query referenced an EC, task or machine the registry does not know
    #[error("missing registry entry: {0}")]
    MissingRegistryEntry(String),

    /// A non-machine resource has no parent to walk to
    #[error("non-machine resource {0} has no parent")]
    OrphanNonMachine(types::ResourceId),

    /// A label-selector operator outside the documented set
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An accumulated resource vector exceeded its capacity bound
    #[error("accumulated {accumulated:?} exceeds capacity {capacity:?} on {resource}")]
    CapacityExceeded {
        /// Resource whose bound was violated
        resource: types::ResourceId,
        /// The offending accumulated vector
        accumulated: types::ResourceVec,
        /// The capacity bound
        capacity: types::ResourceVec,
    },
}

/// Result type for cost model operations
pub type Result<T> = std::result::Result<T, CostError>;
