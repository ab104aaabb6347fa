//! Equivalence-class registry
//!
//! Assigns and memoises 64-bit EC identifiers. Task ECs group tasks by
//! placement signature; machine ECs represent one admission slot each, so a
//! machine with `n` effective slots owns the contiguous slot range
//! `[0, n)`. All signatures are domain-separated BLAKE3 hashes truncated to
//! their first 8 bytes, so request-only and selectors-plus-request
//! signatures can never collide by sharing a numeric prefix.
//!
//! Duplicate inserts are silently idempotent: the first pinned request and
//! representative task for an EC win, matching re-creation semantics.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{EquivClass, JobId, LabelSelector, ResourceId, ResourceVec, TaskDescriptor};

const DOMAIN_TASK_EC_JOB: &[u8] = b"sluice-cost.task-ec.job.v1";
const DOMAIN_TASK_EC_SELECTORS: &[u8] = b"sluice-cost.task-ec.selectors.v1";
const DOMAIN_TASK_EC_REQUEST: &[u8] = b"sluice-cost.task-ec.request.v1";
const DOMAIN_MACHINE_EC: &[u8] = b"sluice-cost.machine-ec.v1";

/// Registry of task and machine equivalence classes
#[derive(Debug, Default)]
pub struct EcRegistry {
    ec_to_machine: HashMap<EquivClass, ResourceId>,
    ec_to_slot: HashMap<EquivClass, u64>,
    ecs_for_machines: HashMap<ResourceId, Vec<EquivClass>>,
    ec_request: HashMap<EquivClass, ResourceVec>,
    ec_task: HashMap<EquivClass, TaskDescriptor>,
}

impl EcRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether no machines or task ECs are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ecs_for_machines.is_empty() && self.ec_request.is_empty()
    }

    /// Resolve (or create) the task EC for a descriptor
    ///
    /// Signature policy: affinity-bearing tasks hash their job id, so every
    /// task of such a job lands in one EC; tasks with node selectors hash
    /// selectors plus request; all others hash the request alone. On first
    /// resolution the EC is pinned to an immutable copy of the request and
    /// a representative descriptor.
    pub fn task_ec_for(&mut self, td: &TaskDescriptor, request: ResourceVec) -> EquivClass {
        let ec = if td.affinity.is_some() {
            Self::job_signature(td.job_id)
        } else if td.label_selectors.is_empty() {
            Self::request_signature(request)
        } else {
            Self::selectors_signature(&td.label_selectors, request)
        };
        self.ec_request.entry(ec).or_insert(request);
        self.ec_task.entry(ec).or_insert_with(|| td.clone());
        ec
    }

    /// Pinned resource request of a task EC
    #[must_use]
    pub fn request_of(&self, ec: EquivClass) -> Option<&ResourceVec> {
        self.ec_request.get(&ec)
    }

    /// Representative task descriptor of a task EC
    #[must_use]
    pub fn representative_task(&self, ec: EquivClass) -> Option<&TaskDescriptor> {
        self.ec_task.get(&ec)
    }

    /// Register a machine and mint its slot range of machine ECs
    ///
    /// Re-registering an already known machine is a no-op.
    pub fn register_machine(&mut self, machine: ResourceId, friendly_name: &str, slots: u64) {
        if self.ecs_for_machines.contains_key(&machine) {
            return;
        }
        let mut machine_ecs = Vec::with_capacity(slots as usize);
        for slot in 0..slots {
            let ec = Self::machine_ec(friendly_name, slot);
            self.ec_to_machine.insert(ec, machine);
            self.ec_to_slot.insert(ec, slot);
            machine_ecs.push(ec);
        }
        debug!(%machine, slots, "registered machine EC slot range");
        self.ecs_for_machines.insert(machine, machine_ecs);
    }

    /// Erase a machine's slot range
    ///
    /// Returns `false` when the machine was never registered.
    pub fn unregister_machine(&mut self, machine: ResourceId) -> bool {
        let Some(ecs) = self.ecs_for_machines.remove(&machine) else {
            return false;
        };
        for ec in ecs {
            self.ec_to_machine.remove(&ec);
            self.ec_to_slot.remove(&ec);
        }
        true
    }

    /// Pre-allocated machine EC slot range of a machine
    #[must_use]
    pub fn machine_ecs_of(&self, machine: ResourceId) -> Option<&[EquivClass]> {
        self.ecs_for_machines.get(&machine).map(Vec::as_slice)
    }

    /// Machine backing a machine EC
    #[must_use]
    pub fn machine_of_ec(&self, ec: EquivClass) -> Option<ResourceId> {
        self.ec_to_machine.get(&ec).copied()
    }

    /// Slot index of a machine EC
    #[must_use]
    pub fn slot_of_ec(&self, ec: EquivClass) -> Option<u64> {
        self.ec_to_slot.get(&ec).copied()
    }

    /// Iterate over registered machines and their slot ranges
    pub fn machines(&self) -> impl Iterator<Item = (ResourceId, &[EquivClass])> {
        self.ecs_for_machines
            .iter()
            .map(|(id, ecs)| (*id, ecs.as_slice()))
    }

    /// Number of registered machines
    #[must_use]
    pub fn machine_count(&self) -> usize {
        self.ecs_for_machines.len()
    }

    fn job_signature(job_id: JobId) -> EquivClass {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TASK_EC_JOB);
        hasher.update(&job_id.get().to_le_bytes());
        EquivClass::from_hash(hasher.finalize().as_bytes())
    }

    fn request_signature(request: ResourceVec) -> EquivClass {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TASK_EC_REQUEST);
        Self::update_request(&mut hasher, request);
        EquivClass::from_hash(hasher.finalize().as_bytes())
    }

    fn selectors_signature(selectors: &[LabelSelector], request: ResourceVec) -> EquivClass {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TASK_EC_SELECTORS);
        for selector in selectors {
            Self::update_str(&mut hasher, &selector.key);
            Self::update_str(&mut hasher, selector.op.as_str());
            hasher.update(&(selector.values.len() as u64).to_le_bytes());
            for value in &selector.values {
                Self::update_str(&mut hasher, value);
            }
        }
        Self::update_request(&mut hasher, request);
        EquivClass::from_hash(hasher.finalize().as_bytes())
    }

    fn machine_ec(friendly_name: &str, slot: u64) -> EquivClass {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_MACHINE_EC);
        Self::update_str(&mut hasher, friendly_name);
        hasher.update(&slot.to_le_bytes());
        EquivClass::from_hash(hasher.finalize().as_bytes())
    }

    fn update_request(hasher: &mut blake3::Hasher, request: ResourceVec) {
        hasher.update(&request.cpu_cores.to_le_bytes());
        hasher.update(&request.ram_cap.to_le_bytes());
    }

    // Length-prefixed so adjacent fields cannot merge into one preimage.
    fn update_str(hasher: &mut blake3::Hasher, s: &str) {
        hasher.update(&(s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    }
}
