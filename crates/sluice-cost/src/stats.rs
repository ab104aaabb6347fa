//! Utilisation samples and the knowledge-base seam
//!
//! The external knowledge base samples machine utilisation out of band; the
//! stats pass pulls the latest sample per machine while walking the
//! resource tree between rounds. A machine without a fresh sample keeps its
//! last observed available vector.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ResourceId;

/// Utilisation sample for a single processing unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    /// Core capacity in millicores
    pub cpu_capacity: u64,
    /// Utilised fraction in `[0, 1]`
    pub cpu_utilization: f64,
    /// Allocatable millicores after system reservations
    pub cpu_allocatable: u64,
}

/// Latest utilisation sample for a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSample {
    /// Per-core samples, indexed by core id
    pub cpus_stats: Vec<CpuSample>,
    /// Memory capacity in bytes
    pub mem_capacity: u64,
    /// Utilised memory fraction in `[0, 1]`
    pub mem_utilization: f64,
    /// Allocatable bytes after system reservations
    pub mem_allocatable: u64,
}

/// Source of machine utilisation samples
pub trait KnowledgeBase {
    /// Latest sample for a machine, or `None` when no update arrived
    fn latest_machine_sample(&self, machine: ResourceId) -> Option<MachineSample>;
}

/// In-memory knowledge base for tests, benches and the simulator harness
#[derive(Debug, Default)]
pub struct StaticKnowledgeBase {
    samples: HashMap<ResourceId, MachineSample>,
}

impl StaticKnowledgeBase {
    /// Create an empty knowledge base
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the sample for a machine
    pub fn insert(&mut self, machine: ResourceId, sample: MachineSample) {
        self.samples.insert(machine, sample);
    }

    /// Drop the sample for a machine
    pub fn remove(&mut self, machine: ResourceId) {
        self.samples.remove(&machine);
    }
}

impl KnowledgeBase for StaticKnowledgeBase {
    fn latest_machine_sample(&self, machine: ResourceId) -> Option<MachineSample> {
        self.samples.get(&machine).cloned()
    }
}

/// Parse the core id out of a PU's friendly name
///
/// PU names follow the `"... PU #<n>"` convention; anything else yields
/// `None` and the PU keeps its previous available vector.
#[must_use]
pub(crate) fn core_id_from_name(friendly_name: &str) -> Option<usize> {
    let idx = friendly_name.find("PU #")?;
    friendly_name[idx + 4..].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_id_parsing() {
        assert_eq!(core_id_from_name("machine-7 PU #0"), Some(0));
        assert_eq!(core_id_from_name("PU #12"), Some(12));
        assert_eq!(core_id_from_name("socket 1 core 2"), None);
        assert_eq!(core_id_from_name("PU #"), None);
        assert_eq!(core_id_from_name("PU #x"), None);
    }

    #[test]
    fn test_static_knowledge_base_round_trip() {
        let mut kb = StaticKnowledgeBase::new();
        let machine = ResourceId::random();
        assert!(kb.latest_machine_sample(machine).is_none());

        let sample = MachineSample {
            cpus_stats: vec![CpuSample {
                cpu_capacity: 1000,
                cpu_utilization: 0.5,
                cpu_allocatable: 900,
            }],
            mem_capacity: 8 << 30,
            mem_utilization: 0.25,
            mem_allocatable: 7 << 30,
        };
        kb.insert(machine, sample.clone());
        assert_eq!(kb.latest_machine_sample(machine), Some(sample));

        kb.remove(machine);
        assert!(kb.latest_machine_sample(machine).is_none());
    }
}
