//! End-to-end tests for the cost model
//!
//! Drives the public API the way the scheduling orchestrator does: machines
//! and tasks go in, a stats pass refreshes the mirror, the preference lists
//! and arc prices come out. Covers the placement scenarios the priority
//! pipeline is designed around:
//! - least-requested and balanced-allocation dominance
//! - hard pod anti-affinity exclusion
//! - soft node affinity normalisation
//! - the per-slot admission staircase
//! - utilisation refresh through the knowledge base

use std::sync::Arc;

use sluice_cost::{
    Affinity, ArcDescriptor, CostModelConfig, CpuCostModel, CpuSample, JobId, MachineSample,
    NodeAffinity, NodeMatchExpression, NodeOperator, NodeSelectorTerm, PodAffinity,
    PodAffinityTerm, PodMatchExpression, PodOperator, ResourceDescriptor, ResourceId,
    ResourceKind, ResourceSubtree, ResourceVec, StaticKnowledgeBase, TaskDescriptor, TaskId,
    WeightedNodeSelectorTerm, WeightedPodAffinityTerm,
};

const OMEGA: i64 = 1000;

/// Machine subtree with one PU; availability may lag capacity.
fn machine(
    name: &str,
    capacity: ResourceVec,
    available: ResourceVec,
    max_pods: u64,
    labels: &[(&str, &str)],
) -> ResourceSubtree {
    let machine_id = ResourceId::random();
    let mut desc = ResourceDescriptor::new(machine_id, ResourceKind::Machine, name)
        .with_capacity(capacity)
        .with_max_pods(max_pods);
    desc.available = available;
    for (k, v) in labels {
        desc = desc.with_label(*k, *v);
    }
    let mut pu = ResourceDescriptor::new(
        ResourceId::random(),
        ResourceKind::Pu,
        format!("{name} PU #0"),
    )
    .with_capacity(ResourceVec::new(capacity.cpu_cores, 0));
    pu.available.cpu_cores = available.cpu_cores;
    ResourceSubtree::new(desc).with_child(ResourceSubtree::new(pu))
}

fn default_model() -> CpuCostModel {
    CpuCostModel::new(CostModelConfig::default(), Arc::new(StaticKnowledgeBase::new()))
}

fn plain_task(id: u64, cpu: u64, ram: u64) -> TaskDescriptor {
    TaskDescriptor::new(TaskId::new(id), JobId::new(id), "default", ResourceVec::new(cpu, ram))
}

fn slot_ecs_of(model: &CpuCostModel, machine: ResourceId) -> Vec<sluice_cost::EquivClass> {
    model.registry().machine_ecs_of(machine).unwrap().to_vec()
}

#[test]
fn least_requested_prefers_emptier_machine() {
    let mut model = default_model();
    let a = machine(
        "machine-a",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[],
    );
    let b = machine(
        "machine-b",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(4000, 4 << 30),
        4,
        &[],
    );
    let (a_id, b_id) = (a.root_id(), b.root_id());
    model.add_machine(a).unwrap();
    model.add_machine(b).unwrap();
    model.add_task(plain_task(1, 1000, 1 << 30));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    let arcs = model.ec_to_ec_arcs(ec).unwrap();
    let a_slot0 = slot_ecs_of(&model, a_id)[0];
    let b_slot0 = slot_ecs_of(&model, b_id)[0];
    assert!(arcs.contains(&a_slot0));
    assert!(arcs.contains(&b_slot0));

    let cost_a = model.ec_to_ec(ec, a_slot0).unwrap().cost;
    let cost_b = model.ec_to_ec(ec, b_slot0).unwrap().cost;
    assert!(
        cost_a < cost_b,
        "emptier machine must price lower: a={cost_a} b={cost_b}"
    );
}

#[test]
fn balanced_allocation_breaks_least_requested_tie() {
    let mut model = default_model();
    // Identical post-admission totals; a is cpu-skewed, b is balanced.
    let a = machine(
        "machine-a",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(2000, 6 << 30),
        4,
        &[],
    );
    let b = machine(
        "machine-b",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(4000, 4 << 30),
        4,
        &[],
    );
    let (a_id, b_id) = (a.root_id(), b.root_id());
    model.add_machine(a).unwrap();
    model.add_machine(b).unwrap();
    model.add_task(plain_task(1, 1000, 1 << 30));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    model.ec_to_ec_arcs(ec).unwrap();

    let cost_a = model.ec_to_ec(ec, slot_ecs_of(&model, a_id)[0]).unwrap().cost;
    let cost_b = model.ec_to_ec(ec, slot_ecs_of(&model, b_id)[0]).unwrap().cost;
    assert!(
        cost_b < cost_a,
        "balanced machine must win the tie: a={cost_a} b={cost_b}"
    );
}

#[test]
fn hard_pod_anti_affinity_excludes_machine() {
    let mut model = default_model();
    let conflicted = machine(
        "machine-conflicted",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[],
    );
    let neutral = machine(
        "machine-neutral",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[],
    );
    let (conflicted_id, neutral_id) = (conflicted.root_id(), neutral.root_id());
    model.add_machine(conflicted).unwrap();
    model.add_machine(neutral).unwrap();

    // A pod labelled app=X runs on the conflicted machine; the neutral
    // machine hosts a pod under the same key with a different value.
    let resident = plain_task(10, 100, 1 << 20).with_label("app", "X");
    model.add_task(resident);
    let conflicted_pu = model.topology().children(conflicted_id)[0];
    model.bind_task(TaskId::new(10), conflicted_pu).unwrap();

    let bystander = plain_task(11, 100, 1 << 20).with_label("app", "Y");
    model.add_task(bystander);
    let neutral_pu = model.topology().children(neutral_id)[0];
    model.bind_task(TaskId::new(11), neutral_pu).unwrap();

    let anti = Affinity {
        pod_anti_affinity: Some(PodAffinity {
            required: vec![PodAffinityTerm {
                match_expressions: vec![PodMatchExpression {
                    key: "app".to_string(),
                    op: PodOperator::In,
                    values: vec!["X".to_string()],
                }],
                namespaces: Vec::new(),
            }],
            preferred: Vec::new(),
        }),
        ..Affinity::default()
    };
    model.add_task(plain_task(1, 1000, 1 << 30).with_affinity(anti));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    let arcs = model.ec_to_ec_arcs(ec).unwrap();

    for slot in slot_ecs_of(&model, conflicted_id) {
        assert!(!arcs.contains(&slot), "conflicted machine must be excluded");
    }
    // The bystander pod carries the key with a non-listed value, so the
    // inverted match holds and the neutral machine stays eligible.
    assert!(arcs.contains(&slot_ecs_of(&model, neutral_id)[0]));
}

#[test]
fn soft_node_affinity_normalises_against_best_machine() {
    let mut model = default_model();
    let a = machine(
        "machine-a",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[("zone", "a")],
    );
    let b = machine(
        "machine-b",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[("zone", "b")],
    );
    let (a_id, b_id) = (a.root_id(), b.root_id());
    model.add_machine(a).unwrap();
    model.add_machine(b).unwrap();

    let prefer_zone = |zone: &str, weight: i64| WeightedNodeSelectorTerm {
        weight,
        preference: NodeSelectorTerm {
            match_expressions: vec![NodeMatchExpression {
                key: "zone".to_string(),
                op: NodeOperator::In,
                values: vec![zone.to_string()],
            }],
        },
    };
    let affinity = Affinity {
        node_affinity: Some(NodeAffinity {
            required: Vec::new(),
            preferred: vec![prefer_zone("a", 20), prefer_zone("b", 80)],
        }),
        ..Affinity::default()
    };
    model.add_task(plain_task(1, 1000, 1 << 30).with_affinity(affinity));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    model.ec_to_ec_arcs(ec).unwrap();

    // Both machines are empty, so the whole cost is the soft node axis:
    // a scores raw 20 of max 80 and pays omega - 250; b pays nothing.
    let cost_a = model.ec_to_ec(ec, slot_ecs_of(&model, a_id)[0]).unwrap().cost;
    let cost_b = model.ec_to_ec(ec, slot_ecs_of(&model, b_id)[0]).unwrap().cost;
    assert_eq!(cost_a, OMEGA - (20 * OMEGA / 80));
    assert_eq!(cost_b, 0);
}

#[test]
fn admission_staircase_emits_every_affordable_slot() {
    let mut model = default_model();
    let m = machine(
        "machine-a",
        ResourceVec::new(4000, 4 << 30),
        ResourceVec::new(4000, 4 << 30),
        4,
        &[],
    );
    let m_id = m.root_id();
    model.add_machine(m).unwrap();
    model.add_task(plain_task(1, 1000, 1 << 30));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    let arcs = model.ec_to_ec_arcs(ec).unwrap();
    assert_eq!(arcs, slot_ecs_of(&model, m_id), "full slot range, in order");

    let mut previous = -1;
    for slot_ec in arcs {
        let ArcDescriptor { cost, capacity, lower_bound } = model.ec_to_ec(ec, slot_ec).unwrap();
        assert_eq!(capacity, 1);
        assert_eq!(lower_bound, 0);
        assert!(cost >= previous, "slot costs must be non-decreasing");
        previous = cost;
    }
}

#[test]
fn utilisation_refresh_flows_from_knowledge_base() {
    let mut kb = StaticKnowledgeBase::new();
    let m = machine(
        "machine-a",
        ResourceVec::new(1000, 8 << 30),
        ResourceVec::new(1000, 8 << 30),
        4,
        &[],
    );
    let m_id = m.root_id();
    kb.insert(
        m_id,
        MachineSample {
            cpus_stats: vec![CpuSample {
                cpu_capacity: 1000,
                cpu_utilization: 0.5,
                cpu_allocatable: 900,
            }],
            mem_capacity: 8 << 30,
            mem_utilization: 0.5,
            mem_allocatable: 4 << 30,
        },
    );
    let mut model = CpuCostModel::new(CostModelConfig::default(), Arc::new(kb));
    model.add_machine(m).unwrap();

    model.run_stats_pass().unwrap();

    let pu = model.topology().children(m_id)[0];
    assert_eq!(model.topology().find(pu).unwrap().available.cpu_cores, 500);
    let machine_desc = model.topology().find(m_id).unwrap();
    assert_eq!(machine_desc.available.cpu_cores, 500);
    assert_eq!(machine_desc.available.ram_cap, 4 << 30);
    assert_eq!(machine_desc.num_slots_below, machine_desc.max_pods);
}

#[test]
fn add_remove_machine_round_trips_registry() {
    let mut model = default_model();
    let keeper = machine(
        "machine-keeper",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[],
    );
    let keeper_id = keeper.root_id();
    model.add_machine(keeper).unwrap();
    let keeper_slots = slot_ecs_of(&model, keeper_id);

    let transient = machine(
        "machine-transient",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        4,
        &[],
    );
    let transient_id = transient.root_id();
    model.add_machine(transient).unwrap();
    model.remove_machine(transient_id).unwrap();

    assert_eq!(model.registry().machine_count(), 1);
    assert_eq!(slot_ecs_of(&model, keeper_id), keeper_slots);
    assert!(model.registry().machine_ecs_of(transient_id).is_none());
    assert!(model.topology().find(transient_id).is_none());

    // The transient machine's slots no longer appear in preference lists.
    model.add_task(plain_task(1, 1000, 1 << 30));
    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    let arcs = model.ec_to_ec_arcs(ec).unwrap();
    assert_eq!(arcs, keeper_slots);
}

#[test]
fn normalisation_is_one_shot_within_a_round() {
    let mut model = default_model();
    let a = machine(
        "machine-a",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(6000, 6 << 30),
        2,
        &[("zone", "a")],
    );
    let a_id = a.root_id();
    model.add_machine(a).unwrap();

    let affinity = Affinity {
        node_affinity: Some(NodeAffinity {
            required: Vec::new(),
            preferred: vec![WeightedNodeSelectorTerm {
                weight: 50,
                preference: NodeSelectorTerm {
                    match_expressions: vec![NodeMatchExpression {
                        key: "zone".to_string(),
                        op: NodeOperator::In,
                        values: vec!["a".to_string()],
                    }],
                },
            }],
        }),
        ..Affinity::default()
    };
    model.add_task(plain_task(1, 1000, 1 << 30).with_affinity(affinity));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    model.ec_to_ec_arcs(ec).unwrap();

    let slot0 = slot_ecs_of(&model, a_id)[0];
    let first = model.ec_to_ec(ec, slot0).unwrap();
    for _ in 0..5 {
        assert_eq!(model.ec_to_ec(ec, slot0).unwrap(), first);
    }
}

#[test]
fn preferred_pod_affinity_discounts_colocated_machine() {
    let mut model = default_model();
    let near = machine(
        "machine-near",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        2,
        &[],
    );
    let far = machine(
        "machine-far",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        2,
        &[],
    );
    let (near_id, far_id) = (near.root_id(), far.root_id());
    model.add_machine(near).unwrap();
    model.add_machine(far).unwrap();

    model.add_task(plain_task(10, 100, 1 << 20).with_label("app", "cache"));
    let near_pu = model.topology().children(near_id)[0];
    model.bind_task(TaskId::new(10), near_pu).unwrap();

    let affinity = Affinity {
        pod_affinity: Some(PodAffinity {
            required: Vec::new(),
            preferred: vec![WeightedPodAffinityTerm {
                weight: 60,
                term: PodAffinityTerm {
                    match_expressions: vec![PodMatchExpression {
                        key: "app".to_string(),
                        op: PodOperator::In,
                        values: vec!["cache".to_string()],
                    }],
                    namespaces: Vec::new(),
                },
            }],
        }),
        ..Affinity::default()
    };
    model.add_task(plain_task(1, 1000, 1 << 30).with_affinity(affinity));

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    model.ec_to_ec_arcs(ec).unwrap();

    let cost_near = model.ec_to_ec(ec, slot_ecs_of(&model, near_id)[0]).unwrap().cost;
    let cost_far = model.ec_to_ec(ec, slot_ecs_of(&model, far_id)[0]).unwrap().cost;
    assert!(
        cost_near < cost_far,
        "co-location preference must discount: near={cost_near} far={cost_far}"
    );
}

#[test]
fn node_selector_gates_preference_list() {
    let mut model = default_model();
    let ssd = machine(
        "machine-ssd",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        2,
        &[("disk", "ssd")],
    );
    let hdd = machine(
        "machine-hdd",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        2,
        &[("disk", "hdd")],
    );
    let (ssd_id, hdd_id) = (ssd.root_id(), hdd.root_id());
    model.add_machine(ssd).unwrap();
    model.add_machine(hdd).unwrap();

    let selective = plain_task(1, 1000, 1 << 30).with_selectors(vec![sluice_cost::LabelSelector {
        key: "disk".to_string(),
        op: PodOperator::In,
        values: vec!["ssd".to_string()],
    }]);
    model.add_task(selective);

    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];
    let arcs = model.ec_to_ec_arcs(ec).unwrap();

    assert_eq!(arcs, slot_ecs_of(&model, ssd_id));
    for slot in slot_ecs_of(&model, hdd_id) {
        assert!(!arcs.contains(&slot));
    }
}

#[test]
fn binding_shapes_next_round_and_unbinding_releases() {
    let mut model = default_model();
    let m = machine(
        "machine-a",
        ResourceVec::new(8000, 8 << 30),
        ResourceVec::new(8000, 8 << 30),
        2,
        &[],
    );
    let m_id = m.root_id();
    model.add_machine(m).unwrap();
    let pu = model.topology().children(m_id)[0];

    model.add_task(plain_task(10, 100, 1 << 20).with_label("app", "X"));
    model.bind_task(TaskId::new(10), pu).unwrap();

    let anti = Affinity {
        pod_anti_affinity: Some(PodAffinity {
            required: vec![PodAffinityTerm {
                match_expressions: vec![PodMatchExpression {
                    key: "app".to_string(),
                    op: PodOperator::In,
                    values: vec!["X".to_string()],
                }],
                namespaces: Vec::new(),
            }],
            preferred: Vec::new(),
        }),
        ..Affinity::default()
    };
    model.add_task(plain_task(1, 1000, 1 << 30).with_affinity(anti));
    let ec = model.task_ecs(TaskId::new(1)).unwrap()[0];

    assert!(model.ec_to_ec_arcs(ec).unwrap().is_empty());

    // Terminating the resident pod releases the machine in the next round,
    // since only running pods count as co-located.
    model.remove_task(TaskId::new(10)).unwrap();
    model.add_task(plain_task(11, 100, 1 << 20).with_label("app", "Y"));
    model.bind_task(TaskId::new(11), pu).unwrap();

    let arcs = model.ec_to_ec_arcs(ec).unwrap();
    assert_eq!(arcs, slot_ecs_of(&model, m_id));
}
