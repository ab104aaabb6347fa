//! Resource topology mirror
//!
//! Arena of resource descriptors keyed by `ResourceId`, holding the current
//! machine/socket/PU tree. Parents are stored ids, never owning references;
//! the containing machine of every node is cached at insertion time so
//! `machine_of` is a single lookup on the hot path.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{ResourceDescriptor, ResourceId, TaskId};
use crate::{CostError, Result};

/// Insertion form of a resource subtree
///
/// Built by the orchestrator from discovery data and handed to
/// [`ResourceTopology::add_subtree`] wholesale.
#[derive(Debug, Clone)]
pub struct ResourceSubtree {
    /// Descriptor of this node
    pub descriptor: ResourceDescriptor,
    /// Child subtrees
    pub children: Vec<ResourceSubtree>,
}

impl ResourceSubtree {
    /// Create a leaf subtree from a descriptor
    #[must_use]
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            children: Vec::new(),
        }
    }

    /// Attach a child subtree
    #[must_use]
    pub fn with_child(mut self, child: ResourceSubtree) -> Self {
        self.children.push(child);
        self
    }

    /// Id of the subtree root
    #[must_use]
    pub fn root_id(&self) -> ResourceId {
        self.descriptor.id
    }
}

#[derive(Debug, Clone)]
struct TopologyNode {
    descriptor: ResourceDescriptor,
    children: Vec<ResourceId>,
    /// Containing machine, cached at insertion; `None` above machine level
    machine: Option<ResourceId>,
}

/// Arena-backed mirror of the resource tree
///
/// Writes are serialised by the orchestrator between rounds; reads during a
/// round see a frozen tree.
#[derive(Debug, Default)]
pub struct ResourceTopology {
    nodes: HashMap<ResourceId, TopologyNode>,
}

impl ResourceTopology {
    /// Create an empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently mirrored
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the topology is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a descriptor
    #[must_use]
    pub fn find(&self, id: ResourceId) -> Option<&ResourceDescriptor> {
        self.nodes.get(&id).map(|n| &n.descriptor)
    }

    /// Look up a descriptor mutably
    pub fn find_mut(&mut self, id: ResourceId) -> Option<&mut ResourceDescriptor> {
        self.nodes.get_mut(&id).map(|n| &mut n.descriptor)
    }

    /// Direct children of a node
    #[must_use]
    pub fn children(&self, id: ResourceId) -> &[ResourceId] {
        self.nodes.get(&id).map_or(&[], |n| n.children.as_slice())
    }

    /// Containing machine of a resource
    ///
    /// Machines resolve to themselves. Resolution is a cached lookup, not a
    /// parent walk.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] for unknown resources and
    /// [`CostError::OrphanNonMachine`] when no machine lies on the node's
    /// parent chain.
    pub fn machine_of(&self, id: ResourceId) -> Result<ResourceId> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| CostError::MissingRegistryEntry(format!("resource {id}")))?;
        node.machine.ok_or(CostError::OrphanNonMachine(id))
    }

    /// Insert a whole subtree
    ///
    /// The root keeps any parent id already present in its descriptor; the
    /// machine back-pointer of every inserted node is computed here, from
    /// the root's ancestry and downward through the new children. Inserting
    /// an id that already exists replaces that node's descriptor in place.
    pub fn add_subtree(&mut self, subtree: ResourceSubtree) {
        let root_id = subtree.root_id();
        let parent = subtree.descriptor.parent;
        let inherited = parent.and_then(|p| self.nodes.get(&p).and_then(|n| n.machine));
        self.insert_node(subtree, parent, inherited);
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                if !parent_node.children.contains(&root_id) {
                    parent_node.children.push(root_id);
                }
            }
        }
        debug!(root = %root_id, nodes = self.nodes.len(), "added resource subtree");
    }

    fn insert_node(
        &mut self,
        subtree: ResourceSubtree,
        parent: Option<ResourceId>,
        inherited_machine: Option<ResourceId>,
    ) {
        let ResourceSubtree {
            mut descriptor,
            children,
        } = subtree;
        let id = descriptor.id;
        descriptor.parent = parent;
        let machine = if descriptor.kind.is_machine() {
            Some(id)
        } else {
            inherited_machine
        };
        let child_ids: Vec<ResourceId> = children.iter().map(ResourceSubtree::root_id).collect();
        self.nodes.insert(
            id,
            TopologyNode {
                descriptor,
                children: child_ids,
                machine,
            },
        );
        for child in children {
            self.insert_node(child, Some(id), machine);
        }
    }

    /// Remove a subtree rooted at `id`, returning the removed ids
    ///
    /// # Errors
    ///
    /// Returns [`CostError::MissingRegistryEntry`] when the root is unknown.
    pub fn remove_subtree(&mut self, id: ResourceId) -> Result<Vec<ResourceId>> {
        let parent = match self.nodes.get(&id) {
            Some(node) => node.descriptor.parent,
            None => return Err(CostError::MissingRegistryEntry(format!("resource {id}"))),
        };
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children);
                removed.push(next);
            }
        }
        // Detach from the parent's child list, if the parent survives.
        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_node.children.retain(|c| *c != id);
        }
        debug!(root = %id, removed = removed.len(), "removed resource subtree");
        Ok(removed)
    }

    /// Iterate over all descriptors
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.nodes.values().map(|n| &n.descriptor)
    }

    /// Ids of all nodes below `id` (excluding `id`), depth first
    #[must_use]
    pub fn descendants(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack: Vec<ResourceId> = self.children(id).to_vec();
        while let Some(next) = stack.pop() {
            stack.extend_from_slice(self.children(next));
            out.push(next);
        }
        out
    }

    /// Tasks currently running anywhere in the machine's subtree
    #[must_use]
    pub fn running_tasks_below(&self, id: ResourceId) -> Vec<TaskId> {
        let mut out: Vec<TaskId> = self
            .find(id)
            .map(|d| d.current_running_tasks.iter().copied().collect())
            .unwrap_or_default();
        for child in self.descendants(id) {
            if let Some(desc) = self.find(child) {
                out.extend(desc.current_running_tasks.iter().copied());
            }
        }
        out
    }
}
