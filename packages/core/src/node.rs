//! The procedure dispatch tree.
//!
//! Nodes are addressed by [`NodeId`] through a [`NodeArena`]. A parent owns
//! its children; a node's parent is stored as a plain id looked up through
//! the arena, never as an owning pointer, so the tree cannot form reference
//! cycles. The arena only keeps weak entries: a node lives as long as a
//! [`Node`] handle or its parent holds it. [`Node`] is a cheap handle
//! (arena + id) that exposes the registry operations.
//!
//! Invariants:
//! - No identifier repeats along any root-to-node path. An insertion that
//!   would break this fails with `CoreError::PathUniqueness` and changes
//!   nothing.
//! - Children and procedures are keyed by identity. The first registration
//!   of an identifier wins; later ones are ignored.
//! - Each entry is tagged active or inactive, and lookups only see entries
//!   whose tag matches the requested flag.
//!
//! Lookups go straight to the concurrent maps. Topology changes (attach and
//! detach) are serialized per arena so the ancestor walk sees a stable chain.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::CoreError;
use crate::identity::{Identified, Identity};
use crate::procedure::ProcedureRef;

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

struct NodeSlot {
    identity: Identity,
    parent: RwLock<Option<NodeId>>,
    nodes: DashMap<Identity, (Arc<NodeSlot>, NodeId, bool)>,
    procedures: DashMap<Identity, (ProcedureRef, bool)>,
}

// ---------------------------------------------------------------------------
// NodeArena
// ---------------------------------------------------------------------------

/// Index of every live node in a dispatch tree.
///
/// Entries are weak. A detached node that no handle refers to any more is
/// freed, and its entry is pruned on a later `create_node`.
pub struct NodeArena {
    slots: DashMap<NodeId, Weak<NodeSlot>>,
    next_id: AtomicU64,
    prune_at: AtomicUsize,
    topology: Mutex<()>,
}

const MIN_PRUNE_AT: usize = 64;

impl NodeArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            next_id: AtomicU64::new(1),
            prune_at: AtomicUsize::new(MIN_PRUNE_AT),
            topology: Mutex::new(()),
        })
    }

    /// Creates a standalone node with no parent.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn create_node(self: &Arc<Self>, identifier: impl AsRef<str>) -> Result<Node, CoreError> {
        let identity = Identity::new(identifier)?;
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(NodeSlot {
            identity,
            parent: RwLock::new(None),
            nodes: DashMap::new(),
            procedures: DashMap::new(),
        });
        self.slots.insert(id, Arc::downgrade(&slot));
        self.prune_if_due();
        Ok(Node {
            arena: Arc::clone(self),
            id,
            slot,
        })
    }

    /// Returns a handle to the node with the given id.
    #[must_use]
    pub fn get(self: &Arc<Self>, id: NodeId) -> Option<Node> {
        let slot = self.slot(id)?;
        Some(Node {
            arena: Arc::clone(self),
            id,
            slot,
        })
    }

    /// Number of live nodes in this arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Returns `true` if no node is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: NodeId) -> Option<Arc<NodeSlot>> {
        let slot = self.slots.get(&id).and_then(|entry| entry.value().upgrade());
        if slot.is_none() {
            self.slots.remove_if(&id, |_, weak| weak.strong_count() == 0);
        }
        slot
    }

    /// Drops entries of freed nodes once the index has doubled since the
    /// last sweep.
    fn prune_if_due(&self) {
        if self.slots.len() < self.prune_at.load(Ordering::Relaxed) {
            return;
        }
        self.slots.retain(|_, weak| weak.strong_count() > 0);
        let next = (self.slots.len() * 2).max(MIN_PRUNE_AT);
        self.prune_at.store(next, Ordering::Relaxed);
    }

    /// Identities of `start` and all of its ancestors.
    fn path_identities(&self, start: &NodeSlot) -> HashSet<Identity> {
        let mut seen = HashSet::new();
        seen.insert(start.identity.clone());
        let mut parent = *start.parent.read();
        while let Some(id) = parent {
            let Some(slot) = self.slot(id) else { break };
            seen.insert(slot.identity.clone());
            parent = *slot.parent.read();
        }
        seen
    }

    /// First identity in the subtree rooted at `root` that is in `forbidden`.
    fn find_conflict(root: &Arc<NodeSlot>, forbidden: &HashSet<Identity>) -> Option<Identity> {
        let mut stack = vec![Arc::clone(root)];
        while let Some(slot) = stack.pop() {
            if forbidden.contains(&slot.identity) {
                return Some(slot.identity.clone());
            }
            stack.extend(slot.nodes.iter().map(|entry| Arc::clone(&entry.value().0)));
        }
        None
    }
}

impl fmt::Debug for NodeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeArena")
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Handle to a node in a [`NodeArena`].
///
/// Equality and hashing delegate to the identity.
#[derive(Clone)]
pub struct Node {
    arena: Arc<NodeArena>,
    id: NodeId,
    slot: Arc<NodeSlot>,
}

impl Node {
    /// Creates a root node in a fresh arena.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn root(identifier: impl AsRef<str>) -> Result<Self, CoreError> {
        NodeArena::new().create_node(identifier)
    }

    /// Arena index of this node.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The arena this node lives in.
    #[must_use]
    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// The current parent, if attached.
    #[must_use]
    pub fn parent(&self) -> Option<Node> {
        let parent = (*self.slot.parent.read())?;
        self.arena.get(parent)
    }

    // -- child nodes --------------------------------------------------------

    /// Attaches `node` as a child of this node.
    ///
    /// If a child with the same identifier is already present the call is a
    /// no-op: the existing entry is kept.
    ///
    /// # Errors
    ///
    /// - `CoreError::PathUniqueness` if any identifier in `node`'s subtree
    ///   equals this node's identifier or one of its ancestors'.
    /// - `CoreError::AlreadyAttached` if `node` already has a parent.
    /// - `CoreError::ForeignNode` if `node` lives in another arena.
    pub fn add_node(&self, node: &Node, active: bool) -> Result<(), CoreError> {
        if !Arc::ptr_eq(&self.arena, &node.arena) {
            return Err(CoreError::ForeignNode {
                identifier: node.identifier().to_string(),
            });
        }

        let _topology = self.arena.topology.lock();

        let path = self.arena.path_identities(&self.slot);
        if let Some(conflict) = NodeArena::find_conflict(&node.slot, &path) {
            return Err(CoreError::PathUniqueness {
                identifier: conflict.as_str().to_string(),
            });
        }

        if self.slot.nodes.contains_key(&node.slot.identity) {
            return Ok(());
        }

        let mut parent = node.slot.parent.write();
        if parent.is_some() {
            return Err(CoreError::AlreadyAttached {
                identifier: node.identifier().to_string(),
            });
        }
        *parent = Some(self.id);
        self.slot.nodes.insert(
            node.slot.identity.clone(),
            (Arc::clone(&node.slot), node.id, active),
        );
        debug!(parent = %self.identifier(), child = %node.identifier(), active, "node attached");
        Ok(())
    }

    /// Attaches `node` as an active child. See [`Node::add_node`].
    ///
    /// # Errors
    ///
    /// Same as [`Node::add_node`].
    pub fn add_active_node(&self, node: &Node) -> Result<(), CoreError> {
        self.add_node(node, true)
    }

    /// Detaches the child whose identifier equals `node`'s, if any.
    pub fn remove_node(&self, node: &Node) {
        self.detach(&node.slot.identity);
    }

    /// Detaches the child with the given identifier, if any.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn remove_node_by_identifier(&self, identifier: &str) -> Result<(), CoreError> {
        let key = Identity::new(identifier)?;
        self.detach(&key);
        Ok(())
    }

    fn detach(&self, key: &Identity) {
        let _topology = self.arena.topology.lock();
        if let Some((_, (child, _, _))) = self.slot.nodes.remove(key) {
            let mut parent = child.parent.write();
            if *parent == Some(self.id) {
                *parent = None;
            }
            drop(parent);
            debug!(parent = %self.identifier(), child = %key, "node detached");
        }
    }

    /// Returns the child with the given identifier whose tag equals `active`.
    #[must_use]
    pub fn get_node(&self, identifier: &str, active: bool) -> Option<Node> {
        self.slot
            .nodes
            .get(identifier)
            .filter(|entry| entry.value().2 == active)
            .map(|entry| {
                let (slot, id, _) = entry.value();
                Node {
                    arena: Arc::clone(&self.arena),
                    id: *id,
                    slot: Arc::clone(slot),
                }
            })
    }

    /// Number of children, active or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.slot.nodes.len()
    }

    // -- procedures ---------------------------------------------------------

    /// Registers `procedure` on this node.
    ///
    /// If a procedure with the same identifier is already present the call
    /// is a no-op: the existing entry is kept.
    pub fn add_procedure(&self, procedure: ProcedureRef, active: bool) {
        self.slot
            .procedures
            .entry(procedure.identity().clone())
            .or_insert((procedure, active));
    }

    /// Registers `procedure` as active. See [`Node::add_procedure`].
    pub fn add_active_procedure(&self, procedure: ProcedureRef) {
        self.add_procedure(procedure, true);
    }

    /// Removes the procedure whose identifier equals `procedure`'s, if any.
    pub fn remove_procedure(&self, procedure: &ProcedureRef) {
        self.slot.procedures.remove(procedure.identity());
    }

    /// Removes the procedure with the given identifier, if any.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn remove_procedure_by_identifier(&self, identifier: &str) -> Result<(), CoreError> {
        let key = Identity::new(identifier)?;
        self.slot.procedures.remove(&key);
        Ok(())
    }

    /// Returns the procedure with the given identifier whose tag equals `active`.
    #[must_use]
    pub fn get_procedure(&self, identifier: &str, active: bool) -> Option<ProcedureRef> {
        self.slot
            .procedures
            .get(identifier)
            .filter(|entry| entry.value().1 == active)
            .map(|entry| entry.value().0.clone())
    }

    /// Number of procedures, active or not.
    #[must_use]
    pub fn procedure_count(&self) -> usize {
        self.slot.procedures.len()
    }
}

impl Identified for Node {
    fn identity(&self) -> &Identity {
        &self.slot.identity
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.slot.identity == other.slot.identity
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.identity.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("identity", &self.slot.identity)
            .field("parent", &*self.slot.parent.read())
            .finish_non_exhaustive()
    }
}
