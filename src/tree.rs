mod optimize;
mod query;

use enum_as_inner::EnumAsInner;
use rand::Rng;
use slotmap::{Key, SlotMap};

use crate::primitive::{enclosing_aabb, Aabb, NumberCommon, Vector};

/* ---------------------------------------------------------------------------------------------- */
/*                                            AABB TREE                                           */
/* ---------------------------------------------------------------------------------------------- */

/// A trait which represents the content a tree leaf wraps.
pub trait Element {
    type Vector: Vector;

    /// Resynchronize `aabb` against whatever this element wraps. Invoked for every
    /// attached leaf during [`Tree::refresh`]; return true when the extent changed.
    /// New bounds MUST go through [`Aabb::set_bounds`].
    ///
    /// Setting an inverted extent marks the element as having no valid spatial
    /// extent; the tree drops it on the next [`Tree::update_node`]. The default
    /// implementation is for static content and reports no change.
    fn update_bounds(&mut self, _aabb: &mut Aabb<Self::Vector>) -> bool {
        false
    }
}

/// A dynamically balanced tree of axis-aligned boxes, used as a broad-phase index:
/// it answers "which stored elements could possibly overlap this shape" without
/// exact geometry tests.
///
/// The tree is kept in shape by two cooperating optimizers: a local one that swaps
/// grandchildren across a branch whenever that shrinks the enclosed volume, and a
/// randomized global pass (run from [`Tree::refresh`]) that samples leaves and
/// relocates them when the move pays for itself.
pub struct Tree<T: Element> {
    nodes: SlotMap<NodeIndex, TreeNode<T>>,
    root: NodeIndex,
    count: usize,

    // Every refresh, the most-updated leaf is recorded here so the optimizer can
    // service it first.
    node_to_optimize: NodeIndex,
}

#[derive(EnumAsInner)]
pub(crate) enum TreeNode<T: Element> {
    Branch(TreeBranch<T::Vector>),
    Leaf(TreeLeaf<T>),
}

pub(crate) struct TreeBranch<V: Vector> {
    pub(crate) aabb: Aabb<V>,
    pub(crate) parent: NodeIndex,
    pub(crate) left: NodeIndex,
    pub(crate) right: NodeIndex,
}

/// A leaf of the tree: one externally supplied box/content pair.
pub struct TreeLeaf<T: Element> {
    pub(crate) aabb: Aabb<T::Vector>,
    pub(crate) parent: NodeIndex,
    pub(crate) data: T,

    pub(crate) updates_since_optimize: u32,

    // The owner gate: set while the leaf is reachable from the root. Detached
    // leaves keep their slot so the caller's key stays valid for re-attachment.
    pub(crate) attached: bool,
}

impl<T: Element> TreeNode<T> {
    pub(crate) fn aabb(&self) -> &Aabb<T::Vector> {
        match self {
            TreeNode::Branch(branch) => &branch.aabb,
            TreeNode::Leaf(leaf) => &leaf.aabb,
        }
    }

    pub(crate) fn parent(&self) -> NodeIndex {
        match self {
            TreeNode::Branch(branch) => branch.parent,
            TreeNode::Leaf(leaf) => leaf.parent,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: NodeIndex) {
        match self {
            TreeNode::Branch(branch) => branch.parent = parent,
            TreeNode::Leaf(leaf) => leaf.parent = parent,
        }
    }
}

impl<T: Element> TreeLeaf<T> {
    pub fn aabb(&self) -> &Aabb<T::Vector> {
        &self.aabb
    }

    /// Mutable access to the leaf's box, e.g. after its content moved. Follow up
    /// with [`Tree::update_node`] so ancestor bounds catch up.
    pub fn aabb_mut(&mut self) -> &mut Aabb<T::Vector> {
        &mut self.aabb
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl<T: Element> std::ops::Deref for TreeLeaf<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T: Element> std::ops::DerefMut for TreeLeaf<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/* --------------------------------------- Public Tree API -------------------------------------- */

impl<T: Element> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Tree<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_capacity_and_key(capacity),
            root: NodeIndex::null(),
            count: 0,
            node_to_optimize: NodeIndex::null(),
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Number of attached elements.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `Some(true)` for a leaf, `Some(false)` for a branch, `None` for an invalid
    /// key.
    pub fn is_leaf(&self, node: NodeIndex) -> Option<bool> {
        self.nodes.get(node).map(|n| n.is_leaf())
    }

    pub fn get(&self, node: NodeIndex) -> Option<&TreeLeaf<T>> {
        self.nodes.get(node).and_then(|n| n.as_leaf())
    }

    pub fn get_mut(&mut self, node: NodeIndex) -> Option<&mut TreeLeaf<T>> {
        self.nodes.get_mut(node).and_then(|n| n.as_leaf_mut())
    }

    /// Drops every node, attached or not. Outstanding keys dangle harmlessly
    /// afterwards; [`Tree::get`] returns `None` for them.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = NodeIndex::null();
        self.count = 0;
        self.node_to_optimize = NodeIndex::null();
    }

    /// Attaches `aabb`/`data` as a new leaf and returns its key.
    ///
    /// An inverted box is not attached: the leaf occupies a slot, does not appear
    /// in queries and does not count, but [`Tree::update_node`] attaches it later
    /// once its extent is valid.
    pub fn insert(&mut self, aabb: Aabb<T::Vector>, data: T) -> NodeIndex {
        let node = self.nodes.insert(TreeNode::Leaf(TreeLeaf {
            aabb,
            parent: NodeIndex::null(),
            data,
            updates_since_optimize: 0,
            attached: false,
        }));

        self.attach(node);
        node
    }

    /// Detaches a leaf owned by this tree; false if the key is not an attached
    /// leaf. The slot survives so the content persists and the leaf can be
    /// re-attached via [`Tree::update_node`].
    pub fn detach(&mut self, node: NodeIndex) -> bool {
        match self.nodes.get(node) {
            Some(TreeNode::Leaf(leaf)) if leaf.attached => {}
            _ => return false,
        }

        self.detach_leaf(node);
        true
    }

    /// Detaches (if needed) and frees the leaf's slot, returning its content.
    pub fn remove(&mut self, node: NodeIndex) -> Option<T> {
        match self.nodes.get(node) {
            Some(TreeNode::Leaf(leaf)) => {
                if leaf.attached {
                    self.detach_leaf(node);
                }

                // The key was just verified to refer to a leaf.
                self.nodes
                    .remove(node)
                    .and_then(|n| n.into_leaf().ok())
                    .map(|leaf| leaf.data)
            }
            _ => None,
        }
    }

    /// Call after a leaf's box changed (see [`TreeLeaf::aabb_mut`]): re-attaches a
    /// detached leaf, drops an attached leaf whose extent became inverted, and
    /// otherwise propagates the new bounds to the ancestors. No-op unless `node`
    /// is a leaf of this tree.
    pub fn update_node(&mut self, node: NodeIndex) {
        let Some(leaf) = self.nodes.get(node).and_then(|n| n.as_leaf()) else {
            return;
        };

        if !leaf.attached {
            self.attach(node);
            if !self.nodes[node].as_leaf().unwrap().attached {
                // Extent still inverted.
                return;
            }
        } else if leaf.aabb.is_inverted() {
            self.detach(node);
            return;
        }

        self.propagate_bounds(node);
    }

    /// Once-per-tick maintenance: resynchronizes every attached leaf against its
    /// content (see [`Element::update_bounds`]), refits ancestors of anything that
    /// moved, then runs [`Tree::optimize`].
    pub fn refresh(&mut self, rng: &mut impl Rng) {
        if self.root.is_null() {
            return;
        }

        self.node_to_optimize = NodeIndex::null();
        self.refresh_subtree(self.root);
        self.optimize(rng);
    }
}

/* ---------------------------------------- Internal APIs --------------------------------------- */

impl<T: Element> Tree<T> {
    pub(crate) fn children(&self, node: NodeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.nodes
            .get(node)?
            .as_branch()
            .map(|branch| (branch.left, branch.right))
    }

    /// Attaches a detached leaf, choosing its place by the standard descent: avoid
    /// creating fresh overlap between the two siblings' enclosures first, pick the
    /// smaller stand-alone volume growth second.
    fn attach(&mut self, node: NodeIndex) {
        let leaf = self.nodes[node].as_leaf().unwrap();
        debug_assert!(leaf.attached == false);

        if leaf.aabb.is_inverted() {
            // Not attached; `update_node` may pick it up later.
            return;
        }

        let aabb = leaf.aabb;
        self.nodes[node].as_leaf_mut().unwrap().attached = true;
        self.count += 1;

        if self.root.is_null() {
            self.root = node;
            return;
        }

        let zero = <T::Vector as Vector>::Num::zero();
        let mut selection = self.root;

        loop {
            let Some((left, right)) = self.children(selection) else {
                break;
            };

            let aabb_l = *self.nodes[left].aabb();
            let aabb_r = *self.nodes[right].aabb();

            let merged_l = enclosing_aabb(&aabb, &aabb_l);
            let merged_r = enclosing_aabb(&aabb, &aabb_r);

            let overlap_l = crate::collision::check::overlap_volume(&merged_l, &aabb_r);
            let overlap_r = crate::collision::check::overlap_volume(&merged_r, &aabb_l);

            selection = if overlap_l > zero || overlap_r > zero {
                // Either merge makes the siblings overlap; minimizing that overlap
                // takes precedence over volume growth.
                if overlap_l < overlap_r {
                    left
                } else {
                    right
                }
            } else {
                let diff_l = merged_l.volume() - aabb_l.volume();
                let diff_r = merged_r.volume() - aabb_r.volume();

                if diff_l < diff_r {
                    left
                } else {
                    right
                }
            };
        }

        self.bind(selection, node);
    }

    /// Splices `node` out of the tree and retires its old parent branch. The
    /// caller has verified `node` is an attached leaf.
    fn detach_leaf(&mut self, node: NodeIndex) {
        let leaf = self.nodes[node].as_leaf_mut().unwrap();
        leaf.attached = false;
        let parent = leaf.parent;
        leaf.parent = NodeIndex::null();
        self.count -= 1;

        if parent.is_null() {
            self.root = NodeIndex::null();
            return;
        }

        // The branch slot goes back to the pool; the next bind reuses it.
        let Ok(branch) = self.nodes.remove(parent).unwrap().into_branch() else {
            unreachable!()
        };

        let sibling = if branch.left == node {
            branch.right
        } else {
            branch.left
        };
        let grandparent = branch.parent;

        self.nodes[sibling].set_parent(grandparent);

        if grandparent.is_null() {
            self.root = sibling;
            return;
        }

        let gp = self.nodes[grandparent].as_branch_mut().unwrap();
        if gp.left == parent {
            gp.left = sibling;
        } else {
            gp.right = sibling;
        }

        self.propagate_bounds(grandparent);
        self.rotate_ascent(grandparent);
    }

    /// Binds `node_b` as the sibling of `node_a`: a branch enclosing both is
    /// spliced in at `node_a`'s old position, then the ancestors are refit.
    pub(crate) fn bind(&mut self, node_a: NodeIndex, node_b: NodeIndex) {
        let parent = self.nodes[node_a].parent();
        let aabb = enclosing_aabb(self.nodes[node_a].aabb(), self.nodes[node_b].aabb());

        let new_parent = self.nodes.insert(TreeNode::Branch(TreeBranch {
            aabb,
            parent,
            left: node_b,
            right: node_a,
        }));

        if parent.is_null() {
            self.root = new_parent;
        } else {
            let p = self.nodes[parent].as_branch_mut().unwrap();
            if p.left == node_a {
                p.left = new_parent;
            } else {
                p.right = new_parent;
            }
        }

        self.nodes[node_a].set_parent(new_parent);
        self.nodes[node_b].set_parent(new_parent);

        if !parent.is_null() {
            self.propagate_bounds(parent);
        }
    }

    /// Recomputes a branch's box as the enclosure of its children.
    pub(crate) fn refit_branch(&mut self, node: NodeIndex) {
        let branch = self.nodes[node].as_branch().unwrap();
        let (left, right) = (branch.left, branch.right);

        let aabb_l = *self.nodes[left].aabb();
        let aabb_r = *self.nodes[right].aabb();

        self.nodes[node]
            .as_branch_mut()
            .unwrap()
            .aabb
            .enclose(&aabb_l, &aabb_r);
    }

    /// Walks from `node` to the root refitting every branch on the way. Starts at
    /// the parent when `node` is a leaf.
    pub(crate) fn propagate_bounds(&mut self, node: NodeIndex) {
        let mut current = match &self.nodes[node] {
            TreeNode::Leaf(leaf) => leaf.parent,
            TreeNode::Branch(..) => node,
        };

        while !current.is_null() {
            self.refit_branch(current);
            current = self.nodes[current].parent();
        }
    }

    /// [`Tree::propagate_bounds`], accumulating the signed volume change of every
    /// refit. Used to score optimizer moves without committing to them.
    pub(crate) fn propagate_bounds_diff(&mut self, node: NodeIndex) -> <T::Vector as Vector>::Num {
        let mut diff = <T::Vector as Vector>::Num::zero();

        let mut current = match &self.nodes[node] {
            TreeNode::Leaf(leaf) => leaf.parent,
            TreeNode::Branch(..) => node,
        };

        while !current.is_null() {
            let before = self.nodes[current].aabb().volume();
            self.refit_branch(current);
            diff = diff + (self.nodes[current].aabb().volume() - before);

            current = self.nodes[current].parent();
        }

        diff
    }

    /// Post-order resynchronization pass. Branch bounds are only recomputed when a
    /// child actually changed, so untouched subtrees cost one comparison each.
    fn refresh_subtree(&mut self, node: NodeIndex) -> bool {
        if let Some((left, right)) = self.children(node) {
            let changed_l = self.refresh_subtree(left);
            let changed_r = self.refresh_subtree(right);

            let changed = changed_l || changed_r;
            if changed {
                self.refit_branch(node);
            }
            return changed;
        }

        let leaf = self.nodes[node].as_leaf_mut().unwrap();
        let TreeLeaf {
            aabb,
            data,
            updates_since_optimize,
            ..
        } = leaf;

        if !data.update_bounds(aabb) {
            return false;
        }

        *updates_since_optimize += 1;
        let updates = *updates_since_optimize;

        let current_best = self
            .nodes
            .get(self.node_to_optimize)
            .and_then(|n| n.as_leaf())
            .map(|l| l.updates_since_optimize);

        if current_best.map_or(true, |best| updates > best) {
            self.node_to_optimize = node;
        }

        true
    }
}

/* -------------------------------------- State Validation -------------------------------------- */

/// Structural corruption reported by [`Tree::__debug_verify_tree_state`]. Any of
/// these indicates a bug in the tree itself, not a caller error.
#[derive(Debug, thiserror::Error)]
pub enum TreeCorruption {
    #[error("root {0:?} does not resolve to a node")]
    DanglingRoot(NodeIndex),
    #[error("root {0:?} still carries a parent link")]
    RootHasParent(NodeIndex),
    #[error("child {0:?} does not link back to its parent")]
    BrokenParentLink(NodeIndex),
    #[error("branch {0:?} references a missing child")]
    DanglingChild(NodeIndex),
    #[error("branch {0:?} bound is not the enclosure of its children")]
    LooseEnclosure(NodeIndex),
    #[error("leaf {0:?} is reachable but marked detached")]
    DetachedReachable(NodeIndex),
    #[error("element count is {count} but {reachable} leaves are reachable")]
    CountMismatch { count: usize, reachable: usize },
}

impl<T: Element> Tree<T> {
    /// Exhaustively checks the structural invariants: parent backlinks, the owner
    /// flag of reachable leaves, the element count, and the enclosure equality of
    /// every branch. Enclosure equality only holds right after a propagation pass
    /// (leaf boxes mutated since are allowed to be stale), so call this after
    /// complete mutation operations.
    pub fn __debug_verify_tree_state(&self) -> Result<(), TreeCorruption> {
        if self.root.is_null() {
            return if self.count == 0 {
                Ok(())
            } else {
                Err(TreeCorruption::CountMismatch {
                    count: self.count,
                    reachable: 0,
                })
            };
        }

        if !self.nodes.contains_key(self.root) {
            return Err(TreeCorruption::DanglingRoot(self.root));
        }

        if self.nodes[self.root].parent().is_null() == false {
            return Err(TreeCorruption::RootHasParent(self.root));
        }

        let mut reachable = 0;
        self.verify_subtree(self.root, &mut reachable)?;

        if reachable != self.count {
            return Err(TreeCorruption::CountMismatch {
                count: self.count,
                reachable,
            });
        }

        Ok(())
    }

    fn verify_subtree(
        &self,
        node: NodeIndex,
        reachable: &mut usize,
    ) -> Result<(), TreeCorruption> {
        match &self.nodes[node] {
            TreeNode::Leaf(leaf) => {
                if !leaf.attached {
                    return Err(TreeCorruption::DetachedReachable(node));
                }
                *reachable += 1;
            }
            TreeNode::Branch(branch) => {
                let (left, right) = (branch.left, branch.right);

                for child in [left, right] {
                    match self.nodes.get(child) {
                        None => return Err(TreeCorruption::DanglingChild(node)),
                        Some(n) if n.parent() != node => {
                            return Err(TreeCorruption::BrokenParentLink(child))
                        }
                        Some(..) => {}
                    }
                }

                let enclosure = enclosing_aabb(self.nodes[left].aabb(), self.nodes[right].aabb());
                if !same_extent(&enclosure, &branch.aabb) {
                    return Err(TreeCorruption::LooseEnclosure(node));
                }

                self.verify_subtree(left, reachable)?;
                self.verify_subtree(right, reachable)?;
            }
        }

        Ok(())
    }
}

fn same_extent<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> bool {
    (0..V::D).all(|i| a.min()[i] == b.min()[i] && a.max()[i] == b.max()[i])
}

/* ------------------------------------------ Id Types ------------------------------------------ */

slotmap::new_key_type! {
    /// Index of a tree node. Keys are only meaningful for the tree that issued
    /// them; handing a key to another tree is a caller contract violation.
    pub struct NodeIndex;
}

/* ---------------------------------------------------------------------------------------------- */
/*                                              TESTS                                             */
/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod __test;
