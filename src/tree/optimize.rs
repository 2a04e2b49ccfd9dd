use rand::Rng;
use slotmap::Key;
use tracing::trace;

use super::{Element, NodeIndex, Tree};
use crate::primitive::{enclosing_volume, Aabb, NumberCommon, Vector};

/// Fraction of randomized trials that relocate a leaf unconditionally, keeping the
/// search from settling into a local optimum.
const DISRUPTIVE_CHANCE: f64 = 0.1;

/// Softens the volume bias of the random leaf walk so bulky subtrees are favored
/// only mildly and small subtrees still receive optimization attention.
const DESCENT_BIAS_EXPONENT: f64 = 0.2;

impl<T: Element> Tree<T> {
    /// One optimization cycle: services the leaf that accumulated the most updates
    /// since it was last optimized, then spends a count-proportional budget of
    /// randomized trials. Each trial samples a leaf by a volume-biased walk and
    /// either relocates it unconditionally (a small fraction, for diversification)
    /// or attempts a guided reposition; successful repositions grow the remaining
    /// budget, up to a cap.
    ///
    /// Called from [`Tree::refresh`]; also usable standalone. Below 5 elements the
    /// tree shape cannot matter and the pass returns immediately.
    pub fn optimize(&mut self, rng: &mut impl Rng) {
        if self.count <= 4 {
            return;
        }

        if !self.node_to_optimize.is_null() {
            let node = self.node_to_optimize;

            let valid = self
                .nodes
                .get(node)
                .and_then(|n| n.as_leaf())
                .is_some_and(|leaf| leaf.attached);

            if valid {
                self.reposition(node);
                self.nodes[node].as_leaf_mut().unwrap().updates_since_optimize = 0;
            }
            self.node_to_optimize = NodeIndex::null();
        }

        let log = (self.count as f64).log2();
        let mut n_tries = self.count as f64 * 0.005;
        let mut accepted = 0u32;

        trace!(count = self.count, budget = n_tries, "randomized reposition pass");

        let mut i = 0.;
        while i < n_tries {
            // Sample a leaf, descending into the bulkier side with (softened)
            // probability proportional to its share of the volume.
            let mut selection = self.root;
            while let Some((left, right)) = self.children(selection) {
                let vol_l = self.nodes[left].aabb().volume().to_f64();
                let vol_r = self.nodes[right].aabb().volume().to_f64();

                let p_left = (vol_l / (vol_l + vol_r)).powf(DESCENT_BIAS_EXPONENT);
                selection = if rng.gen::<f64>() < p_left { left } else { right };
            }

            if rng.gen::<f64>() < DISRUPTIVE_CHANCE {
                // Reinsert through the standard placement regardless of outcome.
                self.detach(selection);
                self.attach(selection);
            } else if self.reposition(selection) {
                // A successful move buys more search effort.
                accepted += 1;
                n_tries += log * 0.3;
                if n_tries > 10. * log {
                    n_tries = 10. * log;
                }
            }

            i += 1.;
        }

        trace!(accepted, budget = n_tries, "randomized reposition pass done");
    }

    /// Trial relocation of one attached leaf, accepted only when it does not grow
    /// the net enclosure volume.
    ///
    /// Phase 1 removes the leaf, recording the volume freed along its old ancestor
    /// chain; phase 2 reinserts it through cost-bounded placement, recording the
    /// volume added. When the sum is positive the trial is rolled back by binding
    /// the leaf back beside its original sibling; otherwise a rotation ascent runs
    /// from the new parent and the return value tells whether that improved the
    /// tree further.
    pub(crate) fn reposition(&mut self, node: NodeIndex) -> bool {
        let parent = self.nodes[node].parent();
        debug_assert!(parent.is_null() == false);

        let pb = self.nodes[parent].as_branch().unwrap();
        let sibling = if pb.left == node { pb.right } else { pb.left };

        let diff_removed = self.detach_with_diff(node);
        let diff_inserted = self.attach_with_diff(node);

        if diff_inserted + diff_removed > <T::Vector as Vector>::Num::zero() {
            // The move made things worse; restore the leaf beside its old sibling.
            self.detach(node);
            self.bind(sibling, node);

            self.nodes[node].as_leaf_mut().unwrap().attached = true;
            self.count += 1;
            return false;
        }

        let new_parent = self.nodes[node].parent();
        self.rotate_ascent(new_parent)
    }

    /// Splices out an attached leaf, returning the total volume change of the
    /// ancestors minus the retired branch's volume. Unlike [`Tree::detach`], no
    /// rotation pass runs; this is one half of a reposition trial.
    fn detach_with_diff(&mut self, node: NodeIndex) -> <T::Vector as Vector>::Num {
        let zero = <T::Vector as Vector>::Num::zero();

        let leaf = self.nodes[node].as_leaf_mut().unwrap();
        leaf.attached = false;
        let parent = leaf.parent;
        leaf.parent = NodeIndex::null();
        self.count -= 1;

        if parent.is_null() {
            self.root = NodeIndex::null();
            return zero;
        }

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
            return zero;
        }

        let gp = self.nodes[grandparent].as_branch_mut().unwrap();
        if gp.left == parent {
            gp.left = sibling;
        } else {
            gp.right = sibling;
        }

        self.propagate_bounds_diff(grandparent) - branch.aabb.volume()
    }

    /// Cost-bounded insertion: descends while continuing into a subtree is cheaper
    /// than binding directly to the current node, so the leaf may end up bound to
    /// an interior branch. Returns the total enclosure-volume cost incurred.
    fn attach_with_diff(&mut self, node: NodeIndex) -> <T::Vector as Vector>::Num {
        let zero = <T::Vector as Vector>::Num::zero();

        self.nodes[node].as_leaf_mut().unwrap().attached = true;
        self.count += 1;

        if self.root.is_null() {
            self.root = node;
            return zero;
        }

        let aabb = *self.nodes[node].aabb();

        let mut selection = self.root;
        let sel_aabb = self.nodes[selection].aabb();
        let mut cost = enclosing_volume(&aabb, sel_aabb) - sel_aabb.volume();

        loop {
            let Some((left, right)) = self.children(selection) else {
                break;
            };

            let eval_left = self.evaluate_binding(&aabb, left);
            let eval_right = self.evaluate_binding(&aabb, right);
            let eval_here = enclosing_volume(&aabb, self.nodes[selection].aabb());

            if eval_left >= eval_here && eval_right >= eval_here {
                // Stopping here beats both continuations.
                break;
            }

            selection = if eval_left < eval_right { left } else { right };

            let sel_aabb = self.nodes[selection].aabb();
            cost = cost + (enclosing_volume(&aabb, sel_aabb) - sel_aabb.volume());
        }

        cost = cost + self.nodes[selection].aabb().volume();

        self.bind(selection, node);
        cost
    }

    /// Estimated cost of binding `aabb` somewhere under `candidate`: sums the
    /// cheaper enclosure growth at each level down to a leaf, plus that leaf's
    /// volume (the new branch the binding would create).
    fn evaluate_binding(
        &self,
        aabb: &Aabb<T::Vector>,
        mut candidate: NodeIndex,
    ) -> <T::Vector as Vector>::Num {
        let mut evaluation = <T::Vector as Vector>::Num::zero();

        while let Some((left, right)) = self.children(candidate) {
            let aabb_l = self.nodes[left].aabb();
            let aabb_r = self.nodes[right].aabb();

            let diff_l = enclosing_volume(aabb, aabb_l) - aabb_l.volume();
            let diff_r = enclosing_volume(aabb, aabb_r) - aabb_r.volume();

            if diff_l < diff_r {
                evaluation = evaluation + diff_l;
                candidate = left;
            } else {
                evaluation = evaluation + diff_r;
                candidate = right;
            }
        }

        evaluation + self.nodes[candidate].aabb().volume()
    }
}

/* ---------------------------------------- Tree Rotation --------------------------------------- */

impl<T: Element> Tree<T> {
    /// Attempts a volume-reducing rotation at `node`: grandchildren are swapped
    /// across the two children when some cross-combination's enclosures are
    /// strictly smaller than the current ones. Returns whether a swap happened.
    pub(crate) fn rotate(&mut self, node: NodeIndex) -> bool {
        let Some((node_left, node_right)) = self.children(node) else {
            return false;
        };

        match (self.children(node_left), self.children(node_right)) {
            (Some((ll, lr)), Some((rl, rr))) => {
                let vol_current = self.nodes[node_left].aabb().volume()
                    + self.nodes[node_right].aabb().volume();

                let vol_ll_rl = enclosing_volume(self.nodes[ll].aabb(), self.nodes[rl].aabb());
                let vol_ll_rr = enclosing_volume(self.nodes[ll].aabb(), self.nodes[rr].aabb());
                let vol_lr_rl = enclosing_volume(self.nodes[lr].aabb(), self.nodes[rl].aabb());
                let vol_lr_rr = enclosing_volume(self.nodes[lr].aabb(), self.nodes[rr].aabb());

                if vol_ll_rl + vol_lr_rr < vol_current || vol_ll_rr + vol_lr_rl < vol_current {
                    if vol_ll_rl + vol_lr_rr < vol_ll_rr + vol_lr_rl {
                        // Swap LR with RL: children become {LL, RL} and {LR, RR}.
                        self.nodes[node_left].as_branch_mut().unwrap().right = rl;
                        self.nodes[node_right].as_branch_mut().unwrap().left = lr;

                        self.nodes[rl].set_parent(node_left);
                        self.nodes[lr].set_parent(node_right);
                    } else {
                        // Swap LR with RR: children become {LL, RR} and {RL, LR}.
                        self.nodes[node_left].as_branch_mut().unwrap().right = rr;
                        self.nodes[node_right].as_branch_mut().unwrap().right = lr;

                        self.nodes[rr].set_parent(node_left);
                        self.nodes[lr].set_parent(node_right);
                    }

                    self.propagate_bounds(node_left);
                    self.propagate_bounds(node_right);
                    return true;
                }

                false
            }

            (None, Some((rl, rr))) => {
                // Left child is a leaf; try substituting it for either of the
                // right branch's children.
                let vol_right = self.nodes[node_right].aabb().volume();

                let vol_l_rl =
                    enclosing_volume(self.nodes[node_left].aabb(), self.nodes[rl].aabb());
                let vol_l_rr =
                    enclosing_volume(self.nodes[node_left].aabb(), self.nodes[rr].aabb());

                if vol_l_rl < vol_right || vol_l_rr < vol_right {
                    if vol_l_rl < vol_l_rr {
                        // L replaces RR; the right branch becomes {RL, L}.
                        self.nodes[node].as_branch_mut().unwrap().left = rr;
                        self.nodes[node_right].as_branch_mut().unwrap().right = node_left;
                        self.nodes[rr].set_parent(node);
                    } else {
                        // L replaces RL; the right branch becomes {L, RR}.
                        self.nodes[node].as_branch_mut().unwrap().left = rl;
                        self.nodes[node_right].as_branch_mut().unwrap().left = node_left;
                        self.nodes[rl].set_parent(node);
                    }

                    self.nodes[node_left].set_parent(node_right);
                    self.propagate_bounds(node_right);
                    return true;
                }

                false
            }

            (Some((ll, lr)), None) => {
                // Right child is a leaf; mirror case.
                let vol_left = self.nodes[node_left].aabb().volume();

                let vol_r_ll =
                    enclosing_volume(self.nodes[node_right].aabb(), self.nodes[ll].aabb());
                let vol_r_lr =
                    enclosing_volume(self.nodes[node_right].aabb(), self.nodes[lr].aabb());

                if vol_r_ll < vol_left || vol_r_lr < vol_left {
                    if vol_r_ll < vol_r_lr {
                        // R replaces LR; the left branch becomes {LL, R}.
                        self.nodes[node].as_branch_mut().unwrap().right = lr;
                        self.nodes[node_left].as_branch_mut().unwrap().right = node_right;
                        self.nodes[lr].set_parent(node);
                    } else {
                        // R replaces LL; the left branch becomes {R, LR}.
                        self.nodes[node].as_branch_mut().unwrap().right = ll;
                        self.nodes[node_left].as_branch_mut().unwrap().left = node_right;
                        self.nodes[ll].set_parent(node);
                    }

                    self.nodes[node_right].set_parent(node_left);
                    self.propagate_bounds(node_left);
                    return true;
                }

                false
            }

            (None, None) => false,
        }
    }

    /// Applies [`Tree::rotate`] at `node` and climbs toward the root until a
    /// rotation succeeds or the root is reached.
    pub(crate) fn rotate_ascent(&mut self, node: NodeIndex) -> bool {
        if self.rotate(node) {
            return true;
        }

        let parent = self.nodes[node].parent();
        if parent.is_null() {
            false
        } else {
            self.rotate_ascent(parent)
        }
    }

    /// Bottom-up rotation over a whole subtree, stopping at the first improvement.
    /// Complements [`Tree::optimize`] as a manual utility; the automatic paths use
    /// the ascent form only.
    pub fn rotate_subtree(&mut self, node: NodeIndex) -> bool {
        let Some((left, right)) = self.children(node) else {
            return false;
        };

        let mut optimized = false;

        if self.children(left).is_some() {
            optimized = self.rotate_subtree(left);
        }
        if !optimized && self.children(right).is_some() {
            optimized = self.rotate_subtree(right);
        }
        if !optimized {
            optimized = self.rotate(node);
        }

        optimized
    }
}
