use slotmap::Key;

use super::{Element, NodeIndex, Tree, TreeLeaf};
use crate::collision::check;
use crate::primitive::{Aabb, Frustum, LineSegment, NumberCommon, Ray, Vector};

/* ------------------------------------------ Traversal ----------------------------------------- */

impl<T: Element> Tree<T> {
    /// Post-order visit of every node with its depth (root = 0).
    pub fn visit_all(&self, mut visit: impl FnMut(NodeIndex, usize)) {
        if self.root.is_null() {
            return;
        }
        self.visit_all_impl(self.root, 0, &mut visit);
    }

    fn visit_all_impl(
        &self,
        node: NodeIndex,
        depth: usize,
        visit: &mut impl FnMut(NodeIndex, usize),
    ) {
        if let Some((left, right)) = self.children(node) {
            self.visit_all_impl(left, depth + 1, visit);
            self.visit_all_impl(right, depth + 1, visit);
        }
        visit(node, depth);
    }

    /// Post-order visit of the leaves only.
    pub fn visit_leaves(&self, mut visit: impl FnMut(NodeIndex, &TreeLeaf<T>)) {
        if self.root.is_null() {
            return;
        }
        self.visit_leaves_impl(self.root, &mut visit);
    }

    fn visit_leaves_impl(&self, node: NodeIndex, visit: &mut impl FnMut(NodeIndex, &TreeLeaf<T>)) {
        match self.children(node) {
            Some((left, right)) => {
                self.visit_leaves_impl(left, visit);
                self.visit_leaves_impl(right, visit);
            }
            None => visit(node, self.nodes[node].as_leaf().unwrap()),
        }
    }

    /// Pre-order visit of the branches only.
    pub fn visit_branches(&self, mut visit: impl FnMut(NodeIndex)) {
        if self.root.is_null() {
            return;
        }
        self.visit_branches_impl(self.root, &mut visit);
    }

    fn visit_branches_impl(&self, node: NodeIndex, visit: &mut impl FnMut(NodeIndex)) {
        let Some((left, right)) = self.children(node) else {
            return;
        };

        visit(node);
        self.visit_branches_impl(left, visit);
        self.visit_branches_impl(right, visit);
    }

    /// Visits the nodes sitting exactly at `depth`, where `depth == 1` is the root
    /// itself. Leaves shallower than `depth` end their path unvisited; a tree whose
    /// root is a leaf yields nothing.
    pub fn visit_at_depth(&self, depth: usize, mut visit: impl FnMut(NodeIndex)) {
        if self.children(self.root).is_none() {
            return;
        }
        self.visit_at_depth_impl(self.root, 0, depth, &mut visit);
    }

    fn visit_at_depth_impl(
        &self,
        node: NodeIndex,
        current: usize,
        depth: usize,
        visit: &mut impl FnMut(NodeIndex),
    ) {
        let current = current + 1;
        if current == depth {
            visit(node);
            return;
        }

        if let Some((left, right)) = self.children(node) {
            self.visit_at_depth_impl(left, current, depth, visit);
            self.visit_at_depth_impl(right, current, depth, visit);
        }
    }

    /// Sum of the volumes of every node, the metric the optimizers drive down.
    pub fn total_bounding_volume(&self) -> <T::Vector as Vector>::Num {
        self.total_volume_impl(self.root)
    }

    fn total_volume_impl(&self, node: NodeIndex) -> <T::Vector as Vector>::Num {
        let Some(n) = self.nodes.get(node) else {
            return <T::Vector as Vector>::Num::zero();
        };

        let mut volume = n.aabb().volume();
        if let Some((left, right)) = self.children(node) {
            volume = volume + self.total_volume_impl(left) + self.total_volume_impl(right);
        }
        volume
    }
}

/* --------------------------------------- Collision Pairs -------------------------------------- */

impl<T: Element> Tree<T> {
    /// Invokes `on_collision` once for every pair of leaves whose boxes overlap,
    /// exactly-touching boxes included. Dual descent, pruning any two subtrees
    /// whose bounds are separated on some axis.
    pub fn query_pairs(&self, mut on_collision: impl FnMut(NodeIndex, NodeIndex)) {
        if self.children(self.root).is_some() {
            self.pairs_in_branch(self.root, &mut on_collision);
        }
    }

    fn pairs_in_branch(&self, branch: NodeIndex, on_collision: &mut impl FnMut(NodeIndex, NodeIndex)) {
        let Some((left, right)) = self.children(branch) else {
            return;
        };

        self.pairs_between(left, right, on_collision);
        self.pairs_in_branch(left, on_collision);
        self.pairs_in_branch(right, on_collision);
    }

    fn pairs_between(
        &self,
        a: NodeIndex,
        b: NodeIndex,
        on_collision: &mut impl FnMut(NodeIndex, NodeIndex),
    ) {
        if !check::aabb_aabb(self.nodes[a].aabb(), self.nodes[b].aabb()) {
            return;
        }

        match (self.children(a), self.children(b)) {
            (None, None) => on_collision(a, b),
            (None, Some((bl, br))) => {
                self.pairs_between(a, bl, on_collision);
                self.pairs_between(a, br, on_collision);
            }
            (Some((al, ar)), None) => {
                self.pairs_between(al, b, on_collision);
                self.pairs_between(ar, b, on_collision);
            }
            (Some((al, ar)), Some((bl, br))) => {
                self.pairs_between(al, bl, on_collision);
                self.pairs_between(al, br, on_collision);
                self.pairs_between(ar, bl, on_collision);
                self.pairs_between(ar, br, on_collision);
            }
        }
    }

    /// Independent strict reimplementation of [`Tree::query_pairs`] for
    /// cross-validation: hands the callback the explicit overlap region, which must
    /// have strictly positive extent on every axis (touching pairs are NOT
    /// reported, unlike the primary enumeration). Returns the number of pair
    /// comparisons performed.
    pub fn __debug_test_collisions(
        &self,
        mut on_collision: impl FnMut(&Aabb<T::Vector>),
    ) -> usize {
        if self.root.is_null() {
            return 0;
        }
        self.debug_pairs_in_branch(self.root, &mut on_collision)
    }

    fn debug_pairs_in_branch(
        &self,
        node: NodeIndex,
        on_collision: &mut impl FnMut(&Aabb<T::Vector>),
    ) -> usize {
        let Some((left, right)) = self.children(node) else {
            return 0;
        };

        self.debug_pairs_between(left, right, on_collision)
            + self.debug_pairs_in_branch(left, on_collision)
            + self.debug_pairs_in_branch(right, on_collision)
    }

    fn debug_pairs_between(
        &self,
        a: NodeIndex,
        b: NodeIndex,
        on_collision: &mut impl FnMut(&Aabb<T::Vector>),
    ) -> usize {
        let mut n_tests = 0;

        if let Some(region) =
            check::strict_intersection(self.nodes[a].aabb(), self.nodes[b].aabb())
        {
            match (self.children(a), self.children(b)) {
                (None, None) => on_collision(&region),
                (None, Some((bl, br))) => {
                    n_tests += self.debug_pairs_between(a, bl, on_collision);
                    n_tests += self.debug_pairs_between(a, br, on_collision);
                }
                (Some((al, ar)), None) => {
                    n_tests += self.debug_pairs_between(al, b, on_collision);
                    n_tests += self.debug_pairs_between(ar, b, on_collision);
                }
                (Some((al, ar)), Some((bl, br))) => {
                    n_tests += self.debug_pairs_between(al, bl, on_collision);
                    n_tests += self.debug_pairs_between(al, br, on_collision);
                    n_tests += self.debug_pairs_between(ar, bl, on_collision);
                    n_tests += self.debug_pairs_between(ar, br, on_collision);
                }
            }
        }

        n_tests + 1
    }
}

/* ---------------------------------------- Shape Queries --------------------------------------- */

impl<T: Element> Tree<T> {
    /// Visits every leaf whose box the segment intersects.
    pub fn query_segment(
        &self,
        segment: &LineSegment<T::Vector>,
        mut visit: impl FnMut(NodeIndex, &TreeLeaf<T>),
    ) {
        if self.root.is_null() {
            return;
        }
        self.query_filtered(self.root, &|aabb| check::aabb_segment(aabb, segment), &mut visit);
    }

    /// Visits every leaf whose box the ray intersects.
    pub fn query_ray(
        &self,
        ray: &Ray<T::Vector>,
        mut visit: impl FnMut(NodeIndex, &TreeLeaf<T>),
    ) {
        if self.root.is_null() {
            return;
        }
        self.query_filtered(self.root, &|aabb| check::aabb_ray(aabb, ray), &mut visit);
    }

    /// Visits every leaf whose box intersects the frustum (conservatively; see
    /// [`check::aabb_frustum`]).
    pub fn query_frustum(
        &self,
        frustum: &Frustum<T::Vector>,
        mut visit: impl FnMut(NodeIndex, &TreeLeaf<T>),
    ) {
        if self.root.is_null() {
            return;
        }
        self.query_filtered(self.root, &|aabb| check::aabb_frustum(aabb, frustum), &mut visit);
    }

    /// Visits every leaf whose box overlaps `aabb`, except the leaf holding `aabb`
    /// itself when the reference points into this tree (identity, not value).
    pub fn query_aabb(
        &self,
        aabb: &Aabb<T::Vector>,
        mut visit: impl FnMut(NodeIndex, &TreeLeaf<T>),
    ) {
        if self.root.is_null() {
            return;
        }

        self.query_filtered(
            self.root,
            &|node_aabb| check::aabb_aabb(node_aabb, aabb),
            &mut |node, leaf: &TreeLeaf<T>| {
                if !std::ptr::eq(&leaf.aabb, aabb) {
                    visit(node, leaf);
                }
            },
        );
    }

    /// Single top-down descent: subtrees whose bounds fail `test` are pruned
    /// wholesale, passing leaves are reported.
    fn query_filtered(
        &self,
        node: NodeIndex,
        test: &impl Fn(&Aabb<T::Vector>) -> bool,
        visit: &mut impl FnMut(NodeIndex, &TreeLeaf<T>),
    ) {
        if !test(self.nodes[node].aabb()) {
            return;
        }

        match self.children(node) {
            None => visit(node, self.nodes[node].as_leaf().unwrap()),
            Some((left, right)) => {
                self.query_filtered(left, test, visit);
                self.query_filtered(right, test, visit);
            }
        }
    }
}
