use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::primitive::{Frustum, LineSegment, Plane, Ray};
use crate::Key;

struct Tag(usize);

impl Element for Tag {
    type Vector = [f64; 3];
}

/// Content that teleports to a queued target extent on the next refresh.
struct Mover {
    target: Option<([f64; 3], [f64; 3])>,
}

impl Element for Mover {
    type Vector = [f64; 3];

    fn update_bounds(&mut self, aabb: &mut Aabb<[f64; 3]>) -> bool {
        match self.target.take() {
            Some((min, max)) => {
                aabb.set_bounds(min, max);
                true
            }
            None => false,
        }
    }
}

fn boxed(min: [f64; 3], max: [f64; 3]) -> Aabb<[f64; 3]> {
    Aabb::new(min, max)
}

fn random_box(rng: &mut StdRng) -> Aabb<[f64; 3]> {
    let mut min = [0.; 3];
    let mut max = [0.; 3];
    for i in 0..3 {
        let a = rng.gen::<f64>() * 20.;
        min[i] = a;
        max[i] = a + rng.gen::<f64>() * 3. + 0.1;
    }
    Aabb::new(min, max)
}

fn overlaps(a: &Aabb<[f64; 3]>, b: &Aabb<[f64; 3]>) -> bool {
    (0..3).all(|i| a.min()[i] <= b.max()[i] && b.min()[i] <= a.max()[i])
}

fn overlaps_strictly(a: &Aabb<[f64; 3]>, b: &Aabb<[f64; 3]>) -> bool {
    (0..3).all(|i| a.min()[i].max(b.min()[i]) < a.max()[i].min(b.max()[i]))
}

fn verify<T: Element>(tree: &Tree<T>) {
    tree.__debug_verify_tree_state()
        .map_err(|x| println!("{}", x))
        .unwrap();
}

#[test]
fn three_box_scenario() {
    let mut tree = Tree::new();

    let a = tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    let b = tree.insert(boxed([2., 0., 0.], [3., 1., 1.]), Tag(1));
    let c = tree.insert(boxed([0.5, 0., 0.], [1.5, 1., 1.]), Tag(2));

    assert_eq!(tree.count(), 3);
    verify(&tree);

    let mut pairs = Vec::new();
    tree.query_pairs(|x, y| pairs.push((x, y)));

    assert_eq!(pairs.len(), 1);
    let (x, y) = pairs[0];
    assert!((x == a && y == c) || (x == c && y == a));
    assert!(x != b && y != b);
}

#[test]
fn detach_twice_reports_failure() {
    let mut tree = Tree::new();
    let node = tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));

    assert_eq!(tree.count(), 1);
    assert!(tree.detach(node));
    assert_eq!(tree.count(), 0);
    assert!(tree.root().is_null());

    assert!(!tree.detach(node));
    assert_eq!(tree.count(), 0);
}

#[test]
fn remove_returns_content() {
    let mut tree = Tree::new();
    let node = tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(7));

    assert_eq!(tree.remove(node).map(|tag| tag.0), Some(7));
    assert!(tree.get(node).is_none());
    assert!(tree.remove(node).is_none());
    assert_eq!(tree.count(), 0);
}

#[test]
fn insert_remove_round_trip() {
    let mut rng = StdRng::seed_from_u64(0xA11B);
    let mut tree = Tree::new();

    let mut nodes = Vec::new();
    for i in 0..32 {
        nodes.push(tree.insert(random_box(&mut rng), Tag(i)));
    }

    assert_eq!(tree.count(), 32);
    verify(&tree);

    while !nodes.is_empty() {
        let node = nodes.swap_remove(rng.gen_range(0..nodes.len()));
        assert!(tree.detach(node));
        verify(&tree);
    }

    assert_eq!(tree.count(), 0);
    assert!(tree.root().is_null());
}

#[test]
fn clear_resets_everything() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut tree = Tree::new();

    let keys: Vec<_> = (0..8)
        .map(|i| tree.insert(random_box(&mut rng), Tag(i)))
        .collect();

    tree.clear();

    assert_eq!(tree.count(), 0);
    assert!(tree.root().is_null());
    assert!(keys.iter().all(|&key| tree.get(key).is_none()));
    verify(&tree);
}

#[test]
fn pairwise_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut tree = Tree::new();

    let mut boxes = Vec::new();
    for i in 0..80 {
        let aabb = random_box(&mut rng);
        tree.insert(aabb, Tag(i));
        boxes.push(aabb);
    }
    verify(&tree);

    let mut reported = BTreeSet::new();
    tree.query_pairs(|x, y| {
        let i = tree.get(x).unwrap().0;
        let j = tree.get(y).unwrap().0;
        assert!(reported.insert((i.min(j), i.max(j))), "pair reported twice");
    });

    let mut expected = BTreeSet::new();
    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            if overlaps(&boxes[i], &boxes[j]) {
                expected.insert((i, j));
            }
        }
    }

    assert_eq!(reported, expected);

    // The strict diagnostic agrees, minus pairs that only touch.
    let mut strict_reported = 0usize;
    let n_tests = tree.__debug_test_collisions(|region| {
        assert!(!region.is_inverted());
        strict_reported += 1;
    });
    assert!(n_tests >= strict_reported);

    let strict_expected = (0..boxes.len())
        .flat_map(|i| ((i + 1)..boxes.len()).map(move |j| (i, j)))
        .filter(|&(i, j)| overlaps_strictly(&boxes[i], &boxes[j]))
        .count();

    assert_eq!(strict_reported, strict_expected);
}

#[test]
fn touching_boxes_diverge_between_primary_and_diagnostic() {
    let mut tree = Tree::new();
    tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    tree.insert(boxed([1., 0., 0.], [2., 1., 1.]), Tag(1));

    let mut loose_pairs = 0;
    tree.query_pairs(|_, _| loose_pairs += 1);
    assert_eq!(loose_pairs, 1);

    let mut strict_pairs = 0;
    let n_tests = tree.__debug_test_collisions(|_| strict_pairs += 1);
    assert_eq!(strict_pairs, 0);
    assert_eq!(n_tests, 1);
}

#[test]
fn traversal_family() {
    let mut tree = Tree::new();
    tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    tree.insert(boxed([4., 0., 0.], [5., 1., 1.]), Tag(1));
    tree.insert(boxed([8., 0., 0.], [9., 1., 1.]), Tag(2));

    let mut visited = Vec::new();
    tree.visit_all(|node, depth| visited.push((node, depth)));
    assert_eq!(visited.len(), 5);
    // Post-order: the root comes last, at depth 0.
    assert_eq!(visited.last().unwrap(), &(tree.root(), 0));

    let mut leaves = 0;
    tree.visit_leaves(|_, leaf| {
        leaves += 1;
        assert!(leaf.is_attached());
    });
    assert_eq!(leaves, 3);

    let mut branches = Vec::new();
    tree.visit_branches(|node| branches.push(node));
    assert_eq!(branches.len(), 2);
    // Pre-order: the root comes first.
    assert_eq!(branches[0], tree.root());
}

#[test]
fn depth_limited_traversal() {
    let mut tree = Tree::new();
    tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    tree.insert(boxed([4., 0., 0.], [5., 1., 1.]), Tag(1));
    tree.insert(boxed([8., 0., 0.], [9., 1., 1.]), Tag(2));

    let mut at_1 = Vec::new();
    tree.visit_at_depth(1, |node| at_1.push(node));
    assert_eq!(at_1, vec![tree.root()]);

    let mut at_2 = Vec::new();
    tree.visit_at_depth(2, |node| at_2.push(node));
    assert_eq!(at_2.len(), 2);

    // A single-leaf tree has no branch root and yields nothing.
    let mut single = Tree::new();
    single.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    let mut visited = 0;
    single.visit_at_depth(1, |_| visited += 1);
    assert_eq!(visited, 0);
}

#[test]
fn shape_queries() {
    let mut tree = Tree::new();
    let a = tree.insert(boxed([0., 0., 0.], [1., 1., 1.]), Tag(0));
    let b = tree.insert(boxed([5., 0., 0.], [6., 1., 1.]), Tag(1));
    let c = tree.insert(boxed([0.5, 0., 0.], [1.5, 1., 1.]), Tag(2));

    let collect = |run: &dyn Fn(&mut Vec<NodeIndex>)| {
        let mut hits = Vec::new();
        run(&mut hits);
        hits.sort_by_key(|key| key.data().as_ffi());
        hits
    };

    let segment = LineSegment::new([-1., 0.5, 0.5], [2., 0.5, 0.5]);
    let seg_hits = collect(&|hits| tree.query_segment(&segment, |node, _| hits.push(node)));
    assert_eq!(seg_hits.len(), 2);
    assert!(seg_hits.contains(&a) && seg_hits.contains(&c));

    let ray = Ray::new([-1., 0.5, 0.5], [1., 0., 0.]);
    let ray_hits = collect(&|hits| tree.query_ray(&ray, |node, _| hits.push(node)));
    assert_eq!(ray_hits.len(), 3);

    let away = Ray::new([-1., 0.5, 0.5], [-1., 0., 0.]);
    let away_hits = collect(&|hits| tree.query_ray(&away, |node, _| hits.push(node)));
    assert!(away_hits.is_empty());

    // Inward half-space x >= 2 catches only the far box.
    let frustum = Frustum::from_planes(vec![Plane::new([1., 0., 0.], -2.)]);
    let frustum_hits = collect(&|hits| tree.query_frustum(&frustum, |node, _| hits.push(node)));
    assert_eq!(frustum_hits, vec![b]);

    // Querying with a leaf's own box excludes that leaf by identity.
    let leaf_a = tree.get(a).unwrap();
    let mut aabb_hits = Vec::new();
    tree.query_aabb(leaf_a.aabb(), |node, _| aabb_hits.push(node));
    assert_eq!(aabb_hits, vec![c]);

    // An external probe of equal extent is not excluded.
    let probe = boxed([0., 0., 0.], [1., 1., 1.]);
    let mut probe_hits = Vec::new();
    tree.query_aabb(&probe, |node, _| probe_hits.push(node));
    assert_eq!(probe_hits.len(), 2);
    assert!(probe_hits.contains(&a) && probe_hits.contains(&c));
}

#[test]
fn inverted_extent_lifecycle() {
    let mut tree = Tree::new();

    // Inverted on x: not attached, invisible to queries.
    let node = tree.insert(boxed([1., 0., 0.], [0., 1., 1.]), Tag(0));
    assert_eq!(tree.count(), 0);
    assert!(tree.root().is_null());
    assert!(!tree.get(node).unwrap().is_attached());

    // Once the extent is valid, update_node brings it in.
    tree.get_mut(node)
        .unwrap()
        .aabb_mut()
        .set_bounds([0., 0., 0.], [1., 1., 1.]);
    tree.update_node(node);
    assert_eq!(tree.count(), 1);
    assert_eq!(tree.root(), node);
    verify(&tree);

    // Inverting it again drops it transparently.
    tree.get_mut(node)
        .unwrap()
        .aabb_mut()
        .set_bounds([2., 2., 2.], [1., 1., 1.]);
    tree.update_node(node);
    assert_eq!(tree.count(), 0);
    assert!(tree.root().is_null());
}

#[test]
fn update_node_propagates_movement() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut tree = Tree::new();

    let keys: Vec<_> = (0..16)
        .map(|i| tree.insert(random_box(&mut rng), Tag(i)))
        .collect();
    verify(&tree);

    for &key in &keys {
        let shift = rng.gen::<f64>() * 4.;
        let (min, max) = {
            let aabb = tree.get(key).unwrap().aabb();
            let mut min = *aabb.min();
            let mut max = *aabb.max();
            min[0] += shift;
            max[0] += shift;
            (min, max)
        };

        tree.get_mut(key).unwrap().aabb_mut().set_bounds(min, max);
        tree.update_node(key);
        verify(&tree);
    }

    assert_eq!(tree.count(), keys.len());
}

#[test]
fn refresh_resynchronizes_and_optimizes() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut tree = Tree::new();

    let keys: Vec<_> = (0..40)
        .map(|_| tree.insert(random_box(&mut rng), Mover { target: None }))
        .collect();
    verify(&tree);

    for round in 0..10 {
        // Teleport a handful of elements per round.
        for &key in keys.iter().skip(round).step_by(4) {
            let target = random_box(&mut rng);
            tree.get_mut(key).unwrap().target = Some((*target.min(), *target.max()));
        }

        tree.refresh(&mut rng);
        assert_eq!(tree.count(), keys.len());
        verify(&tree);
    }

    // A refresh with nothing moving is equally fine.
    tree.refresh(&mut rng);
    verify(&tree);
}

#[test]
fn reposition_never_grows_total_volume() {
    let mut rng = StdRng::seed_from_u64(0xBEEF);
    let mut tree = Tree::new();

    for i in 0..64 {
        tree.insert(random_box(&mut rng), Tag(i));
    }
    verify(&tree);

    let mut leaves = Vec::new();
    tree.visit_leaves(|node, _| leaves.push(node));

    let mut volume = tree.total_bounding_volume();
    for _ in 0..5 {
        for &leaf in &leaves {
            tree.reposition(leaf);

            let now = tree.total_bounding_volume();
            assert!(
                now <= volume + volume.abs() * 1e-9 + 1e-9,
                "total volume grew from {volume} to {now}"
            );
            volume = now;
        }
    }

    verify(&tree);
    assert_eq!(tree.count(), 64);
}

#[test]
fn rotate_subtree_keeps_tree_valid() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut tree = Tree::new();

    for i in 0..24 {
        tree.insert(random_box(&mut rng), Tag(i));
    }

    let before = tree.total_bounding_volume();
    let improved = tree.rotate_subtree(tree.root());
    let after = tree.total_bounding_volume();

    verify(&tree);
    assert!(!improved || after < before);
}
