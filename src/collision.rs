pub mod check {
    use crate::primitive::{
        Aabb, Frustum, LineSegment, NumExt, NumberCommon, Ray, Vector,
    };

    /// Box/box overlap via the sign of the two edge differences per axis: when both
    /// differences share a sign the boxes sit on disjoint sides of that axis. A zero
    /// product (exactly touching faces) counts as overlap.
    pub fn aabb_aabb<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> bool {
        for i in 0..V::D {
            if (a.min()[i] - b.max()[i]) * (a.max()[i] - b.min()[i]) > V::Num::zero() {
                return false;
            }
        }
        true
    }

    /// Volume of the overlap region of `a` and `b`, zero unless the overlap has
    /// strictly positive extent on every axis.
    pub fn overlap_volume<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> V::Num {
        let mut volume = V::Num::one();
        for i in 0..V::D {
            let d = a.max()[i].min_value(b.max()[i]) - a.min()[i].max_value(b.min()[i]);
            if d <= V::Num::zero() {
                return V::Num::zero();
            }
            volume = volume * d;
        }
        volume
    }

    /// The explicit overlap region of `a` and `b` (per-axis max-of-mins and
    /// min-of-maxes), or `None` unless it has strictly positive extent on every
    /// axis. Touching boxes do NOT intersect under this predicate, unlike
    /// [`aabb_aabb`].
    pub fn strict_intersection<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> Option<Aabb<V>> {
        let mut min = *a.min();
        let mut max = *a.max();
        for i in 0..V::D {
            min[i] = min[i].max_value(b.min()[i]);
            max[i] = max[i].min_value(b.max()[i]);
            if max[i] <= min[i] {
                return None;
            }
        }
        Some(Aabb::new(min, max))
    }

    pub fn aabb_segment<V: Vector>(rect: &Aabb<V>, segment: &LineSegment<V>) -> bool {
        let mut dir = segment.p_end;
        for i in 0..V::D {
            dir[i] = dir[i] - segment.p_start[i];
        }
        slab(rect, &segment.p_start, &dir, V::Num::one())
    }

    pub fn aabb_ray<V: Vector>(rect: &Aabb<V>, ray: &Ray<V>) -> bool {
        slab(rect, &ray.origin, &ray.dir, V::Num::MAXVALUE)
    }

    /// Slab test over `t` in `[0, t_max]`. An axis with zero direction degenerates
    /// to an in-slab check of the origin. Boundary contact counts as a hit.
    fn slab<V: Vector>(rect: &Aabb<V>, origin: &V, dir: &V, mut t_max: V::Num) -> bool {
        let mut t_min = V::Num::zero();

        for i in 0..V::D {
            let o = origin[i];
            let d = dir[i];

            if d == V::Num::zero() {
                if o < rect.min()[i] || rect.max()[i] < o {
                    return false;
                }
                continue;
            }

            let mut t_1 = (rect.min()[i] - o) / d;
            let mut t_2 = (rect.max()[i] - o) / d;
            if t_2 < t_1 {
                std::mem::swap(&mut t_1, &mut t_2);
            }

            t_min = t_min.max_value(t_1);
            t_max = t_max.min_value(t_2);
            if t_max < t_min {
                return false;
            }
        }

        true
    }

    /// Conservative box/frustum test: for each plane, only the box corner most
    /// positive along the plane normal is checked. Never reports a false miss; a
    /// box outside every plane's half-space but straddling an edge may be reported
    /// as intersecting, which is acceptable for culling.
    pub fn aabb_frustum<V: Vector>(rect: &Aabb<V>, frustum: &Frustum<V>) -> bool {
        for plane in frustum.planes() {
            let mut corner = *rect.min();
            for i in 0..V::D {
                if plane.normal[i] >= V::Num::zero() {
                    corner[i] = rect.max()[i];
                }
            }

            if plane.signed_distance(&corner) < V::Num::zero() {
                return false;
            }
        }
        true
    }
}

/* ---------------------------------------------------------------------------------------------- */
/*                                              TESTS                                             */
/* ---------------------------------------------------------------------------------------------- */
