/* ---------------------------------------------------------------------------------------------- */
/*                                             TRAITS                                             */
/* ---------------------------------------------------------------------------------------------- */

use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};

macro_rules! trait_alias {
	($vis:vis trait $name:ident {}, $($args:tt)*) => {
		$vis trait $name: $($args)+ {}
		impl<T> $name for T where T: $($args)+ {}
	};
}
trait_alias!(
    pub trait Number {},
    Copy
        + PartialEq
        + PartialOrd
        + std::fmt::Debug
        + Add<Output = Self>
        + Mul<Output = Self>
        + Sub<Output = Self>
        + Div<Output = Self>
        + NumberCommon
);

pub trait NumberCommon {
    const MINVALUE: Self;
    const MAXVALUE: Self;

    fn to_f64(&self) -> f64;

    fn one() -> Self;
    fn zero() -> Self;
}

pub trait Vector:
    Clone + Copy + Sized + Index<usize, Output = Self::Num> + IndexMut<usize, Output = Self::Num>
{
    type Num: Number;
    const D: AxisIndex;
}

pub type AxisIndex = usize;

/* -------------------------------------------- Exts -------------------------------------------- */

pub trait NumExt: Number {
    fn min_value(self, other: Self) -> Self {
        if self < other {
            self
        } else {
            other
        }
    }

    fn max_value(self, other: Self) -> Self {
        if self > other {
            self
        } else {
            other
        }
    }
}

impl<T: Number> NumExt for T {}

pub trait VectorExt: Vector {
    fn dot(&self, other: &Self) -> Self::Num {
        let mut sum = Self::Num::zero();
        for i in 0..Self::D {
            sum = sum + self[i] * other[i];
        }
        sum
    }
}

impl<T: Vector> VectorExt for T {}

/* ------------------------------------------ Defaults ------------------------------------------ */

impl<T: Number, const D: usize> Vector for [T; D] {
    type Num = T;
    const D: AxisIndex = D;
}

#[doc(hidden)]
mod _impl_number {
    use super::NumberCommon;

    macro_rules! define_minmax {
    ($($ty:ty), *) => {
        $(impl NumberCommon for $ty {
            const MINVALUE: Self = Self::MIN;
            const MAXVALUE: Self = Self::MAX;

            fn to_f64(&self) -> f64 {
                *self as f64
            }

            fn one() -> Self {
                1 as _
            }

            fn zero() -> Self {
                0 as _
            }
        })*
    };
}

    define_minmax!(i8, i16, i32, i64, i128, isize, f32, f64);
}

#[cfg(feature = "glam")]
#[doc(hidden)]
mod _impl_glam {
    use super::{AxisIndex, Vector};

    impl Vector for glam::Vec3 {
        type Num = f32;
        const D: AxisIndex = 3;
    }

    impl Vector for glam::Vec3A {
        type Num = f32;
        const D: AxisIndex = 3;
    }
}

/* ---------------------------------------------------------------------------------------------- */
/*                                        BOUNDING VOLUMES                                        */
/* ---------------------------------------------------------------------------------------------- */

/// An axis-aligned box with a cached volume.
///
/// The cache exists because the tree's placement and optimization heuristics read
/// volumes far more often than extents change; recomputing per read would put a
/// `D`-term product behind every comparison. All extent mutation goes through
/// [`Aabb::set_bounds`] or [`Aabb::enclose`], which re-derive the cache.
///
/// An *inverted* extent (`min > max` on some axis) is a representable state meaning
/// "currently has no valid spatial extent"; see [`Aabb::is_inverted`]. The volume of
/// an inverted box is meaningless.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "V: serde::Serialize, V::Num: serde::Serialize",
        deserialize = "V: serde::Deserialize<'de>, V::Num: serde::Deserialize<'de>"
    ))
)]
pub struct Aabb<V: Vector> {
    min: V,
    max: V,
    volume: V::Num,
}

impl<V: Vector> Aabb<V> {
    /// Creates a box from its two corners, as given. Corners are not reordered;
    /// passing `min > max` on some axis creates an inverted box.
    pub fn new(min: V, max: V) -> Self {
        Self {
            min,
            max,
            volume: Self::volume_of(&min, &max),
        }
    }

    pub fn min(&self) -> &V {
        &self.min
    }

    pub fn max(&self) -> &V {
        &self.max
    }

    pub fn volume(&self) -> V::Num {
        self.volume
    }

    /// Replaces the extent and refreshes the volume cache.
    pub fn set_bounds(&mut self, min: V, max: V) {
        self.min = min;
        self.max = max;
        self.volume = Self::volume_of(&min, &max);
    }

    /// True when some axis has `min > max`; such boxes are never attached to the
    /// tree.
    pub fn is_inverted(&self) -> bool {
        (0..V::D).any(|i| self.min[i] > self.max[i])
    }

    /// Sets self to the tight enclosure of `a` and `b`.
    pub fn enclose(&mut self, a: &Self, b: &Self) {
        for i in 0..V::D {
            self.min[i] = a.min[i].min_value(b.min[i]);
            self.max[i] = a.max[i].max_value(b.max[i]);
        }
        self.volume = Self::volume_of(&self.min, &self.max);
    }

    fn volume_of(min: &V, max: &V) -> V::Num {
        let mut volume = V::Num::one();
        for i in 0..V::D {
            volume = volume * (max[i] - min[i]);
        }
        volume
    }
}

/// Volume of the tight enclosure of `a` and `b`, without building it.
pub fn enclosing_volume<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> V::Num {
    let mut volume = V::Num::one();
    for i in 0..V::D {
        volume = volume * (a.max[i].max_value(b.max[i]) - a.min[i].min_value(b.min[i]));
    }
    volume
}

/// The tight enclosure of `a` and `b` as a new box.
pub fn enclosing_aabb<V: Vector>(a: &Aabb<V>, b: &Aabb<V>) -> Aabb<V> {
    use tap::Tap;
    { *a }.tap_mut(|x| x.enclose(a, b))
}

/* ------------------------------------------- Shapes ------------------------------------------- */

/// A line segment between two endpoints.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineSegment<V: Vector> {
    pub p_start: V,
    pub p_end: V,
}

impl<V: Vector> LineSegment<V> {
    pub fn new(p_start: V, p_end: V) -> Self {
        Self { p_start, p_end }
    }
}

/// A half-line from `origin` along `dir`. The direction need not be normalized.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ray<V: Vector> {
    pub origin: V,
    pub dir: V,
}

impl<V: Vector> Ray<V> {
    pub fn new(origin: V, dir: V) -> Self {
        Self { origin, dir }
    }
}

/// A hyperplane `dot(normal, x) + offset == 0`; points with non-negative signed
/// distance are on the inside half.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "V: serde::Serialize, V::Num: serde::Serialize",
        deserialize = "V: serde::Deserialize<'de>, V::Num: serde::Deserialize<'de>"
    ))
)]
pub struct Plane<V: Vector> {
    pub normal: V,
    pub offset: V::Num,
}

impl<V: Vector> Plane<V> {
    pub fn new(normal: V, offset: V::Num) -> Self {
        Self { normal, offset }
    }

    pub fn signed_distance(&self, point: &V) -> V::Num {
        self.normal.dot(point) + self.offset
    }
}

/// A convex region bounded by inward-facing planes. A 3-D view frustum is the
/// six-plane case, but any number of planes is accepted.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "V: serde::Serialize, V::Num: serde::Serialize",
        deserialize = "V: serde::Deserialize<'de>, V::Num: serde::Deserialize<'de>"
    ))
)]
pub struct Frustum<V: Vector> {
    planes: Vec<Plane<V>>,
}

impl<V: Vector> Frustum<V> {
    pub fn from_planes(planes: Vec<Plane<V>>) -> Self {
        Self { planes }
    }

    pub fn planes(&self) -> &[Plane<V>] {
        &self.planes
    }
}
