//! Math utilities
//!
//! Re-exports from glam plus the bounding volumes shared by the meshlet
//! pipeline and the GPU-facing asset formats.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Axis-aligned bounding box accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create an empty AABB
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create an AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create the tightest AABB around a set of points
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut result = Self::EMPTY;
        for point in points {
            result.expand_to_include(point);
        }
        result
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the half-extents of the AABB
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Check if the AABB is empty
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Check if a point is inside the AABB
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Expand the AABB to include a point
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Merge with another AABB
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Convert into the center/extent form stored on disk and on the GPU.
    ///
    /// An empty accumulator yields the degenerate box (center 0, extent 0).
    pub fn to_bounding_box(&self) -> BoundingBox {
        if self.is_empty() {
            return BoundingBox::ZERO;
        }
        BoundingBox {
            center: self.center(),
            extent: self.half_extents(),
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Center/half-extent box, the persisted AABB layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Box center
    pub center: Vec3,
    /// Half size along each axis
    pub extent: Vec3,
}

impl BoundingBox {
    /// Degenerate box at the origin
    pub const ZERO: Self = Self {
        center: Vec3::ZERO,
        extent: Vec3::ZERO,
    };

    /// Minimum corner
    pub fn min(&self) -> Vec3 {
        self.center - self.extent
    }

    /// Maximum corner
    pub fn max(&self) -> Vec3 {
        self.center + self.extent
    }

    /// Convert back into a min/max accumulator
    pub fn to_aabb(&self) -> Aabb {
        Aabb::new(self.min(), self.max())
    }
}

/// Bounding sphere
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct BoundingSphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
}

impl BoundingSphere {
    /// Zero-radius sphere at the origin, used for "not assigned yet"
    pub const ZERO: Self = Self {
        center: Vec3::ZERO,
        radius: 0.0,
    };

    /// Create a new bounding sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Check if a point is inside the sphere
    pub fn contains_point(&self, point: Vec3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }

    /// Check if another sphere lies fully inside this one, up to `epsilon`
    pub fn contains_sphere(&self, other: &BoundingSphere, epsilon: f32) -> bool {
        self.center.distance(other.center) + other.radius <= self.radius + epsilon
    }

    /// Check if this sphere intersects another
    pub fn intersects(&self, other: &BoundingSphere) -> bool {
        let distance_sq = (other.center - self.center).length_squared();
        let radius_sum = self.radius + other.radius;
        distance_sq <= radius_sum * radius_sum
    }

    /// Smallest sphere enclosing both `self` and `other`.
    ///
    /// The result always contains both inputs, which is what makes it usable
    /// for incremental parent-bounds accumulation.
    pub fn merge(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let distance = offset.length();

        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }

        let radius = (distance + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / distance);
        BoundingSphere { center, radius }
    }

    /// Create a bounding sphere from an AABB
    pub fn from_aabb(aabb: &Aabb) -> Self {
        let center = aabb.center();
        let radius = aabb.half_extents().length();
        Self { center, radius }
    }
}

/// Octahedral-encode a unit direction into two snorm16 values packed in a u32
pub fn encode_octahedral(direction: Vec3) -> u32 {
    let n = direction / (direction.x.abs() + direction.y.abs() + direction.z.abs()).max(f32::MIN_POSITIVE);
    let mut xy = Vec2::new(n.x, n.y);
    if n.z < 0.0 {
        xy = (Vec2::ONE - Vec2::new(xy.y.abs(), xy.x.abs()))
            * Vec2::new(xy.x.signum(), xy.y.signum());
    }
    let quantize = |v: f32| ((v.clamp(-1.0, 1.0) * 32767.0).round() as i16) as u16 as u32;
    quantize(xy.x) | (quantize(xy.y) << 16)
}

/// Decode a direction produced by [`encode_octahedral`]
pub fn decode_octahedral(code: u32) -> Vec3 {
    let dequantize = |bits: u32| (bits as u16 as i16) as f32 / 32767.0;
    let x = dequantize(code & 0xffff);
    let y = dequantize(code >> 16);
    let z = 1.0 - x.abs() - y.abs();
    let t = (-z).max(0.0);
    let x = x + if x >= 0.0 { -t } else { t };
    let y = y + if y >= 0.0 { -t } else { t };
    Vec3::new(x, y, z).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points([Vec3::ZERO, Vec3::new(2.0, 4.0, -2.0)]);
        assert_eq!(aabb.center(), Vec3::new(1.0, 2.0, -1.0));
        assert_eq!(aabb.half_extents(), Vec3::new(1.0, 2.0, 1.0));
        assert!(aabb.contains_point(Vec3::new(1.0, 1.0, -1.0)));
    }

    #[test]
    fn test_empty_aabb_is_degenerate_box() {
        let aabb = Aabb::EMPTY;
        assert!(aabb.is_empty());
        assert_eq!(aabb.to_bounding_box(), BoundingBox::ZERO);
    }

    #[test]
    fn test_bounding_box_round_trip() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::new(3.0, 1.0, 1.0));
        let bounding_box = aabb.to_bounding_box();
        assert_eq!(bounding_box.center, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(bounding_box.extent, Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(bounding_box.to_aabb(), aabb);
    }

    #[test]
    fn test_sphere_merge_contains_both() {
        let a = BoundingSphere::new(Vec3::ZERO, 1.0);
        let b = BoundingSphere::new(Vec3::new(4.0, 0.0, 0.0), 0.5);
        let merged = a.merge(&b);

        assert!(merged.contains_sphere(&a, 1e-5));
        assert!(merged.contains_sphere(&b, 1e-5));
        assert!((merged.radius - 2.75).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_merge_nested() {
        let outer = BoundingSphere::new(Vec3::ZERO, 5.0);
        let inner = BoundingSphere::new(Vec3::new(1.0, 1.0, 0.0), 1.0);
        assert_eq!(outer.merge(&inner), outer);
        assert_eq!(inner.merge(&outer), outer);
    }

    #[test]
    fn test_sphere_intersection() {
        let a = BoundingSphere::new(Vec3::ZERO, 1.0);
        let b = BoundingSphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0);
        let c = BoundingSphere::new(Vec3::new(5.0, 0.0, 0.0), 1.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_octahedral_round_trip() {
        for direction in [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
            Vec3::new(1.0, -2.0, -3.0).normalize(),
        ] {
            let decoded = decode_octahedral(encode_octahedral(direction));
            assert!(decoded.dot(direction) > 0.9999, "{direction} -> {decoded}");
        }
    }
}
