use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Smallest half extent written for a bounding box axis.
pub const MIN_HALF_EXTENT: f64 = 1.0e-3;

/// Axis-aligned range. A null range has `min > max` on every axis and absorbs nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range3 {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Default for Range3 {
    fn default() -> Self {
        Self::null()
    }
}

impl Range3 {
    pub fn null() -> Self {
        Range3 {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Range3 { min, max }
    }

    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
    {
        let mut r = Range3::null();
        for p in points {
            r.extend(p);
        }
        r
    }

    pub fn is_null(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, p: &Point3<f64>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn union(&self, other: &Range3) -> Range3 {
        if self.is_null() {
            return *other;
        }
        if other.is_null() {
            return *self;
        }
        let mut r = *self;
        r.extend(&other.min);
        r.extend(&other.max);
        r
    }

    pub fn intersection(&self, other: &Range3) -> Range3 {
        if self.is_null() || other.is_null() {
            return Range3::null();
        }
        let r = Range3 {
            min: Point3::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            max: Point3::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        };
        if r.is_null() {
            Range3::null()
        } else {
            r
        }
    }

    pub fn extent(&self) -> Vector3<f64> {
        if self.is_null() {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        self.max - self.min
    }

    pub fn diagonal(&self) -> f64 {
        let e = self.extent();
        (e.x * e.x + e.y * e.y + e.z * e.z).sqrt()
    }

    pub fn center(&self) -> Point3<f64> {
        Point3::new(
            0.5 * (self.min.x + self.max.x),
            0.5 * (self.min.y + self.max.y),
            0.5 * (self.min.z + self.max.z),
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub bounding_box: [f64; 12],
}

impl BoundingVolume {
    /// Center plus three axis-aligned half vectors. Returns `None` for a null range.
    pub fn from_range(range: &Range3) -> Option<Self> {
        if range.is_null() {
            return None;
        }
        let c = range.center();
        let e = range.extent();
        let hx = (0.5 * e.x).max(MIN_HALF_EXTENT);
        let hy = (0.5 * e.y).max(MIN_HALF_EXTENT);
        let hz = (0.5 * e.z).max(MIN_HALF_EXTENT);
        Some(BoundingVolume {
            bounding_box: [
                c.x, c.y, c.z, //
                hx, 0.0, 0.0, //
                0.0, hy, 0.0, //
                0.0, 0.0, hz,
            ],
        })
    }

    pub fn center(&self) -> Point3<f64> {
        let b = &self.bounding_box;
        Point3::new(b[0], b[1], b[2])
    }

    /// Conservative axis-aligned range of the box.
    pub fn to_range(&self) -> Range3 {
        let b = &self.bounding_box;
        let c = self.center();
        let u = Vector3::new(b[3], b[4], b[5]);
        let v = Vector3::new(b[6], b[7], b[8]);
        let w = Vector3::new(b[9], b[10], b[11]);

        let extent = Vector3::new(
            u.x.abs() + v.x.abs() + w.x.abs(),
            u.y.abs() + v.y.abs() + w.y.abs(),
            u.z.abs() + v.z.abs() + w.z.abs(),
        );
        Range3::new(c - extent, c + extent)
    }
}
