use std::f64::consts::{PI, TAU};

/// Unit vector in the J2000 equatorial frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction([f64; 3]);

impl Direction {
    /// Normalizes `v`. Returns `None` for the zero vector.
    #[must_use]
    pub fn new(v: [f64; 3]) -> Option<Self> {
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        Some(Self([v[0] / norm, v[1] / norm, v[2] / norm]))
    }

    /// From right ascension and declination, both in radians.
    #[must_use]
    pub fn from_ra_dec(ra: f64, dec: f64) -> Self {
        let (sin_ra, cos_ra) = ra.sin_cos();
        let (sin_dec, cos_dec) = dec.sin_cos();
        Self([cos_dec * cos_ra, cos_dec * sin_ra, sin_dec])
    }

    #[must_use]
    pub fn from_hours_degrees(ra_hours: f64, dec_deg: f64) -> Self {
        Self::from_ra_dec(ra_hours * TAU / 24.0, dec_deg.to_radians())
    }

    /// Right ascension in `[0, 2π)` and declination in `[-π/2, π/2]`.
    #[must_use]
    pub fn ra_dec(&self) -> (f64, f64) {
        let [x, y, z] = self.0;
        let ra = y.atan2(x).rem_euclid(TAU);
        let dec = z.clamp(-1.0, 1.0).asin();
        (ra, dec)
    }

    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.0[0] * other.0[0] + self.0[1] * other.0[1] + self.0[2] * other.0[2]
    }

    /// Angular separation in degrees.
    #[must_use]
    pub fn separation_deg(&self, other: &Self) -> f64 {
        self.dot(other).clamp(-1.0, 1.0).acos() * 180.0 / PI
    }

    /// Linear blend re-normalized onto the sphere. Falls back to `self` for
    /// antipodal inputs.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        let a = self.0;
        let b = other.0;
        Self::new([
            a[0] + (b[0] - a[0]) * t,
            a[1] + (b[1] - a[1]) * t,
            a[2] + (b[2] - a[2]) * t,
        ])
        .unwrap_or(*self)
    }

    #[must_use]
    pub const fn as_array(&self) -> [f64; 3] {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ra_dec_round_trip() {
        let d = Direction::from_hours_degrees(18.6, 38.8);
        let (ra, dec) = d.ra_dec();
        assert!((ra * 24.0 / TAU - 18.6).abs() < 1e-9);
        assert!((dec.to_degrees() - 38.8).abs() < 1e-9);
    }

    #[test]
    fn zero_vector_rejected() {
        assert!(Direction::new([0.0, 0.0, 0.0]).is_none());
        assert!(Direction::new([0.0, 0.0, 2.0]).is_some());
    }

    #[test]
    fn lerp_midpoint_is_on_sphere() {
        let a = Direction::from_ra_dec(0.0, 0.0);
        let b = Direction::from_ra_dec(PI / 2.0, 0.0);
        let mid = a.lerp(&b, 0.5);
        assert!((mid.dot(&mid) - 1.0).abs() < 1e-12);
        assert!((mid.separation_deg(&a) - 45.0).abs() < 1e-9);
    }
}
