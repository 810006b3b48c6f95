//! Positions and great-circle distances.

use serde::{Deserialize, Serialize};

/// Mean earth radius in nautical miles
const EARTH_RADIUS_NM: f64 = 3440.065;

/// Number of visibility centres a client may hold (primary + three extended)
pub const MAX_VIS_POINTS: usize = 4;

/// WGS-84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// A position is usable when inside the WGS-84 bounds and not the
    /// `(0, 0)` placeholder clients send before they have a fix.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    /// Great-circle distance in nautical miles (haversine, spherical earth)
    pub fn distance_nm(&self, other: &Position) -> f64 {
        let lat0 = self.latitude.to_radians();
        let lat1 = other.latitude.to_radians();
        let dlat = lat1 - lat0;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat0.cos() * lat1.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_NM * a.sqrt().min(1.0).asin()
    }
}

/// The primary position plus up to three extended visibility centres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisPoints {
    points: [Position; MAX_VIS_POINTS],
}

impl VisPoints {
    pub fn primary(&self) -> Position {
        self.points[0]
    }

    pub fn set_primary(&mut self, position: Position) {
        self.points[0] = position;
    }

    /// Sets an extended centre; slot 0 is the primary and is rejected here.
    pub fn set_extended(&mut self, slot: usize, position: Position) -> bool {
        if slot == 0 || slot >= MAX_VIS_POINTS {
            return false;
        }
        self.points[slot] = position;
        true
    }

    pub fn valid_points(&self) -> impl Iterator<Item = &Position> {
        self.points.iter().filter(|p| p.is_valid())
    }

    pub fn has_valid(&self) -> bool {
        self.valid_points().next().is_some()
    }

    /// Smallest distance between any valid centre of `self` and of `other`.
    /// `None` when either side has no valid centre.
    pub fn min_distance_nm(&self, other: &VisPoints) -> Option<f64> {
        self.valid_points()
            .flat_map(|a| other.valid_points().map(move |b| a.distance_nm(b)))
            .reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_position_validity() {
        assert!(Position::new(31.19, 121.33).is_valid());
        assert!(Position::new(-90.0, 180.0).is_valid());
        assert!(!Position::new(0.0, 0.0).is_valid());
        assert!(!Position::new(90.1, 10.0).is_valid());
        assert!(!Position::new(10.0, -180.5).is_valid());
        assert!(Position::new(0.0, 1.0).is_valid());
    }

    #[test]
    fn test_distance_london_paris() {
        let london = Position::new(51.5074, -0.1278);
        let paris = Position::new(48.8566, 2.3522);
        // ~344 km
        assert_approx_eq!(london.distance_nm(&paris), 185.7, 2.0);
    }

    #[test]
    fn test_distance_same_point() {
        let p = Position::new(31.2, 121.35);
        assert_approx_eq!(p.distance_nm(&p), 0.0, 1e-9);
    }

    #[test]
    fn test_one_degree_latitude_is_sixty_nm() {
        let a = Position::new(10.0, 20.0);
        let b = Position::new(11.0, 20.0);
        assert_approx_eq!(a.distance_nm(&b), 60.04, 0.1);
    }

    #[test]
    fn test_min_distance_uses_extended_points() {
        let mut controller = VisPoints::default();
        controller.set_primary(Position::new(31.0, 121.0));
        assert!(controller.set_extended(2, Position::new(40.0, 116.0)));
        assert!(!controller.set_extended(0, Position::new(1.0, 1.0)));

        let mut pilot = VisPoints::default();
        pilot.set_primary(Position::new(40.1, 116.0));

        let d = controller.min_distance_nm(&pilot).unwrap();
        assert_approx_eq!(d, 6.0, 0.1);
    }

    #[test]
    fn test_min_distance_without_positions() {
        let empty = VisPoints::default();
        let mut other = VisPoints::default();
        other.set_primary(Position::new(31.0, 121.0));
        assert!(empty.min_distance_nm(&other).is_none());
        assert!(!empty.has_valid());
        assert!(other.has_valid());
    }
}
