//! Equal-time wedges of an orbit.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// One angular wedge of the orbit, swept in `1/N` of a period.
///
/// Angles are true anomalies measured from periapsis, unwrapped so
/// that `start_angle <= end_angle`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrbitalSector {
    pub start_angle: f64,
    pub end_angle: f64,
    /// Body position at `end_angle`.
    pub dot_position: Vector2<f64>,
    pub swept_area: f64,
    /// Fraction of the sector swept, in `[0, 1]`.
    pub completion: f64,
    /// Part of the current N-division partition.
    pub active: bool,
    /// The body is currently inside this sector.
    pub inside: bool,
    pub already_entered: bool,
}

impl OrbitalSector {
    pub fn reset(&mut self, erase_history: bool) {
        let already_entered = self.already_entered && !erase_history;
        *self = Self {
            already_entered,
            ..Self::default()
        };
    }

    pub fn contains(&self, ta: f64) -> bool {
        self.active && self.start_angle <= ta && ta < self.end_angle
    }
}

#[test]
fn soft_reset_keeps_history() {
    let mut sector = OrbitalSector {
        start_angle: 1.0,
        end_angle: 2.0,
        dot_position: Vector2::new(1.0, 1.0),
        swept_area: 0.5,
        completion: 0.25,
        active: true,
        inside: true,
        already_entered: true,
    };
    sector.reset(false);
    assert!(sector.already_entered);
    assert_eq!(sector.swept_area, 0.0);
    assert_eq!(sector.dot_position, Vector2::zeros());
    assert!(!sector.inside && !sector.active);

    sector.reset(true);
    assert_eq!(sector, OrbitalSector::default());
}
