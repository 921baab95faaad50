//! Reference planetary orbits the user can load or try to match.

use std::{fmt, str::FromStr};

use color_eyre::eyre::{self, eyre};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::kepler::engine::OrbitElements;

/// Relative tolerance on the semi-major axis when matching a target.
pub const A_TOLERANCE: f64 = 0.02;
/// Absolute tolerance on the eccentricity when matching a target.
pub const E_TOLERANCE: f64 = 0.02;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOrbit {
    Mercury,
    Venus,
    Earth,
    Mars,
    Jupiter,
}

impl TargetOrbit {
    pub const ALL: [Self; 5] = [
        Self::Mercury,
        Self::Venus,
        Self::Earth,
        Self::Mars,
        Self::Jupiter,
    ];

    /// Semi-major axis (AU).
    pub fn semi_major_axis(self) -> f64 {
        match self {
            Self::Mercury => 0.387,
            Self::Venus => 0.723,
            Self::Earth => 1.0,
            Self::Mars => 1.524,
            Self::Jupiter => 5.203,
        }
    }

    pub fn eccentricity(self) -> f64 {
        match self {
            Self::Mercury => 0.206,
            Self::Venus => 0.007,
            Self::Earth => 0.017,
            Self::Mars => 0.093,
            Self::Jupiter => 0.048,
        }
    }

    /// Position and velocity at periapsis on the +x axis, with the
    /// vis-viva speed for this ellipse around a sun of parameter `mu`.
    pub fn periapsis_state(self, mu: f64, retrograde: bool) -> (Vector2<f64>, Vector2<f64>) {
        let a = self.semi_major_axis();
        let rp = a * (1.0 - self.eccentricity());
        let speed = libm::sqrt(mu * (2.0 / rp - 1.0 / a));
        let sign = if retrograde { 1.0 } else { -1.0 };
        (Vector2::new(rp, 0.0), Vector2::new(0.0, sign * speed))
    }

    pub fn matches(self, elements: &OrbitElements) -> bool {
        let a = self.semi_major_axis();
        (elements.a - a).abs() / a < A_TOLERANCE
            && (elements.e - self.eccentricity()).abs() < E_TOLERANCE
    }
}

impl fmt::Display for TargetOrbit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mercury => "Mercury",
            Self::Venus => "Venus",
            Self::Earth => "Earth",
            Self::Mars => "Mars",
            Self::Jupiter => "Jupiter",
        };
        f.write_str(name)
    }
}

impl FromStr for TargetOrbit {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| eyre!("unknown target orbit {s:?}"))
    }
}

#[test]
fn parse_target_names() {
    assert_eq!("mars".parse::<TargetOrbit>().unwrap(), TargetOrbit::Mars);
    assert_eq!(" Jupiter ".parse::<TargetOrbit>().unwrap(), TargetOrbit::Jupiter);
    assert!("pluto".parse::<TargetOrbit>().is_err());
}

#[test]
fn periapsis_state_follows_vis_viva() {
    let mu = 594.0;
    let (rv, vv) = TargetOrbit::Mars.periapsis_state(mu, false);
    let r = rv.norm();
    let a = r * mu / (2.0 * mu - r * vv.norm_squared());
    assert!((a - 1.524).abs() < 1e-9);
    assert!(vv.y < 0.0);
    assert_eq!(rv.dot(&vv), 0.0);
}
