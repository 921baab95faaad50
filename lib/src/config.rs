//! Engine tuning and physical constants.

use color_eyre::eyre::{self, bail};
use serde::{Deserialize, Serialize};

use crate::kepler::anomaly::KeplerSolver;

pub const MIN_DIVISIONS: usize = 2;

/// Constants and knobs of the orbit engine. Every field has a
/// default, so a TOML table only needs to name what it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Gravitational constant in model units.
    pub g: f64,
    /// Central mass defining the reference parameter `μ₀ = g · m`.
    pub reference_mass: f64,
    /// Number of sector slots allocated by the engine.
    pub max_divisions: usize,
    pub period_divisions: usize,
    pub always_circular: bool,
    /// Escape speed is `sqrt(2μ/r)` scaled by this factor (< 1).
    pub escape_damping: f64,
    /// Forced circular speeds are scaled by this factor (> 1).
    pub circular_boost: f64,
    /// Eccentricities below this are snapped to zero.
    pub circular_threshold: f64,
    /// Below this sine of the angle between position and velocity the
    /// velocity is considered collinear.
    pub collinear_epsilon: f64,
    /// Rotation applied to a collinear velocity (rad).
    pub nudge_angle: f64,
    pub solver_tolerance: f64,
    pub solver_max_iterations: u64,
    /// `radius = radius_scale · mass^(1/3)`.
    pub radius_scale: f64,
    /// Period trace fade-out (s).
    pub fade_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            g: 2.970_728,
            reference_mass: 200.0,
            max_divisions: 6,
            period_divisions: 4,
            always_circular: false,
            escape_damping: 0.99,
            circular_boost: 1.0001,
            circular_threshold: 0.01,
            collinear_epsilon: 1e-6,
            nudge_angle: 0.01,
            solver_tolerance: 1e-2,
            solver_max_iterations: 100,
            radius_scale: 0.03,
            fade_duration: 3.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> eyre::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.g.is_finite() && self.g > 0.0) {
            bail!("gravitational constant must be positive, got {}", self.g);
        }
        if !(self.reference_mass.is_finite() && self.reference_mass > 0.0) {
            bail!("reference mass must be positive, got {}", self.reference_mass);
        }
        if self.max_divisions < MIN_DIVISIONS {
            bail!(
                "max_divisions must be at least {MIN_DIVISIONS}, got {}",
                self.max_divisions
            );
        }
        if !(MIN_DIVISIONS..=self.max_divisions).contains(&self.period_divisions) {
            bail!(
                "period_divisions must be within [{MIN_DIVISIONS}, {}], got {}",
                self.max_divisions,
                self.period_divisions
            );
        }
        if !(self.escape_damping > 0.0 && self.escape_damping < 1.0) {
            bail!("escape_damping must be in (0, 1), got {}", self.escape_damping);
        }
        if self.circular_boost < 1.0 {
            bail!("circular_boost must be >= 1, got {}", self.circular_boost);
        }
        if !(self.solver_tolerance > 0.0 && self.solver_max_iterations > 0) {
            bail!("solver needs a positive tolerance and iteration cap");
        }
        if self.radius_scale < 0.0 || self.fade_duration <= 0.0 {
            bail!("radius_scale must be non-negative and fade_duration positive");
        }
        Ok(())
    }

    pub fn mu_ref(&self) -> f64 {
        self.g * self.reference_mass
    }

    pub fn solver(&self) -> KeplerSolver {
        KeplerSolver {
            tol: self.solver_tolerance,
            maxiter: self.solver_max_iterations,
        }
    }

    pub fn clamp_divisions(&self, divisions: usize) -> usize {
        divisions.clamp(MIN_DIVISIONS, self.max_divisions)
    }
}

#[test]
fn partial_toml_keeps_defaults() {
    let config = EngineConfig::from_toml_str(
        r"
period_divisions = 6
always_circular = true
",
    )
    .unwrap();
    assert_eq!(config.period_divisions, 6);
    assert!(config.always_circular);
    assert_eq!(config.max_divisions, 6);
    assert_eq!(config.g, EngineConfig::default().g);
}

#[test]
fn out_of_range_divisions_rejected() {
    let err = EngineConfig::from_toml_str("period_divisions = 7").unwrap_err();
    assert!(err.to_string().contains("period_divisions"));
    assert!(EngineConfig::from_toml_str("period_divisions = 1").is_err());
    assert!(EngineConfig::from_toml_str("escape_damping = 1.5").is_err());
    assert!(EngineConfig::from_toml_str("g = \"fast\"").is_err());
}
