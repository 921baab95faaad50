//! Scenario files: engine configuration, initial bodies and run
//! parameters in one TOML document.
//!
//! ```toml
//! target = "mars"
//!
//! [engine]
//! period_divisions = 6
//!
//! [planet]
//! position = [2.0, 0.0]
//! velocity = [0.0, 20.0]
//! mass = 50.0
//!
//! [run]
//! dt = 0.005
//! ticks = 4000
//! ```

use std::{fs, path::Path};

use color_eyre::eyre::{self, bail, WrapErr};
use keplerlab::{bodies::BodyState, config::EngineConfig, targets::TargetOrbit};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub engine: EngineConfig,
    pub sun: BodyState,
    pub planet: BodyState,
    /// Loaded after the bodies, replacing the planet's motion.
    pub target: Option<TargetOrbit>,
    pub run: RunConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            sun: BodyState::default_sun(),
            planet: BodyState::default_planet(),
            target: None,
            run: RunConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub dt: f64,
    pub ticks: u64,
    pub measure_period: bool,
    /// Print a status line every this many ticks; 0 disables.
    pub report_every: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            ticks: 1000,
            measure_period: true,
            report_every: 100,
        }
    }
}

impl Scenario {
    /// Read a scenario file, or the built-in scenario if `path` is `None`.
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&text).wrap_err_with(|| format!("invalid scenario {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> eyre::Result<Self> {
        let scenario: Self = toml::from_str(s)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        self.engine.validate()?;
        if !(self.run.dt.is_finite() && self.run.dt > 0.0) {
            bail!("run.dt must be positive, got {}", self.run.dt);
        }
        Ok(())
    }
}

#[test]
fn empty_scenario_is_default() {
    assert_eq!(Scenario::from_toml_str("").unwrap(), Scenario::default());
}

#[test]
fn scenario_tables_parse() {
    let scenario = Scenario::from_toml_str(
        r#"
target = "venus"

[engine]
period_divisions = 3

[planet]
position = [1.5, 0.5]
velocity = [-4.0, 18.0]
mass = 10.0

[run]
ticks = 50
"#,
    )
    .unwrap();
    assert_eq!(scenario.target, Some(TargetOrbit::Venus));
    assert_eq!(scenario.engine.period_divisions, 3);
    assert_eq!(scenario.planet.position.as_slice(), &[1.5, 0.5]);
    assert_eq!(scenario.run.ticks, 50);
    assert_eq!(scenario.run.dt, RunConfig::default().dt);
    assert_eq!(scenario.sun, BodyState::default_sun());
}

#[test]
fn bad_run_parameters_rejected() {
    assert!(Scenario::from_toml_str("[run]\ndt = 0.0").is_err());
    assert!(Scenario::from_toml_str("target = \"pluto\"").is_err());
}
