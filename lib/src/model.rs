//! The simulation as the user drives it: editable bodies, the orbit
//! engine, the period stopwatch and its trace, and the target orbit.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use color_eyre::eyre::{self, bail};
use nalgebra::Vector2;
use tracing::{debug, info};

use crate::{
    bodies::{Body, BodyKind, BodyRef, BodyState},
    config::EngineConfig,
    kepler::engine::{EllipticalOrbitEngine, OrbitElements},
    period::{PeriodTraceTracker, TraceState, TrackerRef},
    stopwatch::Stopwatch,
    targets::TargetOrbit,
};

#[derive(Debug)]
pub struct KeplerModel {
    sun: BodyRef,
    planet: BodyRef,
    engine: EllipticalOrbitEngine,
    trace: TrackerRef,
    stopwatch: Stopwatch,
    playing: bool,
    /// Set by body listeners on user edits, cleared by [`sync`](Self::sync).
    pending_update: Arc<AtomicBool>,
    initial_sun: BodyState,
    initial_planet: BodyState,
    target: Option<TargetOrbit>,
}

impl KeplerModel {
    pub fn new(config: EngineConfig, sun: BodyState, planet: BodyState) -> eyre::Result<Self> {
        config.validate()?;
        check_state(&sun)?;
        check_state(&planet)?;
        Ok(Self::build(config, sun, planet))
    }

    pub fn with_defaults() -> Self {
        Self::build(
            EngineConfig::default(),
            BodyState::default_sun(),
            BodyState::default_planet(),
        )
    }

    fn build(config: EngineConfig, sun_state: BodyState, planet_state: BodyState) -> Self {
        let sun = Body::new(BodyKind::Sun, sun_state, config.radius_scale).into_ref();
        let planet = Body::new(BodyKind::Planet, planet_state, config.radius_scale).into_ref();
        let mut engine = EllipticalOrbitEngine::new(vec![sun.clone(), planet.clone()], config);

        let pending_update = Arc::new(AtomicBool::new(true));
        for body in [&sun, &planet] {
            let pending = pending_update.clone();
            let internal = engine.internal_mutation_flag();
            body.write().add_listener(move |_| {
                if !internal.load(Ordering::Relaxed) {
                    pending.store(true, Ordering::Relaxed);
                }
            });
        }
        let trace = PeriodTraceTracker::attach(&mut engine);

        let mut model = Self {
            sun,
            planet,
            engine,
            trace,
            stopwatch: Stopwatch::default(),
            playing: false,
            pending_update,
            initial_sun: sun_state,
            initial_planet: planet_state,
            target: None,
        };
        model.sync();
        model
    }

    pub fn engine(&self) -> &EllipticalOrbitEngine {
        &self.engine
    }

    pub fn elements(&self) -> OrbitElements {
        self.engine.elements()
    }

    pub fn sun(&self) -> &BodyRef {
        &self.sun
    }

    pub fn planet(&self) -> &BodyRef {
        &self.planet
    }

    pub fn trace(&self) -> &TrackerRef {
        &self.trace
    }

    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn target(&self) -> Option<TargetOrbit> {
        self.target
    }

    /// A body was edited since the last derivation.
    pub fn needs_update(&self) -> bool {
        self.pending_update.load(Ordering::Relaxed)
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Re-derive the orbit if a body was edited.
    pub fn sync(&mut self) {
        if self.pending_update.swap(false, Ordering::Relaxed) {
            self.engine.update();
        }
    }

    pub fn set_sun_mass(&mut self, mass: f64) -> eyre::Result<()> {
        check_mass(mass)?;
        self.sun.write().set_mass(mass);
        self.sync();
        Ok(())
    }

    pub fn set_planet_mass(&mut self, mass: f64) -> eyre::Result<()> {
        check_mass(mass)?;
        self.planet.write().set_mass(mass);
        self.sync();
        Ok(())
    }

    pub fn set_planet_motion(
        &mut self,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
    ) -> eyre::Result<()> {
        if !(position.iter().all(|x| x.is_finite()) && velocity.iter().all(|x| x.is_finite())) {
            bail!("planet position and velocity must be finite");
        }
        self.planet.write().set_motion(position, velocity);
        self.sync();
        Ok(())
    }

    pub fn set_period_divisions(&mut self, divisions: usize) {
        self.sync();
        self.engine.set_period_divisions(divisions);
    }

    pub fn set_always_circular(&mut self, always_circular: bool) {
        self.sync();
        self.engine.set_always_circular(always_circular);
    }

    pub fn erase_area_history(&mut self) {
        self.engine.reset();
    }

    /// Place the planet at the target's periapsis, keeping the current
    /// sense of rotation.
    pub fn load_target(&mut self, target: TargetOrbit) {
        self.sync();
        let (position, velocity) = target.periapsis_state(self.engine.mu(), self.engine.retrograde());
        self.planet.write().set_motion(position, velocity);
        self.target = Some(target);
        self.sync();
        info!(%target, matched = self.target_matched(), "target orbit loaded");
    }

    pub fn set_target(&mut self, target: Option<TargetOrbit>) {
        self.target = target;
    }

    pub fn target_matched(&self) -> bool {
        self.target.is_some_and(|t| t.matches(&self.engine.elements()))
    }

    /// Restart the period stopwatch and trace one orbit from here.
    pub fn start_period_measurement(&mut self) -> eyre::Result<()> {
        self.sync();
        if !self.engine.allowed_orbit() {
            bail!(
                "cannot measure the period of a {:?} orbit",
                self.engine.orbit_type()
            );
        }
        self.stopwatch.reset();
        self.stopwatch.start();
        self.trace.write().begin(&self.engine, self.stopwatch.elapsed());
        Ok(())
    }

    /// Restore the initial bodies and clear every piece of history.
    pub fn reset(&mut self) {
        self.playing = false;
        self.stopwatch.reset();
        self.trace.write().reset();
        self.target = None;
        self.sun.write().set_state(self.initial_sun);
        self.planet.write().set_state(self.initial_planet);
        self.sync();
        self.engine.reset();
        debug!("model reset");
    }

    /// Advance one frame of `dt`.
    pub fn step(&mut self, dt: f64) {
        self.sync();
        if self.playing && self.engine.allowed_orbit() {
            self.engine.run(dt);
            self.stopwatch.step(dt);
        }

        let state = {
            let mut trace = self.trace.write();
            trace.tick(self.stopwatch.elapsed(), dt);
            trace.state()
        };
        if self.stopwatch.is_running() && state != TraceState::Running {
            self.stopwatch.pause();
            debug!(elapsed = self.stopwatch.elapsed(), "period stopwatch stopped");
        }
    }
}

fn check_mass(mass: f64) -> eyre::Result<()> {
    if !(mass.is_finite() && mass > 0.0) {
        bail!("mass must be positive, got {mass}");
    }
    Ok(())
}

fn check_state(state: &BodyState) -> eyre::Result<()> {
    check_mass(state.mass)?;
    if !(state.position.iter().all(|x| x.is_finite()) && state.velocity.iter().all(|x| x.is_finite()))
    {
        bail!("body state must be finite");
    }
    Ok(())
}

#[test]
fn user_edits_apply_on_next_step() {
    let mut model = KeplerModel::with_defaults();
    assert!(!model.needs_update());
    assert_eq!(model.elements().e, 0.0);

    model
        .planet()
        .write()
        .set_motion(Vector2::new(2.0, 0.0), Vector2::new(0.0, 20.0));
    assert!(model.needs_update());
    assert_eq!(model.elements().e, 0.0);

    model.step(0.0);
    assert!(!model.needs_update());
    assert!(model.elements().e > 0.3);
}

#[test]
fn engine_writes_are_not_user_edits() {
    let mut model = KeplerModel::with_defaults();
    model.set_playing(true);
    for _ in 0..20 {
        model.step(0.01);
        assert!(!model.needs_update());
    }
    assert_ne!(model.planet().read().position(), Vector2::new(2.0, 0.0));
}

#[test]
fn paused_model_does_not_move() {
    let mut model = KeplerModel::with_defaults();
    let before = model.planet().read().state();
    model.step(0.1);
    assert_eq!(model.planet().read().state(), before);
}

#[test]
fn loaded_targets_match() {
    for target in TargetOrbit::ALL {
        let mut model = KeplerModel::with_defaults();
        assert!(!model.target_matched());
        model.load_target(target);
        assert!(model.engine().allowed_orbit(), "{target}");
        assert!(model.target_matched(), "{target}: {:?}", model.elements());
        assert!(model.engine().retrograde());
    }
}

#[test]
fn sun_mass_changes_period() {
    let mut model = KeplerModel::with_defaults();
    let before = model.elements().period;
    model.set_sun_mass(400.0).unwrap();
    assert!(model.elements().period < before);
    assert!(model.set_sun_mass(0.0).is_err());
    assert!(model.set_planet_mass(f64::NAN).is_err());
}

#[test]
fn period_measurement_stops_after_one_orbit() {
    let mut model = KeplerModel::with_defaults();
    model.set_planet_motion(Vector2::new(2.0, 0.0), Vector2::new(0.0, 20.0)).unwrap();
    model.set_playing(true);
    model.start_period_measurement().unwrap();

    let period = model.elements().period;
    let dt = period / 200.0;
    for _ in 0..210 {
        model.step(dt);
    }
    assert!(!model.stopwatch().is_running());
    assert!((model.stopwatch().elapsed() - period).abs() <= dt * 1.0001);
    assert_eq!(model.trace().read().state(), TraceState::Fading);
}

#[test]
fn crashed_orbit_cannot_be_measured() {
    let mut model = KeplerModel::with_defaults();
    model.set_planet_motion(Vector2::new(2.0, 0.0), Vector2::new(0.0, 1.0)).unwrap();
    assert!(!model.engine().allowed_orbit());
    assert!(model.start_period_measurement().is_err());
}

#[test]
fn reset_restores_initial_bodies() {
    let mut model = KeplerModel::with_defaults();
    model.set_playing(true);
    model.load_target(TargetOrbit::Mars);
    model.step(0.05);
    model.reset();

    assert!(!model.is_playing());
    assert_eq!(model.target(), None);
    assert_eq!(model.planet().read().state(), BodyState::default_planet());
    assert_eq!(model.stopwatch().elapsed(), 0.0);
    assert!(model.engine().orbital_areas().iter().all(|s| !s.already_entered));
    assert!((model.elements().a - 2.0).abs() < 1e-4);
}
