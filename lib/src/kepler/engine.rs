//! The elliptical orbit engine.
//!
//! Derives the classical elements of the planet's orbit from its
//! state vector around a fixed sun at the origin, advances the planet
//! along that ellipse, and keeps the equal-time sector partition used
//! to show Kepler's second law.
//!
//! Sign convention: the orbit is *retrograde* when the angular
//! momentum `L = r × v` is positive. Mean anomaly, true anomaly and
//! angular velocity all increase for retrograde motion and decrease
//! for prograde motion, so the planet always sits at polar angle
//! `w + ν` from the focus.

use std::{
    f64::consts,
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use itertools::Itertools;
use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    bodies::{BodyKind, BodyRef},
    config::EngineConfig,
    emitter::Emitter,
    kepler::{
        anomaly::{normalize_angle, ta_to_ma, third_law, KeplerSolver},
        sector::OrbitalSector,
    },
};

/// Smallest planet distance accepted before the position is nudged.
const MIN_RADIUS: f64 = 1e-3;
/// Speed given to a planet at rest so that it has a direction.
const MIN_SPEED: f64 = 1e-4;
/// Relative slack on the escape test so that a speed already clamped
/// to the escape speed still counts as escaping.
const ESCAPE_SLACK: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitType {
    Stable,
    Crash,
    Escape,
}

/// Escape wins over crash; a periapsis exactly at the sun's surface
/// counts as a crash.
pub fn classify(escaped: bool, periapsis: f64, central_radius: f64) -> OrbitType {
    if escaped {
        OrbitType::Escape
    } else if periapsis <= central_radius {
        OrbitType::Crash
    } else {
        OrbitType::Stable
    }
}

/// Elements of the planet's current orbit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrbitElements {
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Distance between the centre and a focus.
    pub c: f64,
    /// Eccentricity. Exactly `0` for near-circular orbits and `1` for
    /// escape.
    pub e: f64,
    /// Argument of periapsis (radians).
    pub w: f64,
    /// Mean anomaly, in `[0, 2π)`.
    pub ma: f64,
    /// True anomaly, in `[0, 2π)`.
    pub ta: f64,
    /// Mean motion, signed like the angular momentum.
    pub ang_vel: f64,
    pub period: f64,
    /// Angular momentum per unit mass.
    pub l: f64,
    /// Distance from the planet to the primary focus.
    pub d1: f64,
    /// Distance from the planet to the empty focus.
    pub d2: f64,
}

impl OrbitElements {
    pub fn periapsis_radius(&self) -> f64 {
        self.a * (1.0 - self.e)
    }

    pub fn apoapsis_radius(&self) -> f64 {
        self.a * (1.0 + self.e)
    }

    pub fn radius_at(&self, ta: f64) -> f64 {
        self.a * (1.0 - self.e.powi(2)) / (1.0 + self.e * libm::cos(ta))
    }

    pub fn position_at(&self, ta: f64) -> Vector2<f64> {
        let angle = self.w + ta;
        self.radius_at(ta) * Vector2::new(libm::cos(angle), libm::sin(angle))
    }

    pub fn periapsis(&self) -> Vector2<f64> {
        self.position_at(0.0)
    }

    pub fn apoapsis(&self) -> Vector2<f64> {
        self.position_at(consts::PI)
    }

    /// Centre of the ellipse; the sun sits at the primary focus.
    pub fn center(&self) -> Vector2<f64> {
        -self.c * Vector2::new(libm::cos(self.w), libm::sin(self.w))
    }
}

/// Marks engine-originated writes to the planet for as long as it is
/// alive. Body listeners check the flag to tell those writes apart
/// from user edits.
#[derive(Debug)]
pub struct MutationGuard {
    flag: Arc<AtomicBool>,
}

impl MutationGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self { flag: flag.clone() }
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct EllipticalOrbitEngine {
    config: EngineConfig,
    solver: KeplerSolver,
    sun: BodyRef,
    planet: BodyRef,
    mu: f64,
    mu_ref: f64,
    elements: OrbitElements,
    orbit_type: OrbitType,
    retrograde: bool,
    always_circular: bool,
    period_divisions: usize,
    escape_speed: f64,
    escape_radius: f64,
    total_area: f64,
    segment_area: f64,
    orbital_areas: Vec<OrbitalSector>,
    internal_mutation: Arc<AtomicBool>,
    /// The orbit's shape was re-derived.
    pub on_changed: Emitter<EllipticalOrbitEngine>,
    /// The planet moved.
    pub on_ran: Emitter<EllipticalOrbitEngine>,
    /// Sector history was erased.
    pub on_reset: Emitter<EllipticalOrbitEngine>,
}

impl EllipticalOrbitEngine {
    /// Build an engine over `[sun, planet]`. Elements stay zeroed
    /// until the first [`update`](Self::update).
    pub fn new(bodies: Vec<BodyRef>, config: EngineConfig) -> Self {
        let [sun, planet]: [BodyRef; 2] = bodies.try_into().unwrap_or_else(|bodies: Vec<_>| {
            panic!(
                "EllipticalOrbitEngine::new: expected exactly two bodies, got {}",
                bodies.len()
            )
        });
        debug_assert_eq!(sun.read().kind, BodyKind::Sun);
        debug_assert_eq!(planet.read().kind, BodyKind::Planet);

        let mu = config.g * sun.read().mass();
        let period_divisions = config.clamp_divisions(config.period_divisions);
        Self {
            solver: config.solver(),
            mu,
            mu_ref: config.mu_ref(),
            elements: OrbitElements::default(),
            orbit_type: OrbitType::Stable,
            retrograde: false,
            always_circular: config.always_circular,
            period_divisions,
            escape_speed: 0.0,
            escape_radius: 0.0,
            total_area: 0.0,
            segment_area: 0.0,
            orbital_areas: vec![OrbitalSector::default(); config.max_divisions],
            internal_mutation: Arc::new(AtomicBool::new(false)),
            on_changed: Emitter::new(),
            on_ran: Emitter::new(),
            on_reset: Emitter::new(),
            config,
            sun,
            planet,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sun(&self) -> &BodyRef {
        &self.sun
    }

    pub fn planet(&self) -> &BodyRef {
        &self.planet
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn elements(&self) -> OrbitElements {
        self.elements
    }

    pub fn orbit_type(&self) -> OrbitType {
        self.orbit_type
    }

    pub fn allowed_orbit(&self) -> bool {
        self.orbit_type == OrbitType::Stable
    }

    pub fn retrograde(&self) -> bool {
        self.retrograde
    }

    pub fn always_circular(&self) -> bool {
        self.always_circular
    }

    pub fn period_divisions(&self) -> usize {
        self.period_divisions
    }

    pub fn escape_speed(&self) -> f64 {
        self.escape_speed
    }

    /// Distance at which the planet's current speed would be the
    /// escape speed.
    pub fn escape_radius(&self) -> f64 {
        self.escape_radius
    }

    pub fn total_area(&self) -> f64 {
        self.total_area
    }

    pub fn segment_area(&self) -> f64 {
        self.segment_area
    }

    /// All sector slots, active or not.
    pub fn orbital_areas(&self) -> &[OrbitalSector] {
        &self.orbital_areas
    }

    pub fn active_areas(&self) -> impl Iterator<Item = &OrbitalSector> {
        self.orbital_areas.iter().filter(|s| s.active)
    }

    /// Shared flag that is set while the engine itself writes to the
    /// planet.
    pub fn internal_mutation_flag(&self) -> Arc<AtomicBool> {
        self.internal_mutation.clone()
    }

    pub fn is_internally_mutating(&self) -> bool {
        self.internal_mutation.load(Ordering::Relaxed)
    }

    pub fn set_always_circular(&mut self, always_circular: bool) {
        self.always_circular = always_circular;
        self.update();
    }

    /// Clamped to `[MIN_DIVISIONS, max_divisions]`.
    pub fn set_period_divisions(&mut self, divisions: usize) {
        let clamped = self.config.clamp_divisions(divisions);
        if clamped != divisions {
            debug!(divisions, clamped, "period divisions clamped");
        }
        self.period_divisions = clamped;
        self.update();
    }

    /// Re-derive the whole orbit from the planet's current position and
    /// velocity and the sun's mass.
    ///
    /// The planet's velocity may be rewritten: degenerate vectors are
    /// nudged, always-circular mode forces the circular speed, and
    /// speeds at or above escape are clamped to the escape speed.
    pub fn update(&mut self) {
        self.reset_orbital_areas(false);

        let (sun_mass, sun_radius) = {
            let sun = self.sun.read();
            (sun.mass(), sun.radius())
        };
        self.mu = self.config.g * sun_mass;

        let (original_rv, original_vv) = {
            let planet = self.planet.read();
            (planet.position(), planet.velocity())
        };
        let (rv, mut vv) = self.sanitize(original_rv, original_vv);
        let r = rv.norm();

        self.escape_speed = libm::sqrt(2.0 * self.mu / r) * self.config.escape_damping;
        self.retrograde = cross(rv, vv) > 0.0;

        let mut escaped = false;
        if self.always_circular {
            let tangent = Vector2::new(-rv.y, rv.x) / r;
            let speed = libm::sqrt(self.mu / r) * self.config.circular_boost;
            vv = if self.retrograde {
                tangent * speed
            } else {
                -tangent * speed
            };
        } else if vv.norm() >= self.escape_speed * (1.0 - ESCAPE_SLACK) {
            vv = vv.normalize() * self.escape_speed;
            escaped = true;
        }
        if rv != original_rv || vv != original_vv {
            self.write_planet(rv, vv);
        }

        let v = vv.norm();
        let l = cross(rv, vv);
        let a = r * self.mu / (2.0 * self.mu - r * v.powi(2));
        assert!(
            a.is_finite() && a > 0.0,
            "EllipticalOrbitEngine::update: invalid semi-major axis {a} (r = {r}, v = {v}, mu = {})",
            self.mu
        );
        let e_raw = libm::sqrt((1.0 - l.powi(2) / (a * self.mu)).abs());
        self.retrograde = l > 0.0;
        let direction = if self.retrograde { 1.0 } else { -1.0 };

        // Polar ellipse equation solved for the angle at radius r; the
        // radial velocity picks which half of the orbit we are on.
        let cos_ta = if e_raw > f64::EPSILON {
            ((a * (1.0 - e_raw.powi(2)) / r - 1.0) / e_raw).clamp(-1.0, 1.0)
        } else {
            1.0
        };
        let radial = rv.dot(&vv);
        let ta = normalize_angle(direction * radial.signum() * libm::acos(cos_ta));
        let w = normalize_angle(libm::atan2(rv.y, rv.x) - ta);
        let period = third_law(a, self.mu, self.mu_ref);
        let ang_vel = direction * consts::TAU / period;

        let previous_type = self.orbit_type;
        self.orbit_type = classify(escaped, a * (1.0 - e_raw), sun_radius);
        if self.orbit_type != previous_type {
            debug!(from = ?previous_type, to = ?self.orbit_type, "orbit classification changed");
        }

        let e = if escaped {
            1.0
        } else if self.always_circular || e_raw < self.config.circular_threshold {
            0.0
        } else {
            e_raw
        };
        let b = a * libm::sqrt(1.0 - e.powi(2));
        let ma = if e < 1.0 {
            normalize_angle(ta_to_ma(ta, e))
        } else {
            0.0
        };

        self.elements = OrbitElements {
            a,
            b,
            c: a * e,
            e,
            w,
            ma,
            ta,
            ang_vel,
            period,
            l,
            d1: r,
            d2: 2.0 * a - r,
        };
        self.escape_radius = 2.0 * self.mu / v.powi(2);
        self.total_area = consts::PI * a * b;
        self.segment_area = self.total_area / self.period_divisions as f64;

        self.update_forces(rv);
        self.calculate_orbital_divisions(false);

        debug!(
            a,
            e,
            w,
            period,
            retrograde = self.retrograde,
            orbit_type = ?self.orbit_type,
            "orbit derived"
        );
        self.emit(|s| &mut s.on_changed);
        self.emit(|s| &mut s.on_ran);
    }

    /// Advance the planet `dt` along the current ellipse. Does nothing
    /// unless the orbit is stable.
    pub fn run(&mut self, dt: f64) {
        if !self.allowed_orbit() {
            trace!(orbit_type = ?self.orbit_type, "run skipped");
            return;
        }

        let OrbitElements {
            a, e, w, ang_vel, l, ..
        } = self.elements;
        let previous_ma = self.elements.ma;
        let ma = normalize_angle(previous_ma + dt * ang_vel);
        let ta = self.solver.ma_to_ta(ma, e);

        let r = a * (1.0 - e.powi(2)) / (1.0 + e * libm::cos(ta));
        let angle = w + ta;
        let radial = Vector2::new(libm::cos(angle), libm::sin(angle));
        let tangential = Vector2::new(-libm::sin(angle), libm::cos(angle));
        let rv = r * radial;
        let mut vv = ang_vel * a / libm::sqrt(1.0 - e.powi(2))
            * (e * libm::sin(ta) * radial + (1.0 + e * libm::cos(ta)) * tangential);
        // Match the stored angular momentum so energy and momentum hold
        // from tick to tick.
        let l_new = cross(rv, vv);
        if l_new != 0.0 {
            vv *= l / l_new;
        }
        self.write_planet(rv, vv);

        self.elements.ma = ma;
        self.elements.ta = ta;
        self.elements.d1 = r;
        self.elements.d2 = 2.0 * a - r;
        self.escape_speed = libm::sqrt(2.0 * self.mu / r) * self.config.escape_damping;
        self.escape_radius = 2.0 * self.mu / vv.norm_squared();

        self.update_forces(rv);
        self.mark_passed_sectors(previous_ma, dt * ang_vel);
        self.calculate_orbital_divisions(true);
        trace!(dt, ma, ta, r, "orbit ran");
        self.emit(|s| &mut s.on_ran);
    }

    /// Reset every sector slot. A soft reset keeps `already_entered`.
    pub fn reset_orbital_areas(&mut self, erase_history: bool) {
        for sector in &mut self.orbital_areas {
            sector.reset(erase_history);
        }
    }

    /// Erase all sector history and rebuild the partition.
    pub fn reset(&mut self) {
        self.reset_orbital_areas(true);
        self.calculate_orbital_divisions(false);
        debug!("orbital areas reset");
        self.emit(|s| &mut s.on_reset);
    }

    fn sanitize(&self, mut rv: Vector2<f64>, mut vv: Vector2<f64>) -> (Vector2<f64>, Vector2<f64>) {
        if rv.norm() < MIN_RADIUS {
            warn!(?rv, "planet at the focus, nudging");
            rv = Vector2::new(MIN_RADIUS, 0.0);
        }
        if vv.norm() == 0.0 {
            vv = rv.normalize() * MIN_SPEED;
        }
        let sin = cross(rv, vv) / (rv.norm() * vv.norm());
        if sin.abs() < self.config.collinear_epsilon {
            warn!(?rv, ?vv, "velocity collinear with position, rotating");
            vv = Rotation2::new(self.config.nudge_angle) * vv;
        }
        (rv, vv)
    }

    fn write_planet(&self, position: Vector2<f64>, velocity: Vector2<f64>) {
        let _guard = MutationGuard::acquire(&self.internal_mutation);
        self.planet.write().set_motion(position, velocity);
    }

    fn update_forces(&self, rv: Vector2<f64>) {
        let r = rv.norm();
        let acceleration = -self.mu * rv / r.powi(3);
        let force = {
            let mut planet = self.planet.write();
            planet.acceleration = acceleration;
            planet.force = acceleration * planet.mass();
            planet.force
        };
        let mut sun = self.sun.write();
        sun.force = -force;
        sun.acceleration = if sun.mass() > 0.0 {
            sun.force / sun.mass()
        } else {
            Vector2::zeros()
        };
    }

    /// Flag every sector the planet crossed while its mean anomaly moved
    /// by `travelled` from `from`, including ones skipped over in a
    /// single large step.
    fn mark_passed_sectors(&mut self, from: f64, travelled: f64) {
        let n = self.period_divisions;
        if travelled.abs() >= consts::TAU {
            for sector in &mut self.orbital_areas[..n] {
                sector.already_entered = true;
            }
            return;
        }
        let width = consts::TAU / n as f64;
        let first = ((from / width).floor() as i64).clamp(0, n as i64 - 1);
        let crossed = ((from + travelled) / width).floor() as i64 - (from / width).floor() as i64;
        let step = crossed.signum();
        for k in 0..=crossed.abs() {
            let index = (first + step * k).rem_euclid(n as i64) as usize;
            self.orbital_areas[index].already_entered = true;
        }
    }

    /// Split the orbit into `period_divisions` wedges of equal mean
    /// anomaly (and so equal area and equal time). With `fill`, the
    /// wedge holding the planet gets its swept area from the mean
    /// anomaly elapsed inside it.
    fn calculate_orbital_divisions(&mut self, fill: bool) {
        let n = self.period_divisions;
        for sector in &mut self.orbital_areas[n..] {
            sector.reset(false);
        }
        if !self.allowed_orbit() {
            return;
        }

        let elements = self.elements;
        let solver = self.solver;
        let half_ab = 0.5 * elements.a * elements.b;
        let segment_area = self.segment_area;

        let bounds = (0..=n).map(|i| i as f64 * consts::TAU / n as f64);
        let mut start = 0.0;
        for (sector, (ma_start, ma_end)) in self.orbital_areas.iter_mut().zip(bounds.tuple_windows()) {
            let mut end = solver.ma_to_ta(ma_end, elements.e);
            while end <= start {
                end += consts::TAU;
            }
            sector.active = true;
            sector.start_angle = start;
            sector.end_angle = end;
            sector.dot_position = elements.position_at(end);

            if fill {
                sector.inside = sector.contains(elements.ta);
                if sector.inside {
                    sector.already_entered = true;
                    let swept = if elements.ang_vel > 0.0 {
                        elements.ma - ma_start
                    } else {
                        ma_end - elements.ma
                    };
                    sector.swept_area = (half_ab * swept).clamp(0.0, segment_area);
                    sector.completion = if segment_area > 0.0 {
                        sector.swept_area / segment_area
                    } else {
                        0.0
                    };
                } else if sector.already_entered {
                    sector.swept_area = segment_area;
                    sector.completion = 1.0;
                } else {
                    sector.swept_area = 0.0;
                    sector.completion = 0.0;
                }
            }
            start = end;
        }
    }

    fn emit(&mut self, select: fn(&mut Self) -> &mut Emitter<Self>) {
        let mut emitter = mem::take(select(self));
        emitter.emit(self);
        *select(self) = emitter;
    }
}

fn cross(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
fn engine_with(planet: crate::bodies::BodyState, config: EngineConfig) -> EllipticalOrbitEngine {
    use crate::bodies::{Body, BodyState};

    let sun = Body::new(BodyKind::Sun, BodyState::default_sun(), config.radius_scale).into_ref();
    let planet = Body::new(BodyKind::Planet, planet, config.radius_scale).into_ref();
    let mut engine = EllipticalOrbitEngine::new(vec![sun, planet], config);
    engine.update();
    engine
}

#[cfg(test)]
fn elliptical_state() -> crate::bodies::BodyState {
    crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, 20.0), 50.0)
}

#[test]
fn default_orbit_is_stable_and_circular() {
    let engine = engine_with(crate::bodies::BodyState::default_planet(), EngineConfig::default());
    let el = engine.elements();
    assert_eq!(engine.orbit_type(), OrbitType::Stable);
    assert!(engine.allowed_orbit());
    assert_eq!(el.e, 0.0);
    assert!((el.a - 2.0).abs() < 1e-4, "a = {}", el.a);
    assert!((el.period - 2f64.powf(1.5)).abs() < 1e-3);
    assert!(engine.retrograde());
    assert!(el.ang_vel > 0.0);
    assert!((engine.total_area() - consts::PI * el.a * el.b).abs() < 1e-9);
}

#[test]
#[should_panic(expected = "expected exactly two bodies")]
fn three_bodies_rejected() {
    use crate::bodies::{Body, BodyState};

    let body = |kind| Body::new(kind, BodyState::default_sun(), 0.03).into_ref();
    let _ = EllipticalOrbitEngine::new(
        vec![body(BodyKind::Sun), body(BodyKind::Planet), body(BodyKind::Planet)],
        EngineConfig::default(),
    );
}

#[test]
fn always_circular_forces_circular_velocity() {
    let mut engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 1.0), Vector2::new(3.0, 15.0), 50.0),
        EngineConfig::default(),
    );
    assert!(engine.elements().e > 0.01);
    engine.set_always_circular(true);

    let (rv, vv) = {
        let planet = engine.planet().read();
        (planet.position(), planet.velocity())
    };
    let circular = libm::sqrt(engine.mu() / rv.norm());
    assert_eq!(engine.elements().e, 0.0);
    assert!(rv.dot(&vv).abs() < 1e-9 * rv.norm() * vv.norm());
    assert!((vv.norm() - circular).abs() / circular < 2e-4);
    assert_eq!(engine.orbit_type(), OrbitType::Stable);
}

#[test]
fn update_is_idempotent() {
    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let first = engine.elements();
    let areas = engine.orbital_areas().to_vec();
    engine.update();
    assert_eq!(engine.elements(), first);
    assert_eq!(engine.orbital_areas(), &areas[..]);
    assert_eq!(engine.orbit_type(), OrbitType::Stable);
}

#[test]
fn one_period_returns_to_start() {
    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let start = engine.planet().read().state();
    let before = engine.elements();
    assert!(before.e > 0.3 && before.e < 0.4, "e = {}", before.e);

    let steps = 2000;
    let dt = before.period / steps as f64;
    for step in 0..steps {
        engine.run(dt);
        if step == 700 {
            // Mid-orbit state must describe the same ellipse.
            let mid = engine.elements();
            let mut probe = engine_with(engine.planet().read().state(), EngineConfig::default());
            probe.update();
            let derived = probe.elements();
            assert!((derived.a - before.a).abs() / before.a < 1e-6);
            assert!((derived.e - before.e).abs() < 1e-6);
            assert!((mid.d1 + mid.d2 - 2.0 * before.a).abs() < 1e-9);
        }
    }

    let end = engine.planet().read().state();
    assert!((end.position - start.position).norm() < 1e-3, "{:?}", end.position);
    assert!((end.velocity - start.velocity).norm() < 1e-2, "{:?}", end.velocity);

    engine.update();
    let after = engine.elements();
    assert!((after.a - before.a).abs() / before.a < 1e-4);
    assert!((after.e - before.e).abs() < 1e-4);
}

#[test]
fn prograde_orbit_runs_clockwise() {
    let mut engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, -20.0), 50.0),
        EngineConfig::default(),
    );
    assert!(!engine.retrograde());
    assert!(engine.elements().ang_vel < 0.0);
    engine.run(0.01);
    let position = engine.planet().read().position();
    assert!(position.y < 0.0);
    assert!(engine.planet().read().velocity().y < 0.0);
}

#[test]
fn escape_clamps_velocity() {
    let mut engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, 40.0), 50.0),
        EngineConfig::default(),
    );
    assert_eq!(engine.orbit_type(), OrbitType::Escape);
    assert!(!engine.allowed_orbit());
    assert_eq!(engine.elements().e, 1.0);
    let speed = engine.planet().read().velocity().norm();
    assert!((speed - engine.escape_speed()).abs() < 1e-9);

    let before = engine.planet().read().state();
    engine.run(0.1);
    assert_eq!(engine.planet().read().state(), before);
}

#[test]
fn escaped_orbit_stays_escaped_on_update() {
    for i in 0..200 {
        let angle = i as f64 * consts::TAU / 200.0;
        let velocity = 40.0 * Vector2::new(libm::cos(angle), libm::sin(angle));
        let mut engine = engine_with(
            crate::bodies::BodyState::new(Vector2::new(2.0, 0.3), velocity, 50.0),
            EngineConfig::default(),
        );
        assert_eq!(engine.orbit_type(), OrbitType::Escape, "direction {angle}");
        let clamped = engine.planet().read().state();
        engine.update();
        assert_eq!(engine.orbit_type(), OrbitType::Escape, "direction {angle}");
        assert_eq!(engine.elements().e, 1.0);
        engine.set_period_divisions(3);
        assert_eq!(engine.orbit_type(), OrbitType::Escape, "direction {angle}");
        assert!((engine.planet().read().velocity() - clamped.velocity).norm() < 1e-9);
    }
}

#[test]
fn speed_exactly_at_escape_threshold_escapes() {
    let config = EngineConfig::default();
    let mu = config.g * crate::bodies::BodyState::default_sun().mass;
    let threshold = libm::sqrt(2.0 * mu / 2.0) * config.escape_damping;
    let engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, threshold), 50.0),
        config,
    );
    assert_eq!(engine.orbit_type(), OrbitType::Escape);
}

#[test]
fn slow_planet_crashes() {
    let engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, 1.0), 50.0),
        EngineConfig::default(),
    );
    assert_eq!(engine.orbit_type(), OrbitType::Crash);
    assert!(engine.active_areas().next().is_none());
}

#[test]
fn classification_boundaries() {
    assert_eq!(classify(false, 0.5, 0.5), OrbitType::Crash);
    assert_eq!(classify(false, 0.499, 0.5), OrbitType::Crash);
    assert_eq!(classify(false, 0.501, 0.5), OrbitType::Stable);
    assert_eq!(classify(true, 10.0, 0.5), OrbitType::Escape);
    assert_eq!(classify(true, 0.0, 0.5), OrbitType::Escape);
}

#[test]
fn degenerate_vectors_are_nudged_under_guard() {
    use parking_lot::Mutex;

    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let flag = engine.internal_mutation_flag();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    engine
        .planet()
        .write()
        .add_listener(move |_| s.lock().push(flag.load(Ordering::Relaxed)));

    engine
        .planet()
        .write()
        .set_motion(Vector2::new(2.0, 0.0), Vector2::new(5.0, 0.0));
    engine.update();

    let vv = engine.planet().read().velocity();
    assert!((libm::atan2(vv.y, vv.x) - 0.01).abs() < 1e-12);
    assert!((vv.norm() - 5.0).abs() < 1e-12);
    assert!(!engine.is_internally_mutating());
    // user write, then the engine's own write
    assert_eq!(*seen.lock(), vec![false, true]);
}

#[test]
fn planet_at_rest_crashes_without_panicking() {
    let engine = engine_with(
        crate::bodies::BodyState::new(Vector2::new(2.0, 0.0), Vector2::zeros(), 50.0),
        EngineConfig::default(),
    );
    assert_eq!(engine.orbit_type(), OrbitType::Crash);
}

#[test]
fn update_emits_changed_then_ran() {
    use parking_lot::Mutex;

    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = log.clone();
    engine
        .on_changed
        .add_listener(move |e: &EllipticalOrbitEngine| l.lock().push(("changed", e.elements().a)));
    let l = log.clone();
    engine
        .on_ran
        .add_listener(move |e: &EllipticalOrbitEngine| l.lock().push(("ran", e.elements().a)));

    engine.update();
    engine.run(0.01);
    let log = log.lock();
    assert_eq!(log.iter().map(|(k, _)| *k).collect::<Vec<_>>(), ["changed", "ran", "ran"]);
    assert!(log.iter().all(|(_, a)| (*a - engine.elements().a).abs() < 1e-12));
}

#[test]
fn forces_follow_inverse_square() {
    let engine = engine_with(elliptical_state(), EngineConfig::default());
    let planet = engine.planet().read();
    let sun = engine.sun().read();
    let expected = engine.mu() * planet.mass() / 4.0;
    assert!((planet.force.norm() - expected).abs() < 1e-9);
    assert!(planet.force.x < 0.0);
    assert_eq!(sun.force, -planet.force);
}

#[test]
fn sectors_have_equal_area() {
    for divisions in 2..=6 {
        let config = EngineConfig {
            period_divisions: divisions,
            ..EngineConfig::default()
        };
        let engine = engine_with(elliptical_state(), config);
        let el = engine.elements();
        let sectors: Vec<_> = engine.active_areas().copied().collect();
        assert_eq!(sectors.len(), divisions);
        assert_eq!(sectors[0].start_angle, 0.0);
        assert!((sectors[divisions - 1].end_angle - consts::TAU).abs() < 1e-9);

        for (i, sector) in sectors.iter().enumerate() {
            if i > 0 {
                assert_eq!(sector.start_angle, sectors[i - 1].end_angle);
            }
            // Simpson's rule over ½ r(ν)² dν
            let steps = 2000;
            let h = (sector.end_angle - sector.start_angle) / steps as f64;
            let f = |k: usize| 0.5 * el.radius_at(sector.start_angle + k as f64 * h).powi(2);
            let mut area = f(0) + f(steps);
            for k in 1..steps {
                area += if k % 2 == 1 { 4.0 } else { 2.0 } * f(k);
            }
            area *= h / 3.0;
            let expected = engine.total_area() / divisions as f64;
            assert!(
                (area - expected).abs() / expected < 1e-3,
                "N = {divisions}, sector {i}: {area} vs {expected}"
            );
            assert!((sector.dot_position - el.position_at(sector.end_angle)).norm() < 1e-12);
        }
    }
}

#[test]
fn swept_area_tracks_elapsed_time() {
    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let el = engine.elements();
    let dt = el.period / 400.0;
    for _ in 0..30 {
        engine.run(dt);
    }
    let inside: Vec<_> = engine.active_areas().filter(|s| s.inside).copied().collect();
    assert_eq!(inside.len(), 1);
    let expected = 0.5 * el.a * el.b * (30.0 * dt * el.ang_vel);
    assert!((inside[0].swept_area - expected).abs() < 1e-9 * engine.total_area());
    assert!(inside[0].completion > 0.0 && inside[0].completion < 1.0);

    // finish the first quarter and step into the next sector
    for _ in 30..110 {
        engine.run(dt);
    }
    let areas = engine.orbital_areas();
    assert!(areas[0].already_entered && !areas[0].inside);
    assert_eq!(areas[0].completion, 1.0);
    assert!(areas[1].inside);
}

#[test]
fn large_step_marks_skipped_sectors() {
    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    assert!(engine.elements().ma < 1e-6);
    engine.run(0.6 * engine.elements().period);

    let areas = engine.orbital_areas();
    assert!(areas[0].already_entered && !areas[0].inside);
    assert!(areas[1].already_entered && !areas[1].inside);
    assert_eq!(areas[1].completion, 1.0);
    assert!(areas[2].inside);
    assert!(!areas[3].already_entered);
    assert_eq!(areas[3].completion, 0.0);
}

#[test]
fn hard_reset_erases_history() {
    use std::sync::atomic::AtomicUsize;

    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    let resets = Arc::new(AtomicUsize::new(0));
    let r = resets.clone();
    engine.on_reset.add_listener(move |_| {
        r.fetch_add(1, Ordering::Relaxed);
    });
    engine.run(0.05);
    assert!(engine.orbital_areas().iter().any(|s| s.already_entered));

    engine.update();
    assert!(engine.orbital_areas().iter().any(|s| s.already_entered));

    engine.reset();
    assert!(engine.orbital_areas().iter().all(|s| !s.already_entered));
    assert_eq!(engine.active_areas().count(), 4);
    assert_eq!(resets.load(Ordering::Relaxed), 1);
}

#[test]
fn divisions_are_clamped() {
    let mut engine = engine_with(elliptical_state(), EngineConfig::default());
    engine.set_period_divisions(9);
    assert_eq!(engine.period_divisions(), 6);
    assert_eq!(engine.active_areas().count(), 6);
    engine.set_period_divisions(0);
    assert_eq!(engine.period_divisions(), 2);
    assert_eq!(engine.active_areas().count(), 2);
    assert!((engine.segment_area() - engine.total_area() / 2.0).abs() < 1e-12);
}
