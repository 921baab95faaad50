//! The two point masses of the simulation.

use std::{mem, sync::Arc};

use nalgebra::Vector2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::emitter::{Emitter, ListenerId};

/// Shared handle to a body. Bodies are owned by the model layer and
/// only referenced by the engine.
pub type BodyRef = Arc<RwLock<Body>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    /// The fixed central body, always at the origin.
    Sun,
    /// The orbiting body.
    Planet,
}

/// The externally editable part of a body.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    /// Position in model units (AU).
    pub position: Vector2<f64>,
    /// Velocity in model units per model time unit.
    pub velocity: Vector2<f64>,
    pub mass: f64,
}

impl BodyState {
    pub fn new(position: Vector2<f64>, velocity: Vector2<f64>, mass: f64) -> Self {
        Self {
            position,
            velocity,
            mass,
        }
    }

    pub fn default_sun() -> Self {
        Self::new(Vector2::zeros(), Vector2::zeros(), 200.0)
    }

    pub fn default_planet() -> Self {
        Self::new(Vector2::new(2.0, 0.0), Vector2::new(0.0, 17.2358), 50.0)
    }
}

/// A point mass. Position, velocity and mass changes are broadcast
/// to listeners; force and acceleration are derived values written
/// by the engine and are not broadcast.
#[derive(Debug)]
pub struct Body {
    pub kind: BodyKind,
    state: BodyState,
    radius_scale: f64,
    pub force: Vector2<f64>,
    pub acceleration: Vector2<f64>,
    changed: Emitter<Body>,
}

impl Body {
    pub fn new(kind: BodyKind, state: BodyState, radius_scale: f64) -> Self {
        Self {
            kind,
            state,
            radius_scale,
            force: Vector2::zeros(),
            acceleration: Vector2::zeros(),
            changed: Emitter::new(),
        }
    }

    pub fn into_ref(self) -> BodyRef {
        Arc::new(RwLock::new(self))
    }

    pub fn state(&self) -> BodyState {
        self.state
    }

    pub fn position(&self) -> Vector2<f64> {
        self.state.position
    }

    pub fn velocity(&self) -> Vector2<f64> {
        self.state.velocity
    }

    pub fn mass(&self) -> f64 {
        self.state.mass
    }

    /// Physical radius, a monotonic function of mass.
    pub fn radius(&self) -> f64 {
        radius_for_mass(self.state.mass, self.radius_scale)
    }

    pub fn set_position(&mut self, position: Vector2<f64>) {
        self.state.position = position;
        self.notify();
    }

    pub fn set_velocity(&mut self, velocity: Vector2<f64>) {
        self.state.velocity = velocity;
        self.notify();
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.state.mass = mass;
        self.notify();
    }

    /// Replace position and velocity at once, notifying listeners a
    /// single time.
    pub fn set_motion(&mut self, position: Vector2<f64>, velocity: Vector2<f64>) {
        self.state.position = position;
        self.state.velocity = velocity;
        self.notify();
    }

    pub fn set_state(&mut self, state: BodyState) {
        self.state = state;
        self.notify();
    }

    pub fn add_listener(&mut self, listener: impl FnMut(&Body) + Send + 'static) -> ListenerId {
        self.changed.add_listener(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.changed.remove_listener(id)
    }

    fn notify(&mut self) {
        let mut changed = mem::take(&mut self.changed);
        changed.emit(self);
        self.changed = changed;
    }
}

pub fn radius_for_mass(mass: f64, radius_scale: f64) -> f64 {
    radius_scale * libm::cbrt(mass.max(0.0))
}

#[test]
fn radius_grows_with_mass() {
    let light = Body::new(BodyKind::Sun, BodyState::default_sun(), 0.03);
    let mut heavy = Body::new(BodyKind::Sun, BodyState::default_sun(), 0.03);
    heavy.set_mass(400.0);
    assert!(heavy.radius() > light.radius());
    assert!((light.radius() - 0.03 * libm::cbrt(200.0)).abs() < 1e-12);
}

#[test]
fn body_listeners_see_new_state() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let mut body = Body::new(BodyKind::Planet, BodyState::default_planet(), 0.03);
    let c = calls.clone();
    body.add_listener(move |b| {
        assert_eq!(b.position(), Vector2::new(3.0, 0.0));
        c.fetch_add(1, Ordering::Relaxed);
    });
    body.set_motion(Vector2::new(3.0, 0.0), Vector2::new(0.0, 10.0));
    body.force = Vector2::new(1.0, 0.0);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(body.velocity(), Vector2::new(0.0, 10.0));
}
