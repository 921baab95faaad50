//! Tracing one orbital period while the period stopwatch runs.

use std::{f64::consts, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kepler::{anomaly::normalize_angle, engine::EllipticalOrbitEngine};

pub type TrackerRef = Arc<RwLock<PeriodTraceTracker>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceState {
    Idle,
    /// The stopwatch is measuring a period and the trace follows the
    /// planet.
    Running,
    /// A full period was traced and the drawing fades out.
    Fading,
}

/// The arc of the orbit traced since the period stopwatch started.
///
/// Angles are true anomalies. `end_angle` moves away from
/// `start_angle` in the direction of motion, so for prograde orbits it
/// is below `start_angle`.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodTraceTracker {
    state: TraceState,
    start_angle: f64,
    end_angle: f64,
    direction: f64,
    target_period: f64,
    started_at: f64,
    fade_elapsed: f64,
    fade_duration: f64,
}

impl PeriodTraceTracker {
    pub fn new(fade_duration: f64) -> Self {
        Self {
            state: TraceState::Idle,
            start_angle: 0.0,
            end_angle: 0.0,
            direction: 1.0,
            target_period: 0.0,
            started_at: 0.0,
            fade_elapsed: 0.0,
            fade_duration,
        }
    }

    /// Create a tracker that follows `engine`: every tick extends the
    /// trace and any change of orbit shape resets it.
    pub fn attach(engine: &mut EllipticalOrbitEngine) -> TrackerRef {
        let tracker = Arc::new(RwLock::new(Self::new(engine.config().fade_duration)));
        let t = tracker.clone();
        engine.on_changed.add_listener(move |_| t.write().reset());
        let t = tracker.clone();
        engine
            .on_ran
            .add_listener(move |engine: &EllipticalOrbitEngine| t.write().on_orbit_ran(engine));
        tracker
    }

    /// Start tracing from the planet's current true anomaly. The
    /// period is captured now and not re-read while tracing.
    pub fn begin(&mut self, engine: &EllipticalOrbitEngine, stopwatch_time: f64) {
        let el = engine.elements();
        self.state = TraceState::Running;
        self.start_angle = el.ta;
        self.end_angle = el.ta;
        self.direction = if el.ang_vel < 0.0 { -1.0 } else { 1.0 };
        self.target_period = el.period;
        self.started_at = stopwatch_time;
        self.fade_elapsed = 0.0;
        debug!(start = el.ta, period = el.period, "period trace started");
    }

    pub fn on_orbit_ran(&mut self, engine: &EllipticalOrbitEngine) {
        if self.state != TraceState::Running {
            return;
        }
        let ta = engine.elements().ta;
        let travelled = if self.direction > 0.0 {
            normalize_angle(ta - self.start_angle)
        } else {
            -normalize_angle(self.start_angle - ta)
        };
        let previous = (self.end_angle - self.start_angle).abs();
        if travelled.abs() >= previous {
            self.end_angle = self.start_angle + travelled;
        } else if previous - travelled.abs() > consts::PI {
            // wrapped past the start: hold at the full ellipse
            self.end_angle = self.start_angle + self.direction * consts::TAU;
        }
    }

    /// Advance the state machine. `stopwatch_time` is the period
    /// stopwatch reading and `dt` the frame's time step.
    pub fn tick(&mut self, stopwatch_time: f64, dt: f64) {
        match self.state {
            TraceState::Idle => {}
            TraceState::Running => {
                if stopwatch_time - self.started_at >= self.target_period {
                    self.state = TraceState::Fading;
                    self.end_angle = self.start_angle + self.direction * consts::TAU;
                    self.fade_elapsed = 0.0;
                    debug!(period = self.target_period, "period trace complete");
                }
            }
            TraceState::Fading => {
                self.fade_elapsed += dt;
                if self.fade_elapsed >= self.fade_duration {
                    self.reset();
                }
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.fade_duration);
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    /// Period captured when the trace started.
    pub fn target_period(&self) -> f64 {
        self.target_period
    }

    /// `(start, end)` of the traced arc, if anything is drawn.
    pub fn traced_interval(&self) -> Option<(f64, f64)> {
        match self.state {
            TraceState::Idle => None,
            TraceState::Running | TraceState::Fading => Some((self.start_angle, self.end_angle)),
        }
    }

    pub fn opacity(&self) -> f64 {
        match self.state {
            TraceState::Idle => 0.0,
            TraceState::Running => 1.0,
            TraceState::Fading => (1.0 - self.fade_elapsed / self.fade_duration).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
fn traced_engine(velocity: nalgebra::Vector2<f64>) -> (EllipticalOrbitEngine, TrackerRef) {
    use nalgebra::Vector2;

    use crate::{
        bodies::{Body, BodyKind, BodyState},
        config::EngineConfig,
    };

    let sun = Body::new(BodyKind::Sun, BodyState::default_sun(), 0.03).into_ref();
    let planet = Body::new(
        BodyKind::Planet,
        BodyState::new(Vector2::new(2.0, 0.0), velocity, 50.0),
        0.03,
    )
    .into_ref();
    let mut engine = EllipticalOrbitEngine::new(vec![sun, planet], EngineConfig::default());
    let tracker = PeriodTraceTracker::attach(&mut engine);
    engine.update();
    (engine, tracker)
}

#[test]
fn trace_runs_fades_and_goes_idle() {
    let (mut engine, tracker) = traced_engine(nalgebra::Vector2::new(0.0, 20.0));
    tracker.write().begin(&engine, 0.0);
    let period = engine.elements().period;
    let dt = period / 100.0;
    let mut time = 0.0;

    let mut last_span = 0.0;
    for _ in 0..99 {
        engine.run(dt);
        time += dt;
        let mut t = tracker.write();
        t.tick(time, dt);
        assert_eq!(t.state(), TraceState::Running);
        let (start, end) = t.traced_interval().unwrap();
        assert!(end - start >= last_span, "trace moved backwards");
        last_span = end - start;
    }
    assert!(last_span > 0.9 * consts::TAU && last_span < consts::TAU);

    engine.run(dt);
    time += dt;
    tracker.write().tick(time + 1e-9, dt);
    {
        let t = tracker.read();
        assert_eq!(t.state(), TraceState::Fading);
        let (start, end) = t.traced_interval().unwrap();
        assert!((end - start - consts::TAU).abs() < 1e-12);
        assert_eq!(t.target_period(), period);
    }

    tracker.write().tick(time, 1.5);
    assert!((tracker.read().opacity() - 0.5).abs() < 1e-12);
    tracker.write().tick(time, 1.5);
    assert_eq!(tracker.read().state(), TraceState::Idle);
    assert_eq!(tracker.read().opacity(), 0.0);
}

#[test]
fn prograde_trace_extends_downwards() {
    let (mut engine, tracker) = traced_engine(nalgebra::Vector2::new(0.0, -20.0));
    tracker.write().begin(&engine, 0.0);
    let dt = engine.elements().period / 50.0;
    for _ in 0..10 {
        engine.run(dt);
    }
    let (start, end) = tracker.read().traced_interval().unwrap();
    assert!(end < start);
}

#[test]
fn orbit_change_resets_trace() {
    let (mut engine, tracker) = traced_engine(nalgebra::Vector2::new(0.0, 20.0));
    tracker.write().begin(&engine, 0.0);
    engine.run(0.1);
    assert_eq!(tracker.read().state(), TraceState::Running);

    engine.set_always_circular(true);
    assert_eq!(tracker.read().state(), TraceState::Idle);
    assert!(tracker.read().traced_interval().is_none());
}
