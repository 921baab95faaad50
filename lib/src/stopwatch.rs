use serde::{Deserialize, Serialize};

/// Accumulates simulated time while running.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stopwatch {
    running: bool,
    elapsed: f64,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn step(&mut self, dt: f64) {
        if self.running {
            self.elapsed += dt;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

#[test]
fn stopwatch_only_counts_while_running() {
    let mut sw = Stopwatch::default();
    sw.step(1.0);
    sw.start();
    sw.step(0.5);
    sw.step(0.25);
    sw.pause();
    sw.step(1.0);
    assert_eq!(sw.elapsed(), 0.75);
    sw.reset();
    assert_eq!(sw, Stopwatch::default());
}
