//! Anomaly conversions and Kepler's third law.

use std::f64::consts;

use tracing::warn;

/// Tolerance and iteration cap for the Kepler equation solver. The
/// tolerance bounds the last Newton step on the eccentric anomaly.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeplerSolver {
    pub tol: f64,
    pub maxiter: u64,
}

impl Default for KeplerSolver {
    fn default() -> Self {
        Self {
            tol: 1e-2,
            maxiter: 100,
        }
    }
}

impl KeplerSolver {
    /// Mean anomaly to true anomaly in `[0, 2π)`.
    pub fn ma_to_ta(&self, ma: f64, e: f64) -> f64 {
        let ea = ma_to_ea(ma, e, self.tol, self.maxiter);
        ea_to_ta(ea, e)
    }
}

/// Wrap an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(consts::TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= consts::TAU {
        0.0
    } else {
        wrapped
    }
}

/// Solve Kepler's equation `E - e sin E = M` by Newton-Raphson,
/// seeded at `E = M`.
///
/// `M` is first reduced into `(-π, π]`. Iterates are kept inside
/// `[M - e, M + e]`, which always brackets the root. If `maxiter` is
/// exhausted the last estimate is returned.
pub fn ma_to_ea(ma: f64, e: f64, tol: f64, maxiter: u64) -> f64 {
    assert!((0.0..1.0).contains(&e), "ma_to_ea: eccentricity {e} out of range");
    let ma = {
        let m = normalize_angle(ma);
        if m > consts::PI {
            m - consts::TAU
        } else {
            m
        }
    };

    let (lo, hi) = (ma - e, ma + e);
    let mut ea = ma;
    let mut iter = 0;
    while iter < maxiter {
        let step = (ea - e * libm::sin(ea) - ma) / (1.0 - e * libm::cos(ea));
        ea = (ea - step).clamp(lo, hi);

        if step.abs() < tol {
            return ea;
        }

        iter += 1;
    }
    warn!(ma, e, tol, maxiter, "ma_to_ea: iteration cap reached");
    ea
}

/// Eccentric anomaly to true anomaly in `[0, 2π)`.
pub fn ea_to_ta(ea: f64, e: f64) -> f64 {
    let ta = libm::atan2(
        libm::sqrt(1.0 - e.powi(2)) * libm::sin(ea),
        libm::cos(ea) - e,
    );
    normalize_angle(ta)
}

/// True anomaly to mean anomaly, in `(-π, π]`.
pub fn ta_to_ma(ta: f64, e: f64) -> f64 {
    let cos_ta = libm::cos(ta);
    let cos_ea = ((e + cos_ta) / (1.0 + e * cos_ta)).clamp(-1.0, 1.0);
    let mut ea = -libm::acos(cos_ea);
    // sin E must share the sign of sin ν
    if libm::sin(ta) >= 0.0 {
        ea = -ea;
    }
    ea - e * libm::sin(ea)
}

/// Generalized Kepler's third law relative to a reference
/// gravitational parameter: `T = sqrt(a³ · μ₀ / μ)`. At `μ = μ₀` this
/// reduces to `T = a^1.5`.
pub fn third_law(a: f64, mu: f64, mu_ref: f64) -> f64 {
    libm::sqrt(a.powi(3) * mu_ref / mu)
}

#[cfg(test)]
fn angle_diff(a: f64, b: f64) -> f64 {
    let d = normalize_angle(a - b);
    d.min(consts::TAU - d)
}

#[test]
fn third_law_reduces_to_power_law() {
    for a in [0.387, 1.0, 2.0, 5.203, 30.0] {
        let t = third_law(a, 594.0, 594.0);
        assert!((t - a.powf(1.5)).abs() < 1e-9 * t.max(1.0), "a = {a}, t = {t}");
    }
    // heavier central mass, shorter period
    assert!(third_law(2.0, 2.0 * 594.0, 594.0) < third_law(2.0, 594.0, 594.0));
    let t = third_law(2.0, 4.0 * 594.0, 594.0);
    assert!((t - 2f64.powf(1.5) / 2.0).abs() < 1e-9);
}

#[test]
fn anomaly_round_trip() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let solver = KeplerSolver::default();
    let mut rng = StdRng::seed_from_u64(0x6b65_706c);
    for _ in 0..2000 {
        let e = rng.gen_range(0.0..=0.99);
        let ma = rng.gen_range(0.0..consts::TAU);
        let ta = solver.ma_to_ta(ma, e);
        assert!((0.0..consts::TAU).contains(&ta));
        let back = ta_to_ma(ta, e);
        assert!(
            angle_diff(back, ma) <= 1e-2,
            "e = {e}, M = {ma}, ν = {ta}, M' = {back}"
        );
    }
}

#[test]
fn circular_anomalies_coincide() {
    let solver = KeplerSolver::default();
    for i in 0..12 {
        let ma = i as f64 * consts::TAU / 12.0;
        assert!(angle_diff(solver.ma_to_ta(ma, 0.0), ma) < 1e-12);
        assert!(angle_diff(ta_to_ma(ma, 0.0), ma) < 1e-12);
    }
}

#[test]
fn true_anomaly_leads_mean_anomaly_after_periapsis() {
    let solver = KeplerSolver::default();
    let ta = solver.ma_to_ta(1.0, 0.5);
    assert!(ta > 1.0 && ta < consts::PI);
    let ta = solver.ma_to_ta(-1.0, 0.5);
    assert!(ta < consts::TAU - 1.0 && ta > consts::PI);
}

#[test]
fn solver_returns_estimate_when_capped() {
    let ea = ma_to_ea(0.2, 0.99, 0.0, 3);
    assert!(ea.is_finite());
    assert!((ea - 0.2).abs() <= 0.99);
}
