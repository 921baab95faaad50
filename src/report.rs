use std::fmt;

use itertools::Itertools;
use keplerlab::{kepler::engine::OrbitType, model::KeplerModel, period::TraceState};

/// Multi-line description of the current orbit.
pub struct Summary<'a>(pub &'a KeplerModel);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        let engine = model.engine();
        let el = engine.elements();
        let sense = if engine.retrograde() { "retrograde" } else { "prograde" };
        writeln!(f, "orbit: {:?} ({sense})", engine.orbit_type())?;
        writeln!(f, "  mu = {:.4}, escape speed = {:.4}", engine.mu(), engine.escape_speed())?;
        if engine.orbit_type() == OrbitType::Escape {
            return writeln!(f, "  planet escapes at speed {:.4}", engine.escape_speed());
        }
        writeln!(
            f,
            "  a = {:.4}, b = {:.4}, e = {:.4}, w = {:.4} rad",
            el.a, el.b, el.e, el.w
        )?;
        writeln!(
            f,
            "  periapsis = {:.4}, apoapsis = {:.4}, period = {:.4}",
            el.periapsis_radius(),
            el.apoapsis_radius(),
            el.period
        )?;
        if let Some(target) = model.target() {
            let verdict = if model.target_matched() { "matched" } else { "not matched" };
            writeln!(f, "  target {target}: {verdict}")?;
        }
        let sectors = engine
            .active_areas()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "    #{i} [{:.3}, {:.3}) swept {:.1}%",
                    s.start_angle,
                    s.end_angle,
                    s.completion * 100.0
                )
            })
            .join("\n");
        if !sectors.is_empty() {
            writeln!(f, "  sectors (area {:.4} each):", engine.segment_area())?;
            writeln!(f, "{sectors}")?;
        }
        let stopwatch = model.stopwatch();
        if stopwatch.elapsed() > 0.0 {
            writeln!(f, "  stopwatch: {:.4}", stopwatch.elapsed())?;
        }
        Ok(())
    }
}

/// One status line per reported tick.
pub struct TickLine<'a> {
    pub tick: u64,
    pub model: &'a KeplerModel,
}

impl fmt::Display for TickLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = self.model.engine();
        let el = engine.elements();
        let position = self.model.planet().read().position();
        let inside = engine
            .active_areas()
            .position(|s| s.inside)
            .map_or_else(|| "-".to_owned(), |i| i.to_string());
        write!(
            f,
            "{:>6}  r = ({:+.4}, {:+.4})  ta = {:.4}  sector {inside}",
            self.tick, position.x, position.y, el.ta
        )?;
        let trace = self.model.trace().read();
        match trace.state() {
            TraceState::Idle => Ok(()),
            TraceState::Running => write!(f, "  timing {:.3}", self.model.stopwatch().elapsed()),
            TraceState::Fading => write!(
                f,
                "  period {:.4} (fade {:.0}%)",
                self.model.stopwatch().elapsed(),
                trace.opacity() * 100.0
            ),
        }
    }
}

#[test]
fn summary_lists_active_sectors() {
    let model = KeplerModel::with_defaults();
    let text = Summary(&model).to_string();
    assert!(text.starts_with("orbit: Stable (retrograde)"));
    assert_eq!(text.matches("swept").count(), 4);
}
