#![warn(clippy::unwrap_used, clippy::pedantic)]
#![allow(
    clippy::cast_precision_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre;
use keplerlab::{model::KeplerModel, targets::TargetOrbit};
use report::{Summary, TickLine};
use scenario::Scenario;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod report;
mod scenario;

/// Run a sun and planet on a Kepler orbit and report the motion.
#[derive(Parser, Debug)]
#[command(name = "keplerlab")]
struct Args {
    /// Scenario file (TOML). The built-in scenario is a circular orbit.
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Number of ticks to run
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Time step per tick
    #[arg(long)]
    dt: Option<f64>,

    /// Planetary orbit to load: mercury, venus, earth, mars or jupiter
    #[arg(long)]
    target: Option<TargetOrbit>,

    /// Number of equal-time sectors
    #[arg(short, long)]
    divisions: Option<usize>,

    /// Force a circular orbit
    #[arg(long)]
    circular: bool,

    /// Do not time the orbital period
    #[arg(long)]
    no_period: bool,
}

impl Args {
    fn apply(&self, scenario: &mut Scenario) {
        if let Some(ticks) = self.ticks {
            scenario.run.ticks = ticks;
        }
        if let Some(dt) = self.dt {
            scenario.run.dt = dt;
        }
        if self.target.is_some() {
            scenario.target = self.target;
        }
        if let Some(divisions) = self.divisions {
            scenario.engine.period_divisions = scenario.engine.clamp_divisions(divisions);
        }
        if self.circular {
            scenario.engine.always_circular = true;
        }
        if self.no_period {
            scenario.run.measure_period = false;
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut scenario = Scenario::load(args.scenario.as_deref())?;
    args.apply(&mut scenario);
    scenario.validate()?;

    let mut model = KeplerModel::new(scenario.engine.clone(), scenario.sun, scenario.planet)?;
    if let Some(target) = scenario.target {
        model.load_target(target);
    }
    print!("{}", Summary(&model));

    let run = &scenario.run;
    model.set_playing(true);
    if run.measure_period {
        if let Err(err) = model.start_period_measurement() {
            warn!("{err}");
        }
    }
    info!(ticks = run.ticks, dt = run.dt, "running");
    for tick in 1..=run.ticks {
        model.step(run.dt);
        if run.report_every > 0 && tick % run.report_every == 0 {
            println!("{}", TickLine { tick, model: &model });
        }
    }

    println!();
    print!("{}", Summary(&model));
    Ok(())
}
