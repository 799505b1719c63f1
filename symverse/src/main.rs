use symverse::{bench_gravity, Registry, RunConfig, RunContext, RunState, StopLevel};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sym", about = "Evolve a particle trajectory through a pipeline of physics stages")]
struct Args {
    /// YAML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trajectory whose last slice seeds the run
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Trajectory to create or append to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of steps; negative runs until EXIT or Ctrl-C
    #[arg(short, long, allow_negative_numbers = true)]
    timesteps: Option<i64>,

    /// Pipeline stage as name[opt,opt=val]; repeatable, appended after the config file's
    #[arg(short = 'm', long = "module")]
    modules: Vec<String>,

    /// Print every stage's usage text and exit
    #[arg(long)]
    list_stages: bool,

    /// Time fgrav against pfgrav and exit
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_config(args: &Args) -> Result<RunConfig> {
    let mut cfg = match &args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("failed to load run configuration {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(input) = &args.input {
        cfg.run.input = Some(input.clone());
    }
    if let Some(output) = &args.output {
        cfg.run.output = Some(output.clone());
    }
    if let Some(t) = args.timesteps {
        cfg.run.timesteps = Some(t);
    }
    for m in &args.modules {
        cfg.push_stage_text(m)
            .with_context(|| format!("bad -m argument {m}"))?;
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.list_stages {
        print!("{}", Registry::builtin().explain_all());
        return Ok(());
    }
    if args.bench {
        bench_gravity()?;
        return Ok(());
    }

    let cfg = load_config(&args)?;
    let ctx = RunContext::prepare(&cfg).context("failed to set up the run")?;

    // first Ctrl-C: finish the current step; second: drop it and stop now
    let stop = ctx.stop_token();
    ctrlc::set_handler(move || match stop.request_stop() {
        StopLevel::Soft => warn!("interrupt: stopping after the current step (again to abort)"),
        _ => warn!("second interrupt: discarding the current step"),
    })
    .context("failed to install the interrupt handler")?;

    let outcome = ctx.run().context("run failed")?;
    info!(
        "{} steps run, {} slices written",
        outcome.iterations, outcome.slices_written
    );
    if outcome.state == RunState::Aborted {
        bail!("run interrupted; the last step was not committed");
    }
    Ok(())
}
