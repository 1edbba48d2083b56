use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use cutter_motion::poll::Never;
use cutter_motion::sim::{SimDelay, SimTimer};
use cutter_motion::{Engine, JobOutcome, MachineConfig, Shared};
use cutter_planner::SimPlanner;
use cutter_protocol::{read_words, Decoded, Decoder, Mode};
use indicatif::{ProgressBar, ProgressStyle};

use crate::simulator::Bench;

mod simulator;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a job on a simulated machine.
    Run {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Simulate)]
        mode: ModeArg,
        /// Machine configuration, as JSON.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Size of the planner queue.
        #[arg(long, default_value_t = 16)]
        capacity: usize,
        /// How far the simulated head is from the home switches, in steps.
        #[arg(long, default_value_t = 1000)]
        travel: u32,
        /// Print every queued move, as JSON.
        #[arg(long)]
        actions: bool,
    },
    /// Print the commands in a job.
    Dump { path: PathBuf },
}

#[derive(Copy, Clone, ValueEnum)]
enum ModeArg {
    Simulate,
    Test,
    Run,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Mode {
        match m {
            ModeArg::Simulate => Mode::Simulate,
            ModeArg::Test => Mode::Test,
            ModeArg::Run => Mode::Run,
        }
    }
}

fn load_job(path: &Path) -> anyhow::Result<Vec<i32>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        log::warn!(
            "{} isn't a whole number of words, ignoring the last {} bytes",
            path.display(),
            bytes.len() % 4
        );
    }
    Ok(read_words(&bytes))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MachineConfig> {
    let Some(path) = path else {
        return Ok(MachineConfig::default());
    };
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

fn run(
    path: &Path,
    mode: Mode,
    config: MachineConfig,
    capacity: usize,
    travel: u32,
    actions: bool,
) -> anyhow::Result<()> {
    let words = load_job(path)?;
    let shared = Shared::new(Bench::new(&config, travel), &config);
    let mut engine = Engine::new(
        &shared,
        SimPlanner::new(capacity).draining(),
        SimTimer::default(),
        SimDelay::new(),
        config,
    );

    let bar = ProgressBar::new(words.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} words") {
        bar.set_style(style);
    }
    let outcome =
        engine.run_job_with_progress(&words, mode, &mut Never, |n| bar.set_position(n as u64));
    bar.finish();

    if actions {
        for action in engine.planner().planner().pushed() {
            println!("{}", serde_json::to_string(action)?);
        }
    }

    match outcome? {
        JobOutcome::Completed { words } => {
            eprintln!("done: {words} words, finished at {:?}", engine.position());
            Ok(())
        }
        JobOutcome::Rejected { word, violation } => Err(anyhow!(
            "word {word}: line to ({}, {}) leaves the working area",
            violation.target.x,
            violation.target.y
        )),
    }
}

fn dump(path: &Path) -> anyhow::Result<()> {
    let words = load_job(path)?;
    let mut decoder = Decoder::new();
    for (i, &word) in words.iter().enumerate() {
        match decoder.push(word) {
            Decoded::Pending => {}
            Decoded::Command(cmd) => println!("{i:8}: {cmd:?}"),
            Decoded::BitmapHeader { bpp, width, words } => {
                println!("{i:8}: Bitmap {{ bpp: {bpp}, width: {width} }} ({words} words)")
            }
            Decoded::BitmapWord { index, value, .. } => {
                println!("{i:8}:     {index:4}: {value:#010x}")
            }
            Decoded::Unknown(w) => println!("{i:8}: ?? {w}"),
        }
    }
    if !decoder.is_idle() {
        eprintln!("warning: the last command is incomplete");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    match args.cmd {
        Cmd::Run {
            path,
            mode,
            config,
            capacity,
            travel,
            actions,
        } => {
            let config = load_config(config.as_deref())?;
            run(&path, mode.into(), config, capacity, travel, actions)
        }
        Cmd::Dump { path } => dump(&path),
    }
}
