mod host;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkspace_common::ChunkId;
use chunkspace_stream::{CellCoord, DrainStats, GridRect, ResizeStats, Space, SpaceConfig};
use clap::{Parser, Subcommand};
use glam::Vec3;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::host::{LatticeHost, ScriptedHost};

#[derive(Parser)]
#[command(name = "chunkspace-cli", about = "CLI driver for the chunkspace focus index")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML file with space configuration (defaults apply to missing keys)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective space configuration
    Info,
    /// Replay the reference visibility scenario step by step
    Scenario {
        /// Print the steps as JSON
        #[arg(long)]
        json: bool,
    },
    /// Walk the focus across a lattice of chunks, draining every step
    Walk {
        /// Chunks per lattice side
        #[arg(short = 'n', long, default_value = "40")]
        chunks: usize,
        /// Number of focus steps
        #[arg(short, long, default_value = "10")]
        steps: u32,
        /// Distance the focus moves along x per step, in world units
        #[arg(long, default_value = "250")]
        stride: f32,
        /// Make every Nth chunk fail its first materialization (0 disables)
        #[arg(long, default_value = "0")]
        flaky: usize,
        /// Print per-step statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SpaceConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => SpaceConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[derive(Serialize)]
struct ScenarioStep {
    label: &'static str,
    bounds: GridRect,
    home: Option<CellCoord>,
    seen_by: Vec<CellCoord>,
}

impl ScenarioStep {
    fn capture(label: &'static str, space: &Space, chunk: ChunkId) -> Self {
        let mut seen_by: Vec<CellCoord> = space
            .grid()
            .cells()
            .filter(|c| c.has_seen(chunk))
            .map(|c| c.coord())
            .collect();
        seen_by.sort();
        Self {
            label,
            bounds: space.grid().rect(),
            home: space.neighborhood_of(chunk).map(|n| n.home),
            seen_by,
        }
    }
}

fn run_scenario(config: SpaceConfig) -> anyhow::Result<Vec<ScenarioStep>> {
    let r = config.resolution;
    let mut space = Space::new(config)?;
    let mut host = ScriptedHost::default();
    let chunk = ChunkId::new();

    space.set_bounds(CellCoord::new(0, 0), CellCoord::new(9, 9))?;
    host.place(chunk, Vec3::new(1.5 * r, 0.0, 1.5 * r));
    space.notice_chunk_near_focus(&host, chunk);
    let mut steps = vec![ScenarioStep::capture("noticed", &space, chunk)];

    space.set_bounds(CellCoord::new(1, 1), CellCoord::new(9, 9))?;
    steps.push(ScenarioStep::capture("bounds shrunk", &space, chunk));

    host.place(chunk, Vec3::new(5.5 * r, 0.0, 5.5 * r));
    space.enqueue(chunk);
    space.drain_pending(&mut host);
    steps.push(ScenarioStep::capture("moved and drained", &space, chunk));

    Ok(steps)
}

#[derive(Serialize)]
struct WalkStep {
    step: u32,
    focus: [f32; 3],
    enqueued: usize,
    forgotten: usize,
    resize: ResizeStats,
    drain: DrainStats,
    registered: usize,
    pending: usize,
}

fn run_walk(
    config: SpaceConfig,
    chunks: usize,
    steps: u32,
    stride: f32,
    flaky: usize,
) -> anyhow::Result<Vec<WalkStep>> {
    let mut host = LatticeHost::new(chunks, config.resolution, flaky);
    let mut space = Space::new(config)?;
    let mut report = Vec::with_capacity(steps as usize);
    tracing::info!(chunks = host.len(), steps, stride, "starting focus walk");

    for step in 0..steps {
        let focus = Vec3::new(step as f32 * stride, 0.0, 0.0);
        let resize = space.focus(focus)?;
        let bounds = space.grid().rect();

        // Chunks whose home cell is in bounds get focused; the rest are
        // dropped from the index.
        let mut enqueued = 0;
        let mut forgotten = 0;
        let lattice: Vec<(ChunkId, Vec3)> = host.chunks().collect();
        for (id, pos) in lattice {
            let in_bounds = bounds.contains(space.home_cell(pos));
            if in_bounds && !space.is_registered(id) {
                if space.enqueue(id) {
                    enqueued += 1;
                }
            } else if !in_bounds && space.forget_chunk(id) {
                forgotten += 1;
            }
        }

        let drain = space.drain_pending(&mut host);
        space.drain_changes();
        report.push(WalkStep {
            step,
            focus: focus.to_array(),
            enqueued,
            forgotten,
            resize,
            drain,
            registered: space.registered_count(),
            pending: space.pending().len(),
        });
    }

    tracing::info!(
        materializations = host.materializations,
        "focus walk complete"
    );
    Ok(report)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("chunkspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", chunkspace_stream::crate_info());
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Scenario { json } => {
            let steps = run_scenario(config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                for step in &steps {
                    let home = step
                        .home
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "-".into());
                    let cells: Vec<String> = step.seen_by.iter().map(|c| c.to_string()).collect();
                    println!(
                        "{:<18} bounds={:?} home={home} seen_by=[{}]",
                        step.label,
                        step.bounds,
                        cells.join(" ")
                    );
                }
            }
        }
        Commands::Walk {
            chunks,
            steps,
            stride,
            flaky,
            json,
        } => {
            let report = run_walk(config, chunks, steps, stride, flaky)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for s in &report {
                    println!(
                        "step {:>3}: focus x={:>8.1} enqueued={:>4} forgotten={:>4} \
                         processed={:>4} retried={:>3} entered={:>5} left={:>5} \
                         cells={:>5} registered={:>5} pending={} ({:?})",
                        s.step,
                        s.focus[0],
                        s.enqueued,
                        s.forgotten,
                        s.drain.processed,
                        s.drain.retried,
                        s.drain.entered,
                        s.drain.left,
                        s.resize.kept + s.resize.created,
                        s.registered,
                        s.pending,
                        s.drain.elapsed,
                    );
                }
            }
        }
    }

    Ok(())
}
