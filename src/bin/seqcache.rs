use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use seqcache::{
    CacheConfig, CacheStats, Editing, FrameRGBA, FrameRange, PrefetchWindow, RenderContext,
    SceneId, Stage, Strip, StripId,
};

#[derive(Parser, Debug)]
#[command(name = "seqcache", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Log cache activity to stderr (filter with `RUST_LOG`).
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a synthetic timeline through the cache and print its counters as JSON.
    Simulate(SimulateArgs),
    /// Validate a cache config file.
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Cache config JSON. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of stacked movie strips.
    #[arg(long, default_value_t = 3)]
    strips: u32,

    /// Timeline length in frames.
    #[arg(long, default_value_t = 100)]
    frames: u32,

    /// Width and height of every cached image.
    #[arg(long = "frame-px", default_value_t = 256)]
    frame_px: u32,

    /// Override the config's memory budget (MiB).
    #[arg(long)]
    budget_mb: Option<u64>,

    /// Render threads. Frames are rendered in parallel when > 1.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Run a prefetch job over `START..END` (inclusive) while playing.
    #[arg(long, value_parser = parse_window)]
    prefetch: Option<FrameRange>,

    /// Play the timeline this many times.
    #[arg(long, default_value_t = 2)]
    passes: u32,
}

#[derive(Parser, Debug)]
struct CheckConfigArgs {
    /// Cache config JSON.
    #[arg(long)]
    config: PathBuf,
}

#[derive(serde::Serialize)]
struct SimulateReport {
    strips: u32,
    frames: u32,
    passes: u32,
    frames_rendered: u64,
    stats: CacheStats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("seqcache=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }
    match cli.cmd {
        Command::Simulate(args) => cmd_simulate(args),
        Command::CheckConfig(args) => cmd_check_config(args),
    }
}

fn parse_window(s: &str) -> Result<FrameRange, String> {
    let (a, b) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got '{s}'"))?;
    let start = a.trim().parse().map_err(|e| format!("bad start '{a}': {e}"))?;
    let end = b.trim().parse().map_err(|e| format!("bad end '{b}': {e}"))?;
    FrameRange::new(start, end).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CacheConfig> {
    match path {
        Some(p) => Ok(CacheConfig::from_json_file(p)?),
        None => Ok(CacheConfig::default()),
    }
}

fn cmd_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let cfg = load_config(Some(&args.config))?;
    let json = serde_json::to_string_pretty(&cfg).context("serialize config")?;
    println!("{json}");
    eprintln!("config ok: {}", args.config.display());
    Ok(())
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    if args.strips == 0 || args.frames == 0 {
        anyhow::bail!("--strips and --frames must be >= 1");
    }
    if args.workers == 0 {
        anyhow::bail!("--workers must be >= 1");
    }

    let mut cfg = load_config(args.config.as_ref())?;
    if let Some(mb) = args.budget_mb {
        cfg.memory_budget_mb = mb;
    }
    if args.prefetch.is_some() {
        cfg.prefetch = true;
    }

    let window = Arc::new(PrefetchWindow::new());
    let editing = Editing::new(SceneId(1), cfg)?.with_prefetch(window.clone());
    if let Some(range) = args.prefetch {
        window.start(range);
    }

    let strips = (0..args.strips)
        .map(|i| Strip::movie(StripId(i + 1), 0, args.frames).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers)
        .build()
        .context("build rayon thread pool")?;

    let sim = Simulation {
        editing: &editing,
        strips: &strips,
        frame_px: args.frame_px,
    };
    let mut frames_rendered = 0u64;
    for _ in 0..args.passes {
        frames_rendered += if args.workers == 1 {
            (0..args.frames as i32)
                .map(|tf| sim.render(tf, 0))
                .sum::<u64>()
        } else {
            pool.install(|| {
                (0..args.frames as i32)
                    .into_par_iter()
                    .map(|tf| sim.render(tf, rayon::current_thread_index().unwrap_or(0) as u16))
                    .sum::<u64>()
            })
        };
    }

    let report = SimulateReport {
        strips: args.strips,
        frames: args.frames,
        passes: args.passes,
        frames_rendered,
        stats: editing.stats(),
    };
    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    println!("{json}");
    Ok(())
}

struct Simulation<'a> {
    editing: &'a Editing,
    strips: &'a [Arc<Strip>],
    frame_px: u32,
}

impl Simulation<'_> {
    /// Render one timeline frame the way a sequencer would: reuse final output if cached,
    /// otherwise walk every strip's stages bottom-up. Returns 1 if anything had to be rendered.
    fn render(&self, timeline_frame: i32, task_id: u16) -> u64 {
        let ed = self.editing;
        let ctx = RenderContext::preview(SceneId(1), self.frame_px, self.frame_px)
            .with_task(task_id);
        let tf = timeline_frame as f32;
        ed.set_playback_frame(timeline_frame);

        let Some(top) = self.strips.last() else {
            return 0;
        };
        if ed.fetch(&ctx, top, tf, Stage::FinalOut).is_some() {
            return 0;
        }

        for strip in self.strips {
            for stage in [Stage::Raw, Stage::Preprocessed, Stage::Composite] {
                if ed.fetch(&ctx, strip, tf, stage).is_none() {
                    let img = self.image(strip.id(), timeline_frame, stage);
                    ed.store_if_capacity(&ctx, strip, tf, stage, img);
                }
            }
        }
        let out = self.image(top.id(), timeline_frame, Stage::FinalOut);
        ed.store_if_capacity(&ctx, top, tf, Stage::FinalOut, out);
        ed.remove_temp_entries(task_id, timeline_frame);
        1
    }

    fn image(&self, strip: StripId, timeline_frame: i32, stage: Stage) -> Arc<FrameRGBA> {
        let shade = (strip.0 as i32 * 31 + timeline_frame * 7 + stage.bit() as i32) as u8;
        Arc::new(FrameRGBA::solid(
            self.frame_px,
            self.frame_px,
            [shade, shade, shade, 255],
        ))
    }
}
