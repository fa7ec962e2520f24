use crate::canvas::Canvas;
use crate::config::load_config;
use crate::render::write_output;
use crate::scheduler::LayoutOutcome;
use crate::snapshot::Snapshot;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "boxline", version, about = "Lay out and route a box-and-arrow graph")]
pub struct Args {
    /// Graph document or snapshot (JSON/JSON5), or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// What to write
    #[arg(short = 'f', long = "format", value_enum, default_value = "snapshot")]
    pub format: OutputFormat,

    /// Config JSON file
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// `full` lays everything out again; `preserve` keeps boxes a snapshot already has
    #[arg(long = "mode", value_enum, default_value = "full")]
    pub mode: Mode,

    /// Fail on missing geometry instead of skipping it
    #[arg(long = "strict")]
    pub strict: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Snapshot,
    Scene,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    Preserve,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if args.strict {
        config.render.strict = true;
    }
    let input = read_input(args.input.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let mut canvas = Canvas::init(config);
    let outcome: crate::Result<Option<LayoutOutcome>> = runtime.block_on(async {
        if Snapshot::sniff(&input) {
            canvas.restore(Snapshot::from_json(&input)?)?;
            match args.mode {
                Mode::Full => canvas.tidy().await.map(Some),
                Mode::Preserve => canvas.relayout().await,
            }
        } else {
            canvas.replace_graph(&input)?;
            canvas.relayout().await
        }
    });

    if let Some(LayoutOutcome::Failed { error, .. }) = outcome? {
        return Err(error.into());
    }
    let degraded = canvas.routing_report().degraded.len();
    if degraded > 0 {
        tracing::warn!(degraded, "some edges could not be routed cleanly");
    }

    let json = match args.format {
        OutputFormat::Snapshot => canvas.snapshot().to_json()?,
        OutputFormat::Scene => serde_json::to_string_pretty(&canvas.render()?)?,
    };
    write_output(&json, args.output.as_deref())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}
