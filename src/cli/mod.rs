use crate::clock::LocalDay;
use crate::config::Config;
use crate::error::EngineError;
use crate::manifest::{gather_chunks, ManifestStore, RecordingStatus};
use crate::planning::{FilePlanningLoader, PlanningLoader};
use crate::program::{ProgramId, StorageLayout};
use crate::scheduler::{plan_for, PlanOutcome};
use anyhow::Result;
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "onair")]
#[command(about = "Scheduled recording of live audio streams", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Show the manifest of every recording in storage
    Status(StatusCliArgs),
    /// List the audio chunks recorded for a program day
    Chunks(ChunksCliArgs),
    /// Show the triggers the current planning would place now
    Plan,
}

#[derive(ClapArgs, Debug)]
pub struct StatusCliArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ChunksCliArgs {
    /// Program id (the `uuid` of the planning entry)
    pub program_id: String,
    /// Broadcast day as YYYYMMDD (default: today in UTC)
    #[arg(long)]
    pub day: Option<LocalDay>,
}

pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    program: String,
    day: LocalDay,
    dir: PathBuf,
    #[serde(flatten)]
    status: RecordingStatus,
}

pub fn handle_status_command(config: &Config, args: StatusCliArgs) -> Result<()> {
    let layout = StorageLayout::new(&config.storage.root);
    let manifests = ManifestStore::new();

    let entries: Vec<StatusEntry> = layout
        .discover()
        .into_iter()
        .filter(|stored| manifests.exists(&stored.dir))
        .map(|stored| StatusEntry {
            status: manifests.read(&stored.dir),
            program: stored.program_dir,
            day: stored.day,
            dir: stored.dir,
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!(
            "No recordings found under {}",
            config.storage.root.display()
        );
        return Ok(());
    }

    println!("Found {} recording(s):\n", entries.len());
    for entry in entries {
        println!(
            "{:<48} {}  {:<16} {:>4} chunks",
            entry.program,
            entry.day,
            entry.status.status.as_str(),
            entry.status.chunk_list.len()
        );
        for error in &entry.status.errors {
            println!("    ! {}", error);
        }
    }

    Ok(())
}

pub fn handle_chunks_command(config: &Config, args: ChunksCliArgs) -> Result<()> {
    let layout = StorageLayout::new(&config.storage.root);
    let program_id = ProgramId::new(args.program_id);
    let day = args
        .day
        .unwrap_or_else(|| LocalDay::new(Utc::now().date_naive()));

    let dir = layout
        .find_recording_dir(&program_id, day)
        .ok_or(EngineError::UnknownIdentity {
            program_id: program_id.clone(),
            day,
        })?;

    let chunks = gather_chunks(&dir)?;
    if chunks.is_empty() {
        println!("No chunks recorded yet in {}", dir.display());
    }
    for chunk in chunks {
        println!("{}", chunk.display());
    }
    Ok(())
}

pub async fn handle_plan_command(config: &Config) -> Result<()> {
    let loader = FilePlanningLoader::new(&config.planning.file);
    let programs = loader.load().await?;
    let now = Utc::now();

    if programs.is_empty() {
        println!("Planning {} is empty", loader.path().display());
        return Ok(());
    }

    for program in programs {
        match plan_for(&program, now) {
            Ok(PlanOutcome::Planned(plan)) => {
                println!("[{}] {} ({})", program.id, program.title, program.time_zone);
                let recurrence = if plan.recurring_init { " (daily)" } else { "" };
                println!("    PENDING_INIT {}{}", plan.pending_init, recurrence);
                println!(
                    "    START        {} for {}s",
                    plan.start,
                    plan.capture_duration.as_secs()
                );
                println!("    STOP         {}", plan.stop);
            }
            Ok(PlanOutcome::AlreadyAired { ended_at }) => {
                println!(
                    "[{}] {}: already aired (ended {})",
                    program.id, program.title, ended_at
                );
            }
            Err(e) => println!("[{}] {}: {}", program.id, program.title, e),
        }
    }

    Ok(())
}
