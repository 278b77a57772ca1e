use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};

use crate::chain::{DataJobChain, DataSplitJobChain, MockJobChain};
use crate::db::Ledger;
use crate::settings::{SettingsArgs, SettingsStore};
use crate::slurm::submit::{DryRun, Sbatch, Submitter};

mod settings;
mod slurm;
mod job;
mod chain;
mod db;

#[derive(Parser, Debug)]
#[command(name = "p1d-chain", version, about = "Submit DESI Lyα P1D job chains to SLURM")]
struct Cli {
    /// Settings file layered over the defaults, may be repeated
    #[arg(long, global = true)]
    settings: Vec<PathBuf>,
    /// Render scripts but don't submit anything
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transmissions, quickquasars and optionally the P1D estimate of mock realizations
    Mock {
        /// Root directory of the mocks
        #[arg(long)]
        rootdir: PathBuf,
        /// Continuum fits and power estimates are only run with a delta directory
        #[arg(long)]
        delta_dir: Option<PathBuf>,
        /// First realization
        #[arg(long, default_value_t = 0)]
        realization: u32,
        #[arg(long, default_value_t = 1)]
        nrealizations: u32,
        #[arg(long, default_value = "lya")]
        forest: String,
        #[command(flatten)]
        args: SettingsArgs,
    },
    /// P1D estimate of every forest on observed spectra
    Data {
        #[arg(long)]
        delta_dir: PathBuf,
        #[command(flatten)]
        args: SettingsArgs,
    },
    /// P1D estimate of every forest, once per split of the quasar catalog
    Split {
        #[arg(long)]
        delta_dir: PathBuf,
        /// Split catalogs, one branch set each
        #[arg(long, num_args = 1.., required = true)]
        split_catalogs: Vec<PathBuf>,
        #[command(flatten)]
        args: SettingsArgs,
    },
    /// Print the resolved settings
    Settings {
        #[command(flatten)]
        args: SettingsArgs,
    },
    /// List submitted jobs
    Jobs {
        /// Job ledger, `jobids.db` in the delta directory or the mock root
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        chain: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Mock { rootdir, delta_dir, realization, nrealizations, forest, args } => {
            let settings = resolve_settings(&cli.settings, &args)?;
            // post-processing script, ledger and settings snapshot all live in the mock root
            write_snapshot(&rootdir, &settings)?;

            let mut mock = MockJobChain::new(
                &rootdir,
                realization,
                delta_dir.as_deref(),
                &forest,
                &settings,
                submitter(&settings, cli.dry_run)?,
            )?;
            for i in 0..nrealizations {
                if i > 0 {
                    mock.inc_realization();
                }
                let last = mock.schedule()?;
                info!("Realization {} ends with job {last}", realization + i);
            }
            let ledger = open_ledger(&rootdir, cli.dry_run)?;
            mock.finish(ledger.as_ref())?;
        }
        Command::Data { delta_dir, args } => {
            let settings = resolve_settings(&cli.settings, &args)?;
            write_snapshot(&delta_dir, &settings)?;

            let mut data = DataJobChain::new(&delta_dir, &settings, submitter(&settings, cli.dry_run)?)?;
            data.schedule()?;
            let ledger = open_ledger(&delta_dir, cli.dry_run)?;
            data.finish(ledger.as_ref())?;
        }
        Command::Split { delta_dir, split_catalogs, args } => {
            let settings = resolve_settings(&cli.settings, &args)?;
            write_snapshot(&delta_dir, &settings)?;

            let mut split = DataSplitJobChain::new(
                &delta_dir,
                &settings,
                &split_catalogs,
                submitter(&settings, cli.dry_run)?,
            )?;
            split.schedule()?;
            let ledger = open_ledger(&delta_dir, cli.dry_run)?;
            split.finish(ledger.as_ref())?;
        }
        Command::Settings { args } => {
            let settings = resolve_settings(&cli.settings, &args)?;
            print!("{settings}");
        }
        Command::Jobs { db, chain } => {
            let ledger = Ledger::open(&db).with_context(|| format!("can't open job ledger {}", db.display()))?;
            for row in ledger.list(chain.as_deref())? {
                println!(
                    "{} {:<10} {:>12} {:<24} {:<9} {}",
                    row.inserted,
                    row.chain,
                    row.slurm_id,
                    row.name,
                    row.state,
                    row.script.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

/// Defaults, then settings files, then command-line values
fn resolve_settings(paths: &[PathBuf], args: &SettingsArgs) -> anyhow::Result<SettingsStore> {
    let mut settings = SettingsStore::load(paths).context("can't load settings")?;
    let overrides = args.to_arg_map().context("can't read command-line settings")?;
    settings.update_from_args(&overrides);
    Ok(settings)
}

fn submitter(settings: &SettingsStore, dry_run: bool) -> anyhow::Result<Box<dyn Submitter>> {
    if dry_run {
        warn!("--dry-run set, nothing will be submitted");
        return Ok(Box::new(DryRun));
    }
    Ok(Box::new(Sbatch::from_section(settings.section("slurm")?)?))
}

fn write_snapshot(root: &Path, settings: &SettingsStore) -> anyhow::Result<()> {
    fs::create_dir_all(root).with_context(|| format!("can't create {}", root.display()))?;
    let path = root.join("settings.json");
    fs::write(&path, settings.to_json()?).with_context(|| format!("can't write {}", path.display()))?;
    info!("Resolved settings saved to {}", path.display());
    Ok(())
}

fn open_ledger(root: &Path, dry_run: bool) -> anyhow::Result<Option<Ledger>> {
    if dry_run {
        return Ok(None);
    }
    let path = root.join("jobids.db");
    let ledger = Ledger::open(&path).with_context(|| format!("can't open job ledger {}", path.display()))?;
    Ok(Some(ledger))
}
