// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tracerepo::{
    discover::discover,
    export::{export, ExportFormat, ExportRequest},
    format::format,
    organize::organize,
    path::find_repo_root,
    store::{Database, DatasetId, Selection, Validity},
    Repository,
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::Confirm;
use std::{env::current_dir, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "tracerepo [options] <tracerepo-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Run as if started in target directory instead of the current one.
    #[arg(short = 'C', long, global = true, value_name = "path")]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let start = match self.repo {
            Some(path) => path,
            None => current_dir()?,
        };

        match self.command {
            Command::Init(opts) => run_init(start, opts),
            Command::Discover => run_discover(start),
            Command::Validate(opts) => run_validate(start, opts).await,
            Command::Export(opts) => run_export(start, opts),
            Command::Format(opts) => run_format(start, opts),
            Command::Organize(opts) => run_organize(start, opts),
            Command::Reset(opts) => run_reset(start, opts),
            Command::Remove(opts) => run_remove(start, opts),
            Command::Status => run_status(start),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize new trace repository.
    #[command(override_usage = "tracerepo init [options] [<path>]")]
    Init(InitOptions),

    /// Register new dataset files found in the data directory.
    #[command(override_usage = "tracerepo discover [options]")]
    Discover,

    /// Validate datasets against their schema.
    #[command(override_usage = "tracerepo validate [options]")]
    Validate(ValidateOptions),

    /// Export valid datasets.
    #[command(override_usage = "tracerepo export [options]")]
    Export(ExportOptions),

    /// Rewrite datasets as canonical GeoJSON.
    #[command(override_usage = "tracerepo format [options]")]
    Format(FormatOptions),

    /// Move datasets from the unorganized directory into the data tree.
    #[command(override_usage = "tracerepo organize [options]")]
    Organize(OrganizeOptions),

    /// Return datasets to the unvalidated state.
    #[command(override_usage = "tracerepo reset [options]")]
    Reset(ResetOptions),

    /// Remove datasets whose file no longer exists.
    #[command(override_usage = "tracerepo remove [options] <dataset>...")]
    Remove(RemoveOptions),

    /// Show validity of every registered dataset.
    #[command(override_usage = "tracerepo status [options]")]
    Status,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Directory to initialize, defaults to the current one.
    #[arg(value_name = "path")]
    pub path: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct FilterOptions {
    /// Only include areas whose name matches glob pattern.
    #[arg(short, long = "area", value_name = "glob")]
    pub areas: Vec<String>,

    /// Only include datasets carrying tag.
    #[arg(short, long = "tag", value_name = "tag")]
    pub tags: Vec<String>,
}

impl FilterOptions {
    fn selection(&self) -> Result<Selection> {
        Ok(Selection::try_new(&self.areas, self.tags.iter().cloned())?)
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ValidateOptions {
    #[command(flatten)]
    pub filter: FilterOptions,

    /// Only validate datasets that have not been validated yet.
    #[arg(short, long)]
    pub only_unvalidated: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExportOptions {
    /// Target export format, geojson or geojsonseq.
    #[arg(short, long, value_name = "format", default_value_t = ExportFormat::GeoJson)]
    pub format: ExportFormat,

    #[command(flatten)]
    pub filter: FilterOptions,

    /// Keep previous export, fail if one exists.
    #[arg(long)]
    pub no_overwrite: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FormatOptions {
    #[command(flatten)]
    pub filter: FilterOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct OrganizeOptions {
    /// Only report the moves that would be made.
    #[arg(short, long)]
    pub simulate: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ResetOptions {
    #[command(flatten)]
    pub filter: FilterOptions,

    /// Only reset datasets in validity state.
    #[arg(short, long, value_name = "validity")]
    pub validity: Option<Validity>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Remove without asking for confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Identities of datasets to remove.
    #[arg(required = true, value_name = "dataset")]
    pub datasets: Vec<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn open(start: PathBuf) -> Result<Repository> {
    let root = find_repo_root(start)?;
    Ok(Repository::open(root)?)
}

fn run_init(start: PathBuf, opts: InitOptions) -> Result<()> {
    let root = match opts.path {
        Some(path) => start.join(path),
        None => start,
    };
    Repository::init(root)?;

    Ok(())
}

fn run_discover(start: PathBuf) -> Result<()> {
    let repo = open(start)?;
    let mut database = repo.load_database()?;
    let inventory = repo.discover(&mut database)?;
    repo.write_database(&database)?;

    for (id, _) in &inventory.new {
        println!("new       {id}");
    }
    for id in &inventory.dangling {
        println!("dangling  {id}");
    }
    if inventory.is_quiet() {
        info!("nothing new to register");
    }

    Ok(())
}

async fn run_validate(start: PathBuf, opts: ValidateOptions) -> Result<()> {
    let repo = open(start)?;
    let mut selection = opts.filter.selection()?;
    if opts.only_unvalidated {
        selection = selection.with_validity([Validity::Unvalidated]);
    }

    let database = repo.load_database()?;
    let (database, report) = repo.cycle(database, &selection, ProgressBar::new(0)).await?;
    repo.write_database(&database)?;
    print!("{report}");

    let critical = report.critical();
    if !critical.is_empty() {
        bail!("{} datasets could not be loaded", critical.len());
    }

    Ok(())
}

fn run_export(start: PathBuf, opts: ExportOptions) -> Result<()> {
    let repo = open(start)?;
    let database = repo.load_database()?;
    let request = ExportRequest {
        format: opts.format,
        selection: opts.filter.selection()?,
        overwrite: !opts.no_overwrite,
    };

    let report = export(&repo, &database, &request, ProgressBar::new(0))?;
    print!("{report}");
    if report.has_failures() {
        bail!("{} datasets failed to export", report.failures.len());
    }

    Ok(())
}

fn run_format(start: PathBuf, opts: FormatOptions) -> Result<()> {
    let repo = open(start)?;
    let database = repo.load_database()?;
    let report = format(&repo, &database, &opts.filter.selection()?);
    print!("{report}");
    if report.has_failures() {
        bail!("{} datasets failed to format", report.failures.len());
    }

    Ok(())
}

fn run_organize(start: PathBuf, opts: OrganizeOptions) -> Result<()> {
    let repo = open(start)?;
    let mut database = repo.load_database()?;
    let report = organize(&repo, &database, opts.simulate)?;
    print!("{report}");

    // INVARIANT: Moved datasets are registered right away.
    if !opts.simulate && !report.moves.is_empty() {
        let inventory = repo.discover(&mut database)?;
        repo.write_database(&database)?;
        for (id, _) in &inventory.new {
            println!("new       {id}");
        }
    }

    Ok(())
}

fn run_reset(start: PathBuf, opts: ResetOptions) -> Result<()> {
    let repo = open(start)?;
    let mut database = repo.load_database()?;
    let selection = opts.filter.selection()?.with_validity(opts.validity);

    let selected = database.select(&selection);
    for id in &selected {
        database.reset(id)?;
    }
    repo.write_database(&database)?;
    info!("reset {} datasets", selected.len());

    Ok(())
}

fn run_remove(start: PathBuf, opts: RemoveOptions) -> Result<()> {
    let repo = open(start)?;
    let mut database = repo.load_database()?;

    let mut removed = 0;
    for id in opts.datasets.into_iter().map(DatasetId::new) {
        let Some(entry) = database.get(&id) else {
            warn!("dataset {id} is not registered");
            continue;
        };
        if !entry.is_dangling(repo.root()) {
            warn!("dataset {id} still has its file, refusing to remove");
            continue;
        }

        let confirmed = opts.yes
            || Confirm::new(&format!("remove dangling dataset {id}?"))
                .with_default(false)
                .prompt()?;
        if confirmed {
            database.remove_dangling(&id, repo.root())?;
            removed += 1;
        }
    }

    if removed > 0 {
        repo.write_database(&database)?;
    }

    Ok(())
}

fn run_status(start: PathBuf) -> Result<()> {
    let repo = open(start)?;
    let database: Database = repo.load_database()?;
    let inventory = discover(repo.root(), &repo.config().layout.data, &database)?;

    for (id, entry) in database.iter() {
        let state = if inventory.dangling.contains(id) {
            "dangling"
        } else {
            entry.validity.as_str()
        };
        println!("{state:<16}{id}");
    }
    for (id, _) in &inventory.new {
        println!("{:<16}{id}", "unregistered");
    }

    println!();
    for (validity, count) in database.counts() {
        println!("{:<16}{count:>8}", validity.as_str());
    }

    Ok(())
}
