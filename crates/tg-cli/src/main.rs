//! Trackguard CLI
//!
//! CLI tool for validating tracker databases, matching URLs and replaying
//! browser event traces through the request pipeline.

mod bench;
mod database;
mod simulate;

use std::path::Path;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use tg_compiler::{
    build_click2play_catalog, build_compatibility_catalog, build_surrogate_catalog, build_tracker_catalog,
    compile_tracker_db, fingerprint, optimize_db, parse_tracker_db, ListKind,
};

use crate::bench::{BenchMode, BenchOptions};
use crate::database::DatabasePaths;
use crate::simulate::SimulateOptions;

#[derive(Parser)]
#[command(name = "tg-cli")]
#[command(about = "Trackguard tracker database tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatabaseArgs {
    /// Tracker database (bugs.json)
    #[arg(short, long)]
    bugs: String,

    /// Compatibility database
    #[arg(long)]
    compatibility: Option<String>,

    /// Click-to-play database
    #[arg(long)]
    click2play: Option<String>,

    /// Surrogate database
    #[arg(long)]
    surrogates: Option<String>,

    /// Settings object (JSON)
    #[arg(long)]
    settings: Option<String>,
}

impl DatabaseArgs {
    fn paths(&self) -> DatabasePaths {
        DatabasePaths {
            bugs: self.bugs.clone(),
            compatibility: self.compatibility.clone(),
            click2play: self.click2play.clone(),
            surrogates: self.surrogates.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a database document
    Validate {
        /// Document to validate
        #[arg(short, long)]
        input: String,

        /// Document kind: bugs, compatibility, click2play, surrogates
        #[arg(short, long, default_value = "bugs")]
        kind: String,
    },

    /// Match a URL against a tracker database
    Match {
        /// Tracker database (bugs.json)
        #[arg(short, long)]
        bugs: String,

        /// Request URL
        url: String,

        /// Page URL, enables first-party exceptions
        #[arg(short, long)]
        page: Option<String>,
    },

    /// Replay a JSON-lines trace of browser events through the pipeline
    Simulate {
        #[command(flatten)]
        db: DatabaseArgs,

        /// Event trace (jsonl)
        #[arg(short, long)]
        trace: String,

        /// Print every request and panel refresh
        #[arg(short, long)]
        verbose: bool,
    },

    /// Benchmark matching and the before-request hook
    Bench {
        #[command(flatten)]
        db: DatabaseArgs,

        #[arg(long, value_enum, default_value_t = BenchMode::Both)]
        mode: BenchMode,

        #[arg(long, default_value_t = 100)]
        iterations: usize,

        #[arg(long, default_value_t = 10_000)]
        warmup_ops: usize,

        #[arg(long, default_value_t = 256)]
        sample_batch_ops: usize,

        /// Use the requests of a `simulate` trace instead of synthetic ones
        #[arg(long)]
        trace: Option<String>,

        #[arg(long, default_value_t = 200)]
        pages: usize,

        #[arg(long, default_value_t = 40)]
        reqs_per_page: usize,

        #[arg(long, default_value_t = bench::DEFAULT_SEED)]
        seed: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { input, kind } => cmd_validate(&input, &kind),
        Commands::Match { bugs, url, page } => cmd_match(&bugs, &url, page.as_deref()),
        Commands::Simulate { db, trace, verbose } => simulate::run_simulate(SimulateOptions {
            databases: db.paths(),
            settings_path: db.settings.clone(),
            trace_path: trace,
            verbose,
        }),
        Commands::Bench {
            db,
            mode,
            iterations,
            warmup_ops,
            sample_batch_ops,
            trace,
            pages,
            reqs_per_page,
            seed,
        } => bench::run_bench(BenchOptions {
            databases: db.paths(),
            settings_path: db.settings.clone(),
            mode,
            iterations,
            warmup_ops,
            sample_batch_ops,
            trace_path: trace,
            synthetic_pages: pages,
            synthetic_reqs_per_page: reqs_per_page,
            seed,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_validate(input: &str, kind: &str) -> Result<(), String> {
    let kind = ListKind::from_str(kind).ok_or_else(|| format!("Unknown database kind '{}'", kind))?;
    let data = database::read_document(Path::new(input))?;
    let start = Instant::now();

    match kind {
        ListKind::Trackers => {
            let mut db = parse_tracker_db(&data).map_err(|e| format!("Invalid tracker database: {}", e))?;
            let parse_time = start.elapsed();
            let trackers = db.trackers.len();
            let stats = optimize_db(&mut db);
            let catalog =
                compile_tracker_db(db, fingerprint(&data)).map_err(|e| format!("Invalid tracker database: {}", e))?;
            let built = catalog.stats();

            println!("Tracker database '{}' is valid", input);
            println!("  Version:      {}", display_version(catalog.version()));
            println!("  Fingerprint:  {:08x}", catalog.fingerprint());
            println!("  Trackers:     {} ({} with patterns)", trackers, built.trackers);
            println!(
                "  Patterns:     {} -> {} (dedupe removed {}, orphaned {})",
                stats.before, stats.after, stats.deduped, stats.orphaned
            );
            println!("    Host:       {}", built.host_patterns);
            println!("    Host+path:  {}", built.host_path_patterns);
            println!("    Path:       {}", built.path_patterns);
            println!("    Regex:      {}", built.regex_patterns);
            println!("  Exceptions:   {}", built.exceptions);
            println!(
                "  Time:         {:.1}ms (parse: {:.1}ms)",
                start.elapsed().as_secs_f64() * 1000.0,
                parse_time.as_secs_f64() * 1000.0
            );
        }
        ListKind::Compatibility => {
            let catalog = build_compatibility_catalog(&data).map_err(|e| format!("Invalid compatibility database: {}", e))?;
            println!("Compatibility database '{}' is valid", input);
            println!("  Version:      {}", display_version(catalog.version()));
            println!("  Trackers:     {}", catalog.len());
        }
        ListKind::ClickToPlay => {
            let catalog = build_click2play_catalog(&data).map_err(|e| format!("Invalid click2play database: {}", e))?;
            println!("Click-to-play database '{}' is valid", input);
            println!("  Version:      {}", display_version(catalog.version()));
            println!("  Trackers:     {}", catalog.len());
        }
        ListKind::Surrogates => {
            let catalog = build_surrogate_catalog(&data).map_err(|e| format!("Invalid surrogate database: {}", e))?;
            println!("Surrogate database '{}' is valid", input);
            println!("  Version:      {}", display_version(catalog.version()));
            println!("  Mappings:     {}", catalog.len());
        }
    }
    println!("  Size:         {} bytes", data.len());

    Ok(())
}

fn cmd_match(bugs: &str, url: &str, page: Option<&str>) -> Result<(), String> {
    let data = database::read_document(Path::new(bugs))?;
    let (catalog, _) = build_tracker_catalog(&data).map_err(|e| format!("Invalid tracker database: {}", e))?;

    let start = Instant::now();
    let found = catalog.match_url(url, None);
    let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;

    let Some(pattern) = found else {
        println!("{}: no tracker ({:.1}us)", url, elapsed_us);
        return Ok(());
    };

    match catalog.tracker_for(pattern) {
        Some(tracker) => println!(
            "{}: {} [{}] tracker {} pattern {} ({:.1}us)",
            url, tracker.name, tracker.category, tracker.id, pattern, elapsed_us
        ),
        None => println!("{}: pattern {} without tracker ({:.1}us)", url, pattern, elapsed_us),
    }

    if let Some(page) = page {
        if catalog.is_first_party_exception(pattern, page) {
            println!("  First-party exception on {}: not reported there", page);
        }
    }

    Ok(())
}

fn display_version(version: Option<u64>) -> String {
    version.map_or_else(|| "-".to_string(), |v| v.to_string())
}
