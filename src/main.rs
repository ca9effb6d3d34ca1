use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use colored::*;

use haversbench::config::{BenchConfig, OutputFormat};
use haversbench::error::random_scots_exclamation;
use haversbench::logging;
use haversbench::metrics::CountingAllocator;
use haversbench::BenchReport;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// haversbench - time the same sum called three different ways
#[derive(Parser)]
#[command(name = "haversbench")]
#[command(version = "0.1.0")]
#[command(about = "Benchmark native, precompiled an' ad-hoc script calls o' a memoized recurrence", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every strategy an' print the summary
    Run(RunArgs),

    /// Prepare an' validate every strategy without timin' anythin'
    Check {
        /// Recurrence input
        #[arg(long)]
        input: Option<i64>,

        /// JSON config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Timed invocations per strategy
    #[arg(short, long)]
    count: Option<usize>,

    /// Recurrence input
    #[arg(short, long)]
    input: Option<i64>,

    /// Recurrence cache capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Keep wan engine warm fer the native strategy
    #[arg(long)]
    reuse_engine: bool,

    /// Share wan executor across the script strategies
    #[arg(long)]
    shared_executor: bool,

    /// Skip the untimed validation call
    #[arg(long)]
    no_validate: bool,

    /// Print a JSON document instead o' the text summary
    #[arg(long)]
    json: bool,

    /// JSON config file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `mutter` or `blether,haversbench::runner=whisper`
    #[arg(long, value_name = "SPEC")]
    log: Option<String>,

    /// Append log lines tae a file instead o' stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run(args)) => run_bench(args),
        Some(Commands::Check { input, config }) => check(input, config),
        None => run_bench(RunArgs::default()),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{}: {}", random_scots_exclamation().red().bold(), e);
            process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BenchConfig, String> {
    match path {
        Some(path) => BenchConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(BenchConfig::default()),
    }
}

fn init_logging(spec: Option<&str>) -> Result<(), String> {
    logging::init_from_env()?;
    if let Some(spec) = spec {
        logging::set_filter(spec)?;
    }
    Ok(())
}

/// Returns `Ok(false)` when every strategy fell ower
fn run_bench(args: RunArgs) -> Result<bool, String> {
    let mut config = load_config(args.config.as_ref())?;

    if let Some(count) = args.count {
        config.count = count;
    }
    if let Some(input) = args.input {
        config.input = input;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    config.reuse_engine |= args.reuse_engine;
    config.shared_executor |= args.shared_executor;
    if args.no_validate {
        config.validate = false;
    }
    if args.json {
        config.format = OutputFormat::Json;
    }
    if args.log.is_some() {
        config.log = args.log;
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file;
    }

    init_logging(config.log.as_deref())?;

    let (input, count, format) = (config.input, config.count, config.format);
    let mut runner = config.into_runner();
    let report = runner.run_all(input, count).map_err(|e| e.to_string())?;

    match format {
        OutputFormat::Json => {
            let json = report.to_json().map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        OutputFormat::Text => print_report(&report),
    }

    Ok(!report.all_failed())
}

/// Colour the plain summary line by line
fn print_report(report: &BenchReport) {
    let rendered = report.render();
    let mut lines = rendered.lines();

    if let Some(header) = lines.next() {
        println!("{}", "═".repeat(60).yellow());
        println!("{}", format!("  haversbench: {}", header).yellow().bold());
        println!("{}", "═".repeat(60).yellow());
    }

    let mut in_failures = false;
    for line in lines {
        if line.starts_with("== ") {
            println!("{}", line.green().bold());
        } else if line == "Failures:" {
            in_failures = true;
            println!("{}", line.red().bold());
        } else if in_failures {
            println!("{}", line.red());
        } else if let Some(mean) = line.strip_prefix("Mean latency: ") {
            println!("Mean latency: {}", mean.cyan());
        } else {
            println!("{}", line);
        }
    }
}

fn check(input: Option<i64>, config: Option<PathBuf>) -> Result<bool, String> {
    let config = load_config(config.as_ref())?;
    init_logging(config.log.as_deref())?;

    let input = input.unwrap_or(config.input);
    let mut runner = config.into_runner();
    let mut all_ok = true;

    for outcome in runner.check(input) {
        match outcome.result {
            Ok(value) => println!(
                "{} {} gave {}",
                "Braw!".green().bold(),
                outcome.strategy,
                value
            ),
            Err(failure) => {
                all_ok = false;
                println!("{} {}", "Naw!".red().bold(), failure);
            }
        }
    }

    Ok(all_ok)
}
