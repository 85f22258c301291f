//! kleuren-pipeline CLI Entry Point
//!
//! Builds and runs the kleuren pipeline over a directory of genomes.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./data/*.fasta, k = 9)
//! kleuren-pipeline
//!
//! # Settings from a YAML file, some overridden by flags
//! kleuren-pipeline pipeline.yaml --kmer-size 27 --parallel 8
//!
//! # Dry run mode (preview commands)
//! kleuren-pipeline --genome-dir /data/genomes --dry-run
//!
//! # Write a JSON run report
//! kleuren-pipeline pipeline.yaml --report run.json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use kleuren_pipeline::execution::Engine;
use kleuren_pipeline::pipeline::{build_workflow, discover_genomes, PipelineConfig};
use kleuren_pipeline::{APP_NAME, VERSION};

/// Command-line arguments; unset options keep the configuration's value.
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    jellyfish: Option<PathBuf>,
    kleuren: Option<PathBuf>,
    bft: Option<PathBuf>,
    genome_dir: Option<PathBuf>,
    genome_pattern: Option<String>,
    kmer_size: Option<u32>,
    min_colors: Option<u32>,
    max_depth: Option<u32>,
    max_parallel: Option<usize>,
    working_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
    dry_run: bool,
    fail_fast: bool,
    verbose: bool,
}

impl CliArgs {
    /// Applies the flags given on the command line over `config`.
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.jellyfish {
            config.jellyfish = path.clone();
        }
        if let Some(path) = &self.kleuren {
            config.kleuren = path.clone();
        }
        if let Some(path) = &self.bft {
            config.bft = path.clone();
        }
        if let Some(dir) = &self.genome_dir {
            config.genome_dir = dir.clone();
        }
        if let Some(pattern) = &self.genome_pattern {
            config.genome_pattern = pattern.clone();
        }
        if let Some(k) = self.kmer_size {
            config.kmer_size = k;
        }
        if let Some(n) = self.min_colors {
            config.min_colors = n;
        }
        if let Some(d) = self.max_depth {
            config.max_depth = d;
        }
        if let Some(n) = self.max_parallel {
            config.max_parallel = n;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("jellyfish / BFT / kleuren pipeline runner");
    println!();
}

fn print_usage() {
    println!("Usage: kleuren-pipeline [OPTIONS] [CONFIG_FILE]");
    println!();
    println!("Arguments:");
    println!("  [CONFIG_FILE]          Optional YAML pipeline configuration");
    println!();
    println!("Options:");
    println!("  --jellyfish PATH       Path to the jellyfish executable");
    println!("  --kleuren PATH         Path to the kleuren executable");
    println!("  --bft PATH             Path to the BFT executable");
    println!("  --genome-dir DIR       Directory containing the genomes");
    println!("  --genome-pattern EXT   Genome file extension, without dot (default: fasta)");
    println!("  -k, --kmer-size N      K-mer size, a multiple of 9 (default: 9)");
    println!("  --min-colors N         Minimum colors for a bubble (default: 1)");
    println!("  --max-depth N          Maximum bubble search depth (default: 30)");
    println!("  --parallel N           Maximum parallel jobs (default: 4)");
    println!("  --working-dir PATH     Set working directory for file operations");
    println!("  --report PATH          Write a JSON run report");
    println!("  --dry-run              Preview commands without execution");
    println!("  --fail-fast            Stop scheduling after the first failure");
    println!("  --verbose              Enable debug logging");
    println!("  --help                 Show this help message");
    println!("  --version              Show version information");
}

/// Takes the value following option `name`.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into a CliArgs struct.
fn parse_arguments(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => cli.dry_run = true,
            "--fail-fast" => cli.fail_fast = true,
            "--verbose" | "-v" => cli.verbose = true,
            "--jellyfish" => cli.jellyfish = Some(option_value(args, &mut i, arg)?.into()),
            "--kleuren" => cli.kleuren = Some(option_value(args, &mut i, arg)?.into()),
            "--bft" => cli.bft = Some(option_value(args, &mut i, arg)?.into()),
            "--genome-dir" => cli.genome_dir = Some(option_value(args, &mut i, arg)?.into()),
            "--genome-pattern" => {
                cli.genome_pattern = Some(option_value(args, &mut i, arg)?.to_string())
            }
            "--working-dir" => cli.working_dir = Some(option_value(args, &mut i, arg)?.into()),
            "--report" => cli.report_path = Some(option_value(args, &mut i, arg)?.into()),
            "-k" | "--kmer-size" => {
                cli.kmer_size = Some(parse_number(option_value(args, &mut i, arg)?, arg)?)
            }
            "--min-colors" => {
                cli.min_colors = Some(parse_number(option_value(args, &mut i, arg)?, arg)?)
            }
            "--max-depth" => {
                cli.max_depth = Some(parse_number(option_value(args, &mut i, arg)?, arg)?)
            }
            "--parallel" => {
                cli.max_parallel = Some(parse_number(option_value(args, &mut i, arg)?, arg)?)
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {}", other));
            }
            other => {
                if cli.config_path.is_some() {
                    return Err(format!("Unexpected argument: {}", other));
                }
                cli.config_path = Some(PathBuf::from(other));
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Validates and switches to the working directory.
fn setup_working_directory(
    working_dir: Option<&PathBuf>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(dir) = working_dir {
        if !dir.is_dir() {
            return Err(format!("Working directory does not exist: {}", dir.display()).into());
        }
        // Relative genome and tool paths resolve from here
        env::set_current_dir(dir)?;
    }

    let current = env::current_dir()?;
    info!("Working directory: {}", current.display());
    Ok(current)
}

/// Main application entry point; returns whether the run succeeded.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(cli.verbose);
    print_banner();

    let work_dir = setup_working_directory(cli.working_dir.as_ref())?;

    let mut config = match &cli.config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let genomes = discover_genomes(&config.genome_dir, &config.genome_pattern)?;
    for genome in &genomes.files {
        info!("  {}", genome.display());
    }

    let workflow = build_workflow(&config, &genomes)?.seal().map_err(|e| {
        error!("Invalid workflow: {}", e);
        e
    })?;

    let mut engine = Engine::new(workflow);
    engine.set_max_parallel(config.max_parallel);
    engine.set_working_dir(work_dir);
    engine.set_shell(config.shell.as_str());
    engine.set_fail_fast(config.fail_fast);

    if cli.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        for planned in engine.preview()? {
            println!();
            println!("[DRY RUN] Process: {} (layer {})", planned.name, planned.layer);
            println!("  Command: {}", planned.command);
            for output in &planned.outputs {
                println!("  Output {}: {}", output.port, output.path.display());
            }
        }
        return Ok(true);
    }

    let summary = engine.run();

    println!();
    println!("{}", summary.render());
    print!("{}", summary.timeline);
    if let Some(resources) = &summary.resources {
        println!();
        println!("{}", resources);
    }

    if let Some(path) = &cli.report_path {
        summary.save_json(path)?;
        info!("Run report written to {}", path.display());
    }

    if summary.success {
        println!("{}", "Workflow completed successfully".green().bold());
    } else {
        println!("{}", "Workflow failed".red().bold());
    }
    Ok(summary.success)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
