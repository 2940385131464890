mod report;

use report::ConsoleReporter;
use ripple_core::config::{ConfigError, RippleConfig};
use ripple_core::engine::{EngineConfig, GenerationEngine, RunOutcome};
use ripple_core::executor::{CommandExecutor, CommandExecutorConfig};
use ripple_core::selector::WeightedSelector;

use anyhow::Context;
use clap::Parser;
use log::info;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_FAILURE_FOUND: u8 = 2;

/// Mutation-based black-box fuzzer: feeds mutated inputs to a command's
/// stdin and reports every input that makes it exit with a non-zero status.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Command to fuzz, run through the platform shell
    command: Option<String>,
    /// Seed input to start fuzzing from
    #[clap(short, long)]
    seed_input: Option<String>,
    /// Number of duplicated seed inputs to start with
    #[clap(short = 'n', long)]
    count: Option<usize>,
    /// Number of mutation passes over the population
    #[clap(short, long)]
    passes: Option<u64>,
    /// Do not stop fuzzing on the first failure
    #[clap(short = 'f', long)]
    keep_going: bool,
    /// Comma-separated <mutator>:<weight> list, e.g. "insert_ascii_symbol:10,flip_bit:10"
    #[clap(short, long)]
    mutators: Option<String>,
    /// TOML configuration file (defaults to ./config.toml when present)
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Seed for the random source, for reproducible runs
    #[clap(long)]
    rng_seed: Option<u64>,
    /// Kill the target after this many milliseconds and record a failure
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Directory to run the target in
    #[clap(short = 'C', long)]
    working_dir: Option<PathBuf>,
}

/// Everything the fuzz loop needs, validated.
struct RunSetup {
    engine_config: EngineConfig,
    selector: WeightedSelector,
    executor_config: CommandExecutorConfig,
    rng_seed: u64,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG_ERROR)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let setup = match prepare(cli) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    fuzz(setup)
}

fn load_config(config_file: Option<PathBuf>) -> Result<RippleConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            RippleConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                RippleConfig::load_from_file(&default_config_path)
            } else {
                Ok(RippleConfig::default())
            }
        }
    }
}

fn prepare(cli: Cli) -> Result<RunSetup, anyhow::Error> {
    let mut config = load_config(cli.config_file)?;

    if let Some(seed_input) = cli.seed_input {
        config.fuzzer.seed_input = seed_input;
    }
    if let Some(count) = cli.count {
        config.fuzzer.count = count;
    }
    if let Some(passes) = cli.passes {
        config.fuzzer.passes = passes;
    }
    if cli.keep_going {
        config.fuzzer.stop_on_first_failure = false;
    }
    if let Some(mutators) = cli.mutators {
        config.fuzzer.mutators = Some(mutators);
    }
    if let Some(rng_seed) = cli.rng_seed {
        config.fuzzer.rng_seed = Some(rng_seed);
    }
    if let Some(command) = cli.command {
        config.executor.command = Some(command);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.executor.timeout_ms = Some(timeout_ms);
    }
    if let Some(working_dir) = cli.working_dir {
        config.executor.working_dir = Some(working_dir);
    }

    config.validate()?;
    log::debug!("Effective configuration: {config:#?}");

    let command = config
        .executor
        .command
        .clone()
        .ok_or(ConfigError::MissingCommand)?;
    check_target_exists(&command, config.executor.working_dir.as_deref())?;

    let selector = WeightedSelector::new(config.fuzzer.weights()?)
        .context("Invalid mutator weights")?;

    Ok(RunSetup {
        engine_config: config.fuzzer.engine_config(),
        selector,
        executor_config: CommandExecutorConfig {
            command: shell_command(&command),
            working_dir: config.executor.working_dir.clone(),
            timeout: config.executor.timeout(),
        },
        rng_seed: config
            .fuzzer
            .rng_seed
            .unwrap_or_else(|| rand::rng().random()),
    })
}

/// The program (first word of the command line) must exist relative to the
/// working directory or be found on `PATH`.
fn check_target_exists(command: &str, working_dir: Option<&Path>) -> Result<(), anyhow::Error> {
    let program = command
        .split_whitespace()
        .next()
        .ok_or(ConfigError::MissingCommand)?;
    let local = working_dir.unwrap_or(Path::new(".")).join(program);
    if local.exists() || which::which(program).is_ok() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Could not find command \"{program}\"."))
    }
}

fn shell_command(command: &str) -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd.exe".to_string(), "/c".to_string(), command.to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string(), command.to_string()]
    }
}

fn fuzz(setup: RunSetup) -> ExitCode {
    let executor = CommandExecutor::new(setup.executor_config);
    println!(
        "Running command: {:?} (rng seed {})\n",
        executor.config().command,
        setup.rng_seed
    );

    let rng = ChaCha8Rng::seed_from_u64(setup.rng_seed);
    let mut engine = GenerationEngine::new(setup.engine_config, setup.selector, executor, rng);
    let mut reporter = ConsoleReporter::new();
    info!(
        "Fuzzing {} passes starting from {} copies of {:?}",
        engine.config().passes,
        engine.population().len(),
        engine.config().seed_input
    );

    let start_time = Instant::now();
    let report = engine.run(&mut reporter);

    if let RunOutcome::Halted(_) = report.outcome {
        return ExitCode::from(EXIT_FAILURE_FOUND);
    }

    if let RunOutcome::Exhausted { pass } = report.outcome {
        println!("Population exhausted; stopped before pass {pass}.");
    }
    let summary = report.summary;
    println!("Fuzz loop finished in {:.2?}.", start_time.elapsed());
    println!(
        "Passes: {}, Total Executions: {}, Population: {}, Failures Found: {}, Harness Errors: {}",
        summary.passes_completed,
        summary.executions,
        summary.final_population,
        summary.failures,
        summary.harness_errors
    );
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_wraps_the_command_line() {
        let argv = shell_command("./target --flag");
        assert_eq!(argv.last().map(String::as_str), Some("./target --flag"));
        assert_eq!(argv.len(), 3);
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = check_target_exists("./definitely_not_here_4242", None).unwrap_err();
        assert!(err.to_string().contains("Could not find command"));
        assert!(check_target_exists("   ", None).is_err());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli::parse_from([
            "ripple", "-s", "ab", "-n", "1", "-p", "1", "-f", "-m", "reverse_all:1", "--rng-seed",
            "5", "sh",
        ]);
        let setup = prepare(cli).unwrap();
        assert_eq!(setup.engine_config.seed_input, "ab");
        assert_eq!(setup.engine_config.population_size, 1);
        assert_eq!(setup.engine_config.passes, 1);
        assert!(!setup.engine_config.stop_on_first_failure);
        assert_eq!(setup.selector.total_weight(), 1);
        assert_eq!(setup.rng_seed, 5);
    }

    #[test]
    fn unknown_mutator_is_a_config_error() {
        let cli = Cli::parse_from(["ripple", "-m", "explode:1", "sh"]);
        let err = prepare(cli).err().expect("unknown mutator must be rejected");
        assert!(err.to_string().contains("Unknown mutator: explode"));
    }
}
