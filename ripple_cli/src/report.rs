use ripple_core::engine::Reporter;
use ripple_core::executor::ExecutorError;
use ripple_core::oracle::FailureReport;

/// Prints findings to stdout and harness errors to stderr as they happen.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        ConsoleReporter
    }
}

impl Reporter for ConsoleReporter {
    fn pass_started(&mut self, pass: u64, population: &[String]) {
        log::info!("Pass {pass}: {} candidates", population.len());
    }

    fn failure_found(&mut self, report: &FailureReport<String>) {
        println!("Found failure on attempt {}", report.attempt);
        println!("Input: {}", report.input);
        match report.exit_code {
            Some(code) => println!("Command failed with exit code {code}"),
            None => println!("Command failed: {}", report.description),
        }
        println!();
        println!("{}", format!("Output: {}", report.output).trim());
        println!();
        println!();
        log::debug!("Input MD5: {}", report.input_hash);
    }

    fn harness_error(&mut self, attempt: u64, input: &str, error: &ExecutorError) {
        eprintln!("Error while trying input: {input}");
        eprintln!("{error}");
        log::debug!("Harness error on attempt {attempt}");
    }

    fn pass_finished(&mut self, pass: u64, survivors: usize) {
        log::info!("Pass {pass} done, {survivors} survivors");
    }
}
