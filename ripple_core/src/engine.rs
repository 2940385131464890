use crate::config::{DEFAULT_SEED_INPUT, default_count, default_passes};
use crate::executor::{Executor, ExecutorError};
use crate::mutator::Mutator;
use crate::oracle::{ExitCodeOracle, FailureReport, Oracle};
use log::{debug, error, info, warn};
use rand::Rng;

/// Parameters of one fuzzing run. Read-only once the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub seed_input: String,
    /// Number of copies of the seed the first pass starts from.
    pub population_size: usize,
    pub passes: u64,
    /// Halt the whole run on the first failing execution instead of
    /// dropping the failing candidate and carrying on.
    pub stop_on_first_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_input: DEFAULT_SEED_INPUT.to_string(),
            population_size: default_count(),
            passes: default_passes(),
            stop_on_first_failure: true,
        }
    }
}

/// Receives progress and findings while the engine runs.
pub trait Reporter {
    fn pass_started(&mut self, _pass: u64, _population: &[String]) {}

    fn failure_found(&mut self, report: &FailureReport<String>);

    /// The target could not be driven for this input. The candidate is
    /// neither a survivor nor a failure.
    fn harness_error(&mut self, attempt: u64, input: &str, error: &ExecutorError);

    fn pass_finished(&mut self, _pass: u64, _survivors: usize) {}
}

/// A `Reporter` that only writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn pass_started(&mut self, pass: u64, population: &[String]) {
        info!("Pass {pass}: {} candidates", population.len());
    }

    fn failure_found(&mut self, report: &FailureReport<String>) {
        warn!(
            "Found failure on attempt {} ({}): {:?}",
            report.attempt, report.description, report.input
        );
    }

    fn harness_error(&mut self, attempt: u64, input: &str, error: &ExecutorError) {
        error!("Error while trying input {input:?} (attempt {attempt}): {error}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured pass ran.
    Completed,
    /// The population died out before `pass` could start.
    Exhausted { pass: u64 },
    /// A failure was found while stopping on the first failure.
    Halted(FailureReport<String>),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub passes_completed: u64,
    pub executions: u64,
    pub failures: u64,
    pub harness_errors: u64,
    pub final_population: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: RunSummary,
}

/// Evolves a population of candidate strings over a fixed number of passes.
///
/// Each pass mutates every candidate once, strips newlines, runs the target on
/// each result in order and keeps only the candidates the target accepted.
/// All run state lives here, including the single random source shared by
/// operator selection and the operators themselves.
pub struct GenerationEngine<M, E, R> {
    config: EngineConfig,
    mutator: M,
    executor: E,
    oracle: Box<dyn Oracle<String>>,
    rng: R,
    population: Vec<String>,
    attempt: u64,
    summary: RunSummary,
}

impl<M, E, R> GenerationEngine<M, E, R>
where
    M: Mutator<String, R>,
    E: Executor<String>,
    R: Rng,
{
    pub fn new(config: EngineConfig, mutator: M, executor: E, rng: R) -> Self {
        let population = vec![config.seed_input.clone(); config.population_size];
        Self {
            config,
            mutator,
            executor,
            oracle: Box::new(ExitCodeOracle::new()),
            rng,
            population,
            attempt: 0,
            summary: RunSummary::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: Box<dyn Oracle<String>>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn population(&self) -> &[String] {
        &self.population
    }

    /// Number of executions so far.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            executions: self.attempt,
            final_population: self.population.len(),
            ..self.summary.clone()
        }
    }

    /// Replaces every candidate with one mutation of itself.
    ///
    /// A candidate the chosen operator cannot handle (an index-based operator
    /// on an empty string) is carried over unchanged.
    pub fn mutate_population(&mut self) {
        let mutator = &mut self.mutator;
        let rng = &mut self.rng;
        self.population = self
            .population
            .iter()
            .map(|candidate| match mutator.mutate(candidate, rng) {
                Ok(mutated) => mutated,
                Err(e) => {
                    debug!("Keeping candidate {candidate:?} unchanged: {e}");
                    candidate.clone()
                }
            })
            .collect();
    }

    /// Removes embedded newlines so each candidate stays a single line of input.
    pub fn sanitize(&mut self) {
        for candidate in &mut self.population {
            candidate.retain(|c| c != '\n');
        }
    }

    /// Runs the target on every candidate in order and keeps the survivors.
    ///
    /// Returns the failure that halted the run, if any.
    pub fn execute_population(&mut self, reporter: &mut dyn Reporter) -> Option<FailureReport<String>> {
        let candidates = std::mem::take(&mut self.population);
        let mut survivors = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            self.attempt += 1;
            debug!("Attempt {}: {:?}", self.attempt, candidate);

            let output = match self.executor.execute_sync(&candidate) {
                Ok(output) => output,
                Err(e) => {
                    self.summary.harness_errors += 1;
                    reporter.harness_error(self.attempt, &candidate, &e);
                    continue;
                }
            };

            match self.oracle.examine(self.attempt, &candidate, &output) {
                None => survivors.push(candidate),
                Some(report) => {
                    self.summary.failures += 1;
                    reporter.failure_found(&report);
                    if self.config.stop_on_first_failure {
                        self.population = survivors;
                        return Some(report);
                    }
                }
            }
        }

        self.population = survivors;
        None
    }

    /// Runs one full pass. Returns the halting failure, if any.
    pub fn run_pass(&mut self, pass: u64, reporter: &mut dyn Reporter) -> Option<FailureReport<String>> {
        reporter.pass_started(pass, &self.population);
        self.mutate_population();
        self.sanitize();
        let halted = self.execute_population(reporter);
        if halted.is_none() {
            self.summary.passes_completed = pass;
            reporter.pass_finished(pass, self.population.len());
        }
        halted
    }

    /// Runs all configured passes.
    pub fn run(&mut self, reporter: &mut dyn Reporter) -> RunReport {
        for pass in 1..=self.config.passes {
            if self.population.is_empty() {
                info!("Population exhausted before pass {pass}");
                return self.finish(RunOutcome::Exhausted { pass });
            }
            if let Some(report) = self.run_pass(pass, reporter) {
                return self.finish(RunOutcome::Halted(report));
            }
        }
        self.finish(RunOutcome::Completed)
    }

    fn finish(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            summary: self.summary(),
        }
    }
}
