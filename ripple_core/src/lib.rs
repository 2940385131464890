pub mod config;
pub mod engine;
pub mod executor;
pub mod input;
pub mod mutator;
pub mod oracle;
pub mod selector;

pub use config::{ConfigError, RippleConfig, parse_weight_list};
pub use engine::{
    EngineConfig, GenerationEngine, LogReporter, Reporter, RunOutcome, RunReport, RunSummary,
};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, ExecutorError,
    InProcessExecutor, ProcessOutput,
};
pub use input::Input;
pub use mutator::{MutationError, MutationOperator, Mutator, default_weights};
pub use oracle::{ExitCodeOracle, FailureReport, Oracle};
pub use selector::{SelectorError, WeightedOperator, WeightedSelector};
