use crate::input::Input;
use log::{debug, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Appended to every input written to a target's stdin.
pub const LINE_TERMINATOR: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// Exit code reported by [`InProcessExecutor`] when the harness panics.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How often a running child is polled while a timeout is armed.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to wait for the stdin writer and output reader after killing a
/// timed-out child.
const OUTPUT_GRACE_AFTER_KILL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
}

/// What one execution of the target produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// stdout and stderr, interleaved as the target wrote them.
    pub output: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            return ExecutionStatus::Timeout;
        }
        match (self.exit_code, self.signal) {
            (Some(0), _) => ExecutionStatus::Ok,
            (Some(code), _) => ExecutionStatus::Crash(format!("Exited with code {code}")),
            (None, Some(signal)) => ExecutionStatus::Crash(format!("Terminated by signal {signal}")),
            (None, None) => ExecutionStatus::Crash("Exited abnormally".to_string()),
        }
    }

    /// The exit code to report, using the shell convention `128 + signal`
    /// for a child terminated by a signal.
    pub fn reported_exit_code(&self) -> Option<i32> {
        self.exit_code
            .or_else(|| self.signal.map(|signal| 128 + signal))
    }
}

/// Harness failures. These concern a single execution and never describe
/// the target's behavior.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("No command configured")]
    EmptyCommand,
    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("Failed to spawn command '{command:?}': {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },
    #[error("Child stdin was not available after piping")]
    StdinUnavailable,
    #[error("Failed to write to stdin: {0}")]
    StdinWrite(#[source] io::Error),
    #[error("Failed to read child output: {0}")]
    OutputRead(#[source] io::Error),
    #[error("Error waiting for child: {0}")]
    Wait(#[source] io::Error),
    #[error("Failed to kill timed-out process: {0}")]
    Kill(#[source] io::Error),
}

pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I) -> Result<ProcessOutput, ExecutorError>;
}

/// Runs a Rust function as the target. The function returns the exit code;
/// a panic is reported as [`PANIC_EXIT_CODE`] with the panic message as output.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]) -> i32,
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]) -> i32,
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: Fn(&[u8]) -> i32,
{
    fn execute_sync(&mut self, input: &I) -> Result<ProcessOutput, ExecutorError> {
        let result = catch_unwind(AssertUnwindSafe(|| (self.harness_fn)(input.as_bytes())));

        Ok(match result {
            Ok(exit_code) => ProcessOutput {
                exit_code: Some(exit_code),
                ..ProcessOutput::default()
            },
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ProcessOutput {
                    output: msg,
                    exit_code: Some(PANIC_EXIT_CODE),
                    ..ProcessOutput::default()
                }
            }
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandExecutorConfig {
    /// Program followed by its arguments. Shell wrapping is the caller's job.
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// `None` waits for the target indefinitely.
    pub timeout: Option<Duration>,
}

/// Spawns one child process per input, writes the input and a line
/// terminator to its stdin, and collects stdout and stderr as one stream.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    /// Starts the child with stdout and stderr sharing one pipe.
    ///
    /// On Unix the child leads a new process group, so a timeout can kill
    /// whatever the shell started along with the shell itself.
    fn spawn(&self) -> Result<(Child, io::PipeReader), ExecutorError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(ExecutorError::EmptyCommand)?;

        let (reader, writer) = io::pipe().map_err(ExecutorError::Pipe)?;
        let stderr_writer = writer.try_clone().map_err(ExecutorError::Pipe)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(stderr_writer);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;
        // The command keeps our copies of the write end; the reader only
        // sees end-of-stream once they are closed.
        drop(cmd);

        Ok((child, reader))
    }

    /// Writes the input line on its own thread so a target that never reads
    /// stdin cannot stall the caller past the timeout.
    fn spawn_writer(
        child: &mut Child,
        input: &[u8],
    ) -> Result<mpsc::Receiver<io::Result<()>>, ExecutorError> {
        let mut child_stdin = child.stdin.take().ok_or(ExecutorError::StdinUnavailable)?;
        let mut line = Vec::with_capacity(input.len() + LINE_TERMINATOR.len());
        line.extend_from_slice(input);
        line.extend_from_slice(LINE_TERMINATOR.as_bytes());

        let (written_tx, written_rx) = mpsc::channel();
        thread::spawn(move || {
            let written = child_stdin
                .write_all(&line)
                .and_then(|_| child_stdin.flush());
            // Closes the target's stdin.
            drop(child_stdin);
            let _ = written_tx.send(written);
        });
        Ok(written_rx)
    }

    fn check_written(written: io::Result<()>) -> Result<(), ExecutorError> {
        match written {
            Ok(()) => Ok(()),
            // The target exited (or closed stdin) without reading everything.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Target closed stdin before reading the whole input");
                Ok(())
            }
            Err(e) => Err(ExecutorError::StdinWrite(e)),
        }
    }

    /// Returns `None` if the child had to be killed because the deadline passed.
    fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>, ExecutorError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        debug!("Target timed out, killing its process group...");
                        Self::kill_process_tree(child).map_err(ExecutorError::Kill)?;
                        child.wait().map_err(ExecutorError::Wait)?;
                        return Ok(None);
                    }
                    thread::sleep(TIMEOUT_POLL_INTERVAL);
                }
                Err(e) => return Err(ExecutorError::Wait(e)),
            }
        }
    }

    #[cfg(unix)]
    fn kill_process_tree(child: &mut Child) -> io::Result<()> {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: `killpg` takes no pointers. The group leader is not reaped
        // yet, so its id still names the group created at spawn.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn kill_process_tree(child: &mut Child) -> io::Result<()> {
        child.kill()
    }

    fn kill_quietly(child: &mut Child) {
        if let Err(e) = Self::kill_process_tree(child) {
            warn!("Failed to kill child process: {e}");
        }
        let _ = child.wait();
    }
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(&mut self, input: &I) -> Result<ProcessOutput, ExecutorError> {
        let (mut child, mut reader) = self.spawn()?;
        let deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);

        let (output_tx, output_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = reader.read_to_end(&mut buf).map(|_| buf);
            let _ = output_tx.send(result);
        });

        let written_rx = match Self::spawn_writer(&mut child, input.as_bytes()) {
            Ok(rx) => rx,
            Err(e) => {
                Self::kill_quietly(&mut child);
                return Err(e);
            }
        };

        let exit_status = match deadline {
            Some(deadline) => Self::wait_until(&mut child, deadline)?,
            None => Some(child.wait().map_err(ExecutorError::Wait)?),
        };

        let raw_output = match exit_status {
            Some(_) => {
                let written = written_rx.recv().map_err(|_| {
                    ExecutorError::StdinWrite(io::Error::other("stdin writer ended without a result"))
                })?;
                Self::check_written(written)?;
                output_rx.recv().map_err(|_| {
                    ExecutorError::OutputRead(io::Error::other("output reader ended without a result"))
                })?
            }
            // With the group gone both pipes close at once, unless a
            // descendant moved itself into another group.
            None => {
                let _ = written_rx.recv_timeout(OUTPUT_GRACE_AFTER_KILL);
                output_rx
                    .recv_timeout(OUTPUT_GRACE_AFTER_KILL)
                    .unwrap_or_else(|_| {
                        warn!("Output pipe still open after killing the target, dropping its output");
                        Ok(Vec::new())
                    })
            }
        }
        .map_err(ExecutorError::OutputRead)?;

        let mut process_output = ProcessOutput {
            output: String::from_utf8_lossy(&raw_output).into_owned(),
            timed_out: exit_status.is_none(),
            ..ProcessOutput::default()
        };

        if let Some(status) = exit_status {
            process_output.exit_code = status.code();
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                process_output.signal = status.signal();
            }
        }

        Ok(process_output)
    }
}

#[cfg(test)]
mod in_process_executor_tests {
    use super::*;

    fn exit_code_harness(data: &[u8]) -> i32 {
        if data.first() == Some(&b'!') { 3 } else { 0 }
    }

    fn panicking_harness(data: &[u8]) -> i32 {
        if data.starts_with(b"crash") {
            panic!("Boom!");
        }
        0
    }

    #[test]
    fn in_process_executor_reports_exit_code() {
        let mut executor = InProcessExecutor::new(exit_code_harness);
        let ok = executor.execute_sync(&"fine".to_string()).unwrap();
        assert_eq!(ok.status(), ExecutionStatus::Ok);

        let failing = executor.execute_sync(&"!bad".to_string()).unwrap();
        assert_eq!(failing.exit_code, Some(3));
        assert_eq!(
            failing.status(),
            ExecutionStatus::Crash("Exited with code 3".to_string())
        );
    }

    #[test]
    fn in_process_executor_catches_panic() {
        let mut executor = InProcessExecutor::new(panicking_harness);
        let output = executor.execute_sync(&"crash now".to_string()).unwrap();
        assert_eq!(output.exit_code, Some(PANIC_EXIT_CODE));
        assert!(output.output.contains("Boom!"));
    }

    #[test]
    fn signal_is_reported_with_shell_convention() {
        let output = ProcessOutput {
            signal: Some(11),
            ..ProcessOutput::default()
        };
        assert_eq!(output.reported_exit_code(), Some(139));
        assert_eq!(
            output.status(),
            ExecutionStatus::Crash("Terminated by signal 11".to_string())
        );
    }
}

#[cfg(all(test, unix))]
mod command_executor_tests {
    use super::*;

    fn get_test_target_path(name: &str) -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.join("../test_targets").join(name)
    }

    fn sh_executor(script: &str, timeout: Option<Duration>) -> CommandExecutor {
        let target_path = get_test_target_path(script);
        if !target_path.exists() {
            panic!("Test target missing: {target_path:?}");
        }
        CommandExecutor::new(CommandExecutorConfig {
            command: vec!["sh".to_string(), target_path.to_str().unwrap().to_string()],
            working_dir: None,
            timeout,
        })
    }

    #[test]
    fn cmd_exec_successful_run_stdin() {
        let mut executor = sh_executor("test_target_ok.sh", None);
        let output = executor.execute_sync(&"hello".to_string()).unwrap();
        assert_eq!(output.status(), ExecutionStatus::Ok);
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn cmd_exec_merges_stdout_and_stderr() {
        let mut executor = sh_executor("test_target_echo.sh", None);
        let output = executor.execute_sync(&"ping".to_string()).unwrap();
        assert!(output.output.contains("out:ping"), "output: {:?}", output.output);
        assert!(output.output.contains("err:ping"), "output: {:?}", output.output);
    }

    #[test]
    fn cmd_exec_writes_exactly_one_line() {
        let mut executor = sh_executor("test_target_line_count.sh", None);
        let output = executor.execute_sync(&"a single line".to_string()).unwrap();
        assert_eq!(output.status(), ExecutionStatus::Ok, "output: {:?}", output.output);
    }

    #[test]
    fn cmd_exec_reports_non_zero_exit() {
        let mut executor = sh_executor("test_target_reject_z.sh", None);
        let ok = executor.execute_sync(&"abc".to_string()).unwrap();
        assert_eq!(ok.status(), ExecutionStatus::Ok);

        let rejected = executor.execute_sync(&"abZc".to_string()).unwrap();
        assert_eq!(rejected.exit_code, Some(1));
        assert!(rejected.output.contains("rejected"));
    }

    #[test]
    fn cmd_exec_target_ignoring_stdin_is_not_a_harness_error() {
        let mut executor = sh_executor("test_target_fail.sh", None);
        let big_input = "x".repeat(1 << 20);
        let output = executor.execute_sync(&big_input).unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[test]
    fn cmd_exec_crash_detection() {
        let mut executor = sh_executor("test_target_crash.sh", None);
        let output = executor.execute_sync(&String::new()).unwrap();
        match output.status() {
            ExecutionStatus::Crash(desc) => {
                // On Unix, exit 139 means killed by signal 11 (SIGSEGV)
                assert!(
                    desc.contains("code 139") || desc.contains("signal 11"),
                    "Unexpected crash desc: {desc}",
                );
            }
            status => panic!("Expected Crash status, got {status:?}"),
        }
        assert_eq!(output.reported_exit_code(), Some(139));
    }

    #[test]
    fn cmd_exec_timeout() {
        let mut executor = sh_executor("test_target_timeout.sh", Some(Duration::from_millis(100)));
        let started = Instant::now();
        let output = executor.execute_sync(&String::new()).unwrap();
        assert_eq!(output.status(), ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cmd_exec_timeout_with_unread_large_input() {
        let mut executor = sh_executor("test_target_timeout.sh", Some(Duration::from_millis(100)));
        let big_input = "x".repeat(1 << 20);
        let started = Instant::now();
        let output = executor.execute_sync(&big_input).unwrap();
        assert_eq!(output.status(), ExecutionStatus::Timeout);
        assert_eq!(output.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cmd_exec_timeout_kills_shell_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still_running");
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("sleep 1; touch '{}'", marker.display()),
            ],
            working_dir: None,
            timeout: Some(Duration::from_millis(100)),
        });

        let started = Instant::now();
        let output = executor.execute_sync(&String::new()).unwrap();
        assert_eq!(output.status(), ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "a descendant of the killed shell kept running");
    }

    #[test]
    fn cmd_exec_invalid_command() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec!["./this_command_does_not_exist_ever_12345.sh".to_string()],
            working_dir: None,
            timeout: Some(Duration::from_secs(1)),
        });
        match executor.execute_sync(&String::new()) {
            Err(ExecutorError::Spawn { command, .. }) => {
                assert_eq!(command[0], "./this_command_does_not_exist_ever_12345.sh");
            }
            other => panic!("Expected Spawn error for invalid command, got {other:?}"),
        }
    }

    #[test]
    fn cmd_exec_empty_command() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig::default());
        assert!(matches!(
            executor.execute_sync(&String::new()),
            Err(ExecutorError::EmptyCommand)
        ));
    }
}
