pub mod rusage;

use crossbeam_channel::bounded;
use log::{debug, info, warn};
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::matrix::command::{DeviceRole, ExecutionPlan, Invocation};

/// Time allowed for the playback side to open its device before capture starts
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(100);

/// Half-width of the accepted timing window in seconds
pub const DEFAULT_TOLERANCE_SECS: f64 = 0.1;

/// Device buffering makes a free-running subject take longer than requested
const BUFFERING_FACTOR: f64 = 1.5;
const STARTUP_SECS: f64 = 0.5;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long a timed run should take
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpectedDuration {
    /// Free-running loopback: `1.5 * d + 0.5` seconds
    Buffered(f64),
    /// Playback-only run: exactly `d` seconds
    Exact(f64),
}

impl ExpectedDuration {
    pub fn seconds(self) -> f64 {
        match self {
            ExpectedDuration::Buffered(secs) => secs * BUFFERING_FACTOR + STARTUP_SECS,
            ExpectedDuration::Exact(secs) => secs,
        }
    }

    /// Inclusive `[low, high]` window around the expected duration
    pub fn window(self, tolerance: f64) -> (f64, f64) {
        let expected = self.seconds();
        (expected - tolerance, expected + tolerance)
    }

    pub fn accepts(self, measured: f64, tolerance: f64) -> bool {
        let (low, high) = self.window(tolerance);
        measured >= low && measured <= high
    }
}

/// Why a run did not pass
#[derive(Debug)]
pub enum Failure {
    /// Process could not be started or waited on, and failure was not expected
    Launch { role: DeviceRole, error: io::Error },
    /// Exit status disagrees with the expectation
    ExitMismatch {
        role: DeviceRole,
        expected_failure: bool,
        status: String,
    },
    /// Measured duration outside the window
    Timing { measured: f64, low: f64, high: f64 },
    /// Killed after exceeding the process timeout
    Timeout { role: DeviceRole, timeout: Duration },
}

impl From<Failure> for HarnessError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Launch { role, error } => HarnessError::ProcessLaunch {
                role,
                source: error,
            },
            Failure::ExitMismatch {
                role,
                expected_failure,
                status,
            } => HarnessError::ProcessExitMismatch {
                role,
                expected_failure,
                status,
            },
            Failure::Timing {
                measured,
                low,
                high,
            } => HarnessError::TimingMismatch {
                measured,
                low,
                high,
            },
            Failure::Timeout { role, timeout } => HarnessError::ProcessTimeout { role, timeout },
        }
    }
}

/// Result of running one execution plan
#[derive(Debug)]
pub struct Verdict {
    /// Wall time minus children CPU time, when timing was checked
    pub measured: Option<f64>,
    pub expected: Option<f64>,
    pub passed: bool,
    pub failures: Vec<Failure>,
}

impl Verdict {
    /// Turn a failed verdict into the error that halts the suite
    pub fn into_result(mut self) -> Result<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        Err(self.failures.remove(0).into())
    }
}

/// How a single subject process ended
#[derive(Debug)]
enum ProcessOutcome {
    Exited(ExitStatus),
    Failed(io::Error),
    TimedOut(Duration),
}

/// Launches subject processes and classifies how they ended
#[derive(Debug, Clone)]
pub struct Orchestrator {
    grace_delay: Duration,
    tolerance: f64,
    timeout: Option<Duration>,
    verbose: bool,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            grace_delay: DEFAULT_GRACE_DELAY,
            tolerance: DEFAULT_TOLERANCE_SECS,
            timeout: None,
            verbose: false,
        }
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            grace_delay: Duration::from_millis(config.grace_delay_ms),
            tolerance: config.tolerance_secs,
            timeout: config.process_timeout_secs.map(Duration::from_secs_f64),
            verbose: config.verbose,
        }
    }

    pub fn with_grace_delay(mut self, grace_delay: Duration) -> Self {
        self.grace_delay = grace_delay;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Run `plan` to completion and classify the outcome.
    ///
    /// Every launched process must match `expect_failure`. When `timing`
    /// is given and failure is not expected, the measured duration must
    /// also fall inside the tolerance window. Errors are returned only for
    /// harness-side failures such as reading resource usage.
    pub fn run(
        &self,
        plan: &ExecutionPlan,
        expect_failure: bool,
        timing: Option<ExpectedDuration>,
    ) -> Result<Verdict> {
        let cpu_start = match timing {
            Some(_) => Some(rusage::children_user_time()?),
            None => None,
        };
        let wall_start = Instant::now();

        if self.verbose {
            println!("{}", ".".repeat(40));
        }
        let outcomes = match plan {
            ExecutionPlan::Single(invocation) => {
                let outcome = match self.spawn(invocation) {
                    Ok(child) => wait_child(child, self.timeout),
                    Err(e) => ProcessOutcome::Failed(e),
                };
                vec![(invocation.role, outcome)]
            }
            ExecutionPlan::Pair { playback, capture } => self.run_pair(playback, capture),
        };
        if self.verbose {
            println!("{}", ".".repeat(40));
        }

        let wall = wall_start.elapsed();
        let measured = match cpu_start {
            Some(cpu_start) => {
                let cpu = rusage::children_user_time()?.saturating_sub(cpu_start);
                Some(wall.as_secs_f64() - cpu.as_secs_f64())
            }
            None => None,
        };

        let mut failures: Vec<Failure> = outcomes
            .into_iter()
            .filter_map(|(role, outcome)| classify(role, outcome, expect_failure))
            .collect();

        if let (Some(expected), Some(measured)) = (timing, measured) {
            if failures.is_empty() && !expect_failure && !expected.accepts(measured, self.tolerance)
            {
                let (low, high) = expected.window(self.tolerance);
                failures.push(Failure::Timing {
                    measured,
                    low,
                    high,
                });
            }
        }

        for failure in &failures {
            warn!("Run failed: {:?}", failure);
        }

        Ok(Verdict {
            measured,
            expected: timing.map(ExpectedDuration::seconds),
            passed: failures.is_empty(),
            failures,
        })
    }

    /// Start playback, give it the grace delay, then start capture.
    /// Each process is launched and waited on by its own worker thread, so
    /// no child exists before the thread that owns it does.
    fn run_pair(
        &self,
        playback: &Invocation,
        capture: &Invocation,
    ) -> Vec<(DeviceRole, ProcessOutcome)> {
        let (tx, rx) = bounded(2);
        let mut workers = Vec::new();

        for (index, invocation) in [playback, capture].into_iter().enumerate() {
            if index > 0 {
                thread::sleep(self.grace_delay);
            }
            let role = invocation.role;
            let (launched_tx, launched_rx) = bounded(1);
            let worker_tx = tx.clone();
            let orchestrator = self.clone();
            let invocation = invocation.clone();

            let spawned = thread::Builder::new()
                .name(format!("single_{}", role))
                .spawn(move || {
                    let child = orchestrator.spawn(&invocation);
                    let _ = launched_tx.send(());
                    let outcome = match child {
                        Ok(child) => wait_child(child, orchestrator.timeout),
                        Err(e) => ProcessOutcome::Failed(e),
                    };
                    let _ = worker_tx.send((index, role, outcome));
                });
            match spawned {
                Ok(handle) => {
                    // capture must not start before playback is launched
                    let _ = launched_rx.recv();
                    workers.push(handle);
                }
                Err(e) => {
                    let _ = tx.send((index, role, ProcessOutcome::Failed(e)));
                }
            }
        }
        drop(tx);

        let mut outcomes: Vec<_> = rx.iter().collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("Process worker panicked");
            }
        }

        outcomes.sort_by_key(|(index, _, _)| *index);
        outcomes
            .into_iter()
            .map(|(_, role, outcome)| (role, outcome))
            .collect()
    }

    fn spawn(&self, invocation: &Invocation) -> io::Result<Child> {
        debug!("Launching {} process: {}", invocation.role, invocation);
        let stdout = if self.verbose {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .spawn()
    }
}

fn wait_child(mut child: Child, timeout: Option<Duration>) -> ProcessOutcome {
    let Some(timeout) = timeout else {
        return match child.wait() {
            Ok(status) => ProcessOutcome::Exited(status),
            Err(e) => ProcessOutcome::Failed(e),
        };
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return ProcessOutcome::Exited(status),
            Ok(None) if Instant::now() >= deadline => {
                warn!("Killing process {} after {:?}", child.id(), timeout);
                let _ = child.kill();
                let _ = child.wait();
                return ProcessOutcome::TimedOut(timeout);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return ProcessOutcome::Failed(e),
        }
    }
}

/// `None` when the outcome matches the expectation
fn classify(role: DeviceRole, outcome: ProcessOutcome, expect_failure: bool) -> Option<Failure> {
    match outcome {
        ProcessOutcome::TimedOut(timeout) => Some(Failure::Timeout { role, timeout }),
        ProcessOutcome::Failed(error) if !expect_failure => Some(Failure::Launch { role, error }),
        ProcessOutcome::Failed(error) => {
            info!("{} process failed as expected: {}", role, error);
            None
        }
        ProcessOutcome::Exited(status) if status.success() == expect_failure => {
            let status = if status.success() {
                "exited successfully".to_string()
            } else {
                format!("failed with {}", status)
            };
            Some(Failure::ExitMismatch {
                role,
                expected_failure: expect_failure,
                status,
            })
        }
        ProcessOutcome::Exited(status) => {
            debug!("{} process {}", role, status);
            None
        }
    }
}
