//! Drives the build × machine × test matrix.
//!
//! Each triple runs through
//! `Pending -> Booting -> Running -> {Passed, Failed, Timeout, Error}` and
//! yields exactly one [`TestCase`]. The machine is shut down and unlocked on
//! every exit path once it has been locked. Without keep-going, the first
//! Timeout or Error stops the run; everything recorded so far is kept.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::builds::Build;
use crate::checkout::Checkout;
use crate::config::RunConfig;
use crate::console::{printable, trim_line_end, ConsoleLines};
use crate::error::{Error, Result};
use crate::machine::{Arch, Machine};
use crate::results::{current_user, Description, ResultCollector, ResultDir, RunReport, TestCase};
use crate::suite::Test;
use crate::timeout::{Guarded, TimeoutGuard};

pub const TIMEOUT_MESSAGE: &str = "Timeout while running test";
pub const EXCEPTION_MESSAGE: &str = "Exception while running test";
pub const PROCESSING_MESSAGE: &str = "Exception while processing results";

/// Non-terminal states of a test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Booting,
    Running,
}

/// Terminal state of a test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Timeout,
    Error(String),
}

impl Outcome {
    pub fn passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    /// Whether this outcome stops a run without keep-going.
    pub fn stops_run(&self) -> bool {
        matches!(self, Outcome::Timeout | Outcome::Error(_))
    }

    fn diagnostic(&self) -> String {
        match self {
            Outcome::Passed | Outcome::Failed => String::new(),
            Outcome::Timeout => TIMEOUT_MESSAGE.to_string(),
            Outcome::Error(msg) => msg.clone(),
        }
    }
}

/// Union of the architectures every machine needs built.
pub fn required_archs(machines: &[Box<dyn Machine>]) -> BTreeSet<Arch> {
    machines.iter().flat_map(|m| m.buildarchs()).collect()
}

/// Runs every (build, machine, test) triple in order.
pub struct Orchestrator {
    builds: Vec<Box<dyn Build>>,
    machines: Vec<Box<dyn Machine>>,
    tests: Vec<Box<dyn Test>>,
    checkout: Box<dyn Checkout>,
    keep_going: bool,
    results: ResultCollector,
}

impl Orchestrator {
    pub fn new(
        config: &RunConfig,
        builds: Vec<Box<dyn Build>>,
        machines: Vec<Box<dyn Machine>>,
        tests: Vec<Box<dyn Test>>,
        checkout: Box<dyn Checkout>,
    ) -> Self {
        Self {
            builds,
            machines,
            tests,
            checkout,
            keep_going: config.keep_going,
            results: ResultCollector::new(&config.results_dir),
        }
    }

    /// Execute the whole matrix.
    ///
    /// Configuration failures are returned as errors before any test runs;
    /// test failures are recorded in the report.
    pub async fn run(self) -> Result<RunReport> {
        let Self {
            mut builds,
            mut machines,
            tests,
            checkout,
            keep_going,
            mut results,
        } = self;

        let archs = required_archs(&machines);
        for build in builds.iter_mut() {
            info!(build = build.name(), archs = ?archs, "configuring build");
            build.configure(checkout.as_ref(), &archs).await?;
        }

        let revision = checkout.describe().await;
        let changes = checkout.changes().await;
        let context = RunContext {
            revision,
            changes,
            user: current_user(),
        };

        for build in &builds {
            info!(build = build.name(), "starting build");
            for machine in machines.iter_mut() {
                for test in &tests {
                    let span = info_span!(
                        "test",
                        test = test.name(),
                        machine = machine.name(),
                        build = build.name()
                    );
                    let outcome = run_one(
                        build.as_ref(),
                        machine.as_mut(),
                        test.as_ref(),
                        &context,
                        &mut results,
                    )
                    .instrument(span)
                    .await;

                    if outcome.stops_run() {
                        let diagnostic = outcome.diagnostic();
                        if !keep_going {
                            error!(test = test.name(), machine = machine.name(), "{diagnostic}");
                            return Ok(results.into_report(Some(diagnostic)));
                        }
                        error!(
                            test = test.name(),
                            machine = machine.name(),
                            "{diagnostic} (attempting to continue)"
                        );
                    }
                }
            }
        }

        info!("all done!");
        Ok(results.into_report(None))
    }
}

struct RunContext {
    revision: String,
    changes: Option<String>,
    user: String,
}

/// Console text captured so far, mirrored into `raw.txt`.
#[derive(Default)]
struct Transcript {
    text: String,
    raw: Option<File>,
}

impl Transcript {
    async fn push(&mut self, line: &str, at: Duration) -> Result<()> {
        trace!("[{}] {}", format_elapsed(at), printable(line));
        self.text.push_str(line);
        if let Some(raw) = self.raw.as_mut() {
            raw.write_all(line.as_bytes()).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(raw) = self.raw.as_mut() {
            raw.flush().await?;
        }
        Ok(())
    }
}

/// Result of the guarded console capture.
enum Capture {
    Finished,
    TimedOut,
}

/// Execute one triple and record its TestCase.
async fn run_one(
    build: &dyn Build,
    machine: &mut dyn Machine,
    test: &dyn Test,
    context: &RunContext,
    results: &mut ResultCollector,
) -> Outcome {
    info!("running test");
    let start = Instant::now();
    let mut transcript = Transcript::default();
    let mut phase = Phase::Pending;
    let mut result_dir = None;

    let (captured, elapsed) = match machine.lock().await {
        Ok(()) => {
            let body = boot_and_capture(
                build,
                &mut *machine,
                test,
                context,
                results,
                &mut transcript,
                &mut phase,
                &mut result_dir,
            )
            .await;
            let elapsed = start.elapsed();
            if let Err(err) = transcript.flush().await {
                warn!(error = %err, "failed to flush raw console capture");
            }
            // Released on every path, whatever the body did.
            let shutdown = machine.shutdown().await;
            let unlock = machine.unlock().await;
            let released = shutdown.and(unlock);
            if let (Err(_), Err(err)) = (&body, &released) {
                warn!(error = %err, "releasing the machine failed as well");
            }
            let captured = body
                .and_then(|capture| released.map(|()| capture))
                .map_err(|err| (phase, err));
            (captured, elapsed)
        }
        Err(err) => (Err((phase, err)), start.elapsed()),
    };
    debug!(elapsed = ?elapsed, "test complete, processing results");

    let outcome = match captured {
        Ok(Capture::TimedOut) => Outcome::Timeout,
        Ok(Capture::Finished) => classify(test, result_dir.as_ref(), &transcript.text),
        Err((phase, err)) => {
            debug!(phase = ?phase, error = %err, "test body failed");
            Outcome::Error(format!("{EXCEPTION_MESSAGE}: {err}"))
        }
    };
    let verdict = if outcome.passed() { "PASS" } else { "FAIL" };
    info!(result = verdict, "test finished");

    results.record(TestCase {
        name: test.name().to_string(),
        class: machine.name().to_string(),
        time_elapsed: elapsed.as_secs_f64(),
        stdout: transcript.text,
        stderr: outcome.diagnostic(),
        passed: outcome.passed(),
    });
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn boot_and_capture(
    build: &dyn Build,
    machine: &mut dyn Machine,
    test: &dyn Test,
    context: &RunContext,
    results: &ResultCollector,
    transcript: &mut Transcript,
    phase: &mut Phase,
    result_dir: &mut Option<ResultDir>,
) -> Result<Capture> {
    *phase = Phase::Booting;
    let dir = result_dir.insert(results.create_dir(test.name())?);
    dir.write_description(&Description {
        test: test.name().to_string(),
        revision: context.revision.clone(),
        build: build.name().to_string(),
        machine: machine.name().to_string(),
        start_time: Local::now(),
        user: context.user.clone(),
    })?;
    if let Some(diff) = &context.changes {
        dir.write_changes(diff)?;
    }
    transcript.raw = Some(File::create(dir.raw_path()).await?);

    let modules = test.get_modules(build, &*machine);
    machine.setup(build.build_dir(), &modules).await?;

    machine.reboot().await?;
    *phase = Phase::Running;
    let mut console = ConsoleLines::new(machine.get_output().await?);
    let guard = TimeoutGuard::new(machine.boot_timeout());
    debug!(timeout = ?guard.limit(), "capturing console output");

    let guarded = guard.run(read_until_finished(&mut console, test, transcript)).await;
    let result = match guarded {
        Guarded::Completed(read) => read.map(|()| {
            debug!("output complete");
            Capture::Finished
        }),
        Guarded::TimedOut => {
            warn!(timeout = ?guard.limit(), "finish condition not observed in time");
            // Output of an unterminated last line, e.g. a hung prompt.
            if let Some(partial) = console.take_pending() {
                if let Err(err) = transcript.push(&partial, guard.limit()).await {
                    warn!(error = %err, "failed to record partial console line");
                }
            }
            Ok(Capture::TimedOut)
        }
    };
    console.close();
    result
}

async fn read_until_finished(
    console: &mut ConsoleLines,
    test: &dyn Test,
    transcript: &mut Transcript,
) -> Result<()> {
    let started = Instant::now();
    while let Some(line) = console.next_line().await? {
        transcript.push(&line, started.elapsed()).await?;
        if test.is_finished(trim_line_end(&line)) {
            break;
        }
    }
    Ok(())
}

fn classify(test: &dyn Test, result_dir: Option<&ResultDir>, text: &str) -> Outcome {
    let Some(dir) = result_dir else {
        return Outcome::Error(format!("{PROCESSING_MESSAGE}: no result directory"));
    };
    let mut lines = text.lines();
    match test.process_data(dir.path(), &mut lines) {
        Ok(result) if result.passed() => Outcome::Passed,
        Ok(_) => Outcome::Failed,
        Err(err) => Outcome::Error(format!("{PROCESSING_MESSAGE}: {}", processing_error(err))),
    }
}

fn processing_error(err: Error) -> String {
    match err {
        Error::ResultProcessing(msg) => msg,
        other => other.to_string(),
    }
}

/// `H:MM:SS`, sub-second precision dropped.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_formatted_like_a_clock() {
        assert_eq!(format_elapsed(Duration::from_millis(999)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn only_timeout_and_error_stop_a_run() {
        assert!(!Outcome::Passed.stops_run());
        assert!(!Outcome::Failed.stops_run());
        assert!(Outcome::Timeout.stops_run());
        assert!(Outcome::Error("boom".into()).stops_run());
        assert_eq!(Outcome::Timeout.diagnostic(), TIMEOUT_MESSAGE);
        assert_eq!(Outcome::Failed.diagnostic(), "");
    }
}
