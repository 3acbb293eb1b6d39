//! Tests: what to boot, when a run is over, and how to judge its output.

pub mod boot;

use std::path::Path;

use crate::builds::Build;
use crate::error::Result;
use crate::machine::Machine;
use crate::modules::Modules;

/// Lines that end a run early: the image crashed and will not print the
/// finish string.
const ABORT_MARKERS: [&str; 2] = ["Assertion failed on core", "Aborted"];

/// Verdict of a test's classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestResult {
    passed: bool,
}

impl TestResult {
    pub fn pass_fail(passed: bool) -> Self {
        Self { passed }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }
}

/// A boot test. Immutable once registered.
pub trait Test: Send + Sync {
    fn name(&self) -> &str;

    /// One-line documentation shown by `--listall`.
    fn description(&self) -> &str;

    /// Modules to boot. Must not have side effects.
    fn get_modules(&self, _build: &dyn Build, machine: &dyn Machine) -> Modules {
        machine.default_modules()
    }

    /// Marker whose appearance at the start of a line ends the run.
    fn get_finish_string(&self) -> Option<&str> {
        None
    }

    /// Whether capturing can stop after `line`.
    fn is_finished(&self, line: &str) -> bool {
        if let Some(finish) = self.get_finish_string() {
            if line.starts_with(finish) {
                return true;
            }
        }
        ABORT_MARKERS.iter().any(|marker| line.starts_with(marker))
    }

    /// Classify the captured console lines (terminators stripped).
    fn process_data(
        &self,
        result_dir: &Path,
        lines: &mut dyn Iterator<Item = &str>,
    ) -> Result<TestResult>;
}

/// Pass iff the last line received starts with `finish`. Earlier matches
/// do not count.
pub fn last_line_starts_with(lines: &mut dyn Iterator<Item = &str>, finish: &str) -> TestResult {
    let last = lines.last().unwrap_or("");
    TestResult::pass_fail(last.starts_with(finish))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(lines: &[&str]) -> bool {
        let mut iter = lines.iter().copied();
        last_line_starts_with(&mut iter, "Hello, world! from userspace").passed()
    }

    #[test]
    fn last_line_prefix_match() {
        assert!(classify(&["booting...", "init done", "Hello, world! from userspace"]));
        assert!(classify(&["booting...", "init done", "Hello, world! from userspace EXTRA"]));
        assert!(!classify(&["booting...", "init done", "kernel panic"]));
    }

    #[test]
    fn only_the_last_line_counts() {
        assert!(!classify(&["Hello, world! from userspace", "shutting down"]));
        assert!(!classify(&[]));
        assert!(!classify(&["  Hello, world! from userspace"]));
    }
}
