//! Test case records and per-test result directories.
//!
//! Layout: `<builddir>/results/<timestamp>/<test>/` holding
//! `description.txt`, an optional `changes.patch` and `raw.txt`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const DESCRIPTION_FILE: &str = "description.txt";
pub const CHANGES_FILE: &str = "changes.patch";
pub const RAW_FILE: &str = "raw.txt";

/// Immutable record of one (build, machine, test) execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Machine the test ran on.
    pub class: String,
    /// Seconds.
    pub time_elapsed: f64,
    pub stdout: String,
    pub stderr: String,
    pub passed: bool,
}

/// Everything a run produced, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub testcases: Vec<TestCase>,
    /// False if any test failed or the run was cut short.
    pub success: bool,
    /// Set when a failure stopped the run before every triple executed.
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Metadata written to `description.txt`.
#[derive(Debug, Clone)]
pub struct Description {
    pub test: String,
    pub revision: String,
    pub build: String,
    pub machine: String,
    pub start_time: DateTime<Local>,
    pub user: String,
}

impl Description {
    fn render(&self) -> String {
        format!(
            "test: {}\nrevision: {}\nbuild: {}\nmachine: {}\nstart time: {}\nuser: {}\n",
            self.test,
            self.revision,
            self.build,
            self.machine,
            self.start_time.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.user,
        )
    }
}

/// Name of the user running the harness.
pub fn current_user() -> String {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// A result directory belonging to exactly one test execution.
#[derive(Debug, Clone)]
pub struct ResultDir {
    path: PathBuf,
}

impl ResultDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_path(&self) -> PathBuf {
        self.path.join(RAW_FILE)
    }

    pub fn write_description(&self, description: &Description) -> Result<()> {
        debug!(path = %self.path.display(), "writing description file");
        fs::write(self.path.join(DESCRIPTION_FILE), description.render())?;
        Ok(())
    }

    pub fn write_changes(&self, diff: &str) -> Result<()> {
        fs::write(self.path.join(CHANGES_FILE), diff)?;
        Ok(())
    }
}

/// Accumulates test cases and hands out result directories.
#[derive(Debug)]
pub struct ResultCollector {
    root: PathBuf,
    testcases: Vec<TestCase>,
}

impl ResultCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            testcases: Vec::new(),
        }
    }

    /// Create a fresh `<timestamp>/<test>` directory. A directory is never
    /// handed out twice: on collision the timestamp gets a numeric suffix.
    pub fn create_dir(&self, test: &str) -> Result<ResultDir> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut attempt = 0u32;
        loop {
            let stamp = match attempt {
                0 => timestamp.clone(),
                n => format!("{timestamp}-{n}"),
            };
            let parent = self.root.join(stamp);
            fs::create_dir_all(&parent)?;
            let path = parent.join(test);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "created result directory");
                    return Ok(ResultDir { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn record(&mut self, testcase: TestCase) {
        self.testcases.push(testcase);
    }

    pub fn all_passed(&self) -> bool {
        self.testcases.iter().all(|tc| tc.passed)
    }

    pub fn into_report(self, aborted: Option<String>) -> RunReport {
        let success = aborted.is_none() && self.all_passed();
        RunReport {
            testcases: self.testcases,
            success,
            aborted,
        }
    }
}
