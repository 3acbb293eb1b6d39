use std::path::Path;

use super::{last_line_starts_with, Test, TestResult};
use crate::error::Result;

/// Basic boot test: the image must reach userspace and greet.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelloTest;

impl HelloTest {
    pub const NAME: &'static str = "hello";
    pub const DESCRIPTION: &'static str = "Basic boot test";
    pub const FINISH_STRING: &'static str = "Hello, world! from userspace";
}

impl Test for HelloTest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn get_finish_string(&self) -> Option<&str> {
        Some(Self::FINISH_STRING)
    }

    fn process_data(
        &self,
        _result_dir: &Path,
        lines: &mut dyn Iterator<Item = &str>,
    ) -> Result<TestResult> {
        Ok(last_line_starts_with(lines, Self::FINISH_STRING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishes_on_greeting_or_abort() {
        let test = HelloTest;
        assert!(test.is_finished("Hello, world! from userspace"));
        assert!(test.is_finished("Assertion failed on core 0 in init"));
        assert!(test.is_finished("Aborted"));
        assert!(!test.is_finished("init done"));
    }

    #[test]
    fn aborted_run_fails() {
        let lines = ["booting...", "Assertion failed on core 0"];
        let mut iter = lines.iter().copied();
        let result = HelloTest.process_data(Path::new("."), &mut iter).unwrap();
        assert!(!result.passed());
    }
}
