//! Validated run configuration.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where to find sources and builds, and how to react to failures.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    /// `<build_dir>/results`
    pub results_dir: PathBuf,
    /// Record failures and continue instead of stopping the run.
    pub keep_going: bool,
}

impl RunConfig {
    /// Check the source and build directories and create the results
    /// directory if needed.
    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>, keep_going: bool) -> Result<Self> {
        let source_dir = source_dir.into();
        let build_dir = build_dir.into();

        if !source_dir.join("hake").is_dir() {
            return Err(Error::Config(format!(
                "invalid source directory {}",
                source_dir.display()
            )));
        }
        if !is_writable_dir(&build_dir) {
            return Err(Error::Config(format!(
                "invalid build directory {}",
                build_dir.display()
            )));
        }

        let results_dir = build_dir.join("results");
        std::fs::create_dir_all(&results_dir)?;

        Ok(Self {
            source_dir,
            build_dir,
            results_dir,
            keep_going,
        })
    }
}

fn is_writable_dir(path: &Path) -> bool {
    rustix::fs::access(path, rustix::fs::Access::WRITE_OK).is_ok() && path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_directories() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir(source.path().join("hake")).unwrap();
        let build = tempfile::tempdir().unwrap();

        let config = RunConfig::new(source.path(), build.path(), true).unwrap();
        assert!(config.results_dir.is_dir());
        assert_eq!(config.results_dir, build.path().join("results"));
        assert!(config.keep_going);
    }

    #[test]
    fn source_without_hake_is_rejected() {
        let source = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        let err = RunConfig::new(source.path(), build.path(), false).unwrap_err();
        assert!(err.to_string().contains("invalid source directory"));
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn missing_build_dir_is_rejected() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir(source.path().join("hake")).unwrap();
        let err = RunConfig::new(source.path(), source.path().join("missing"), false).unwrap_err();
        assert!(err.to_string().contains("invalid build directory"));
    }
}
