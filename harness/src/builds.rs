//! Compiled artifacts the victim machines boot.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::checkout::Checkout;
use crate::command::check_cmd;
use crate::error::{Error, Result};
use crate::machine::Arch;

/// A build tree, configured once per run before any test uses it.
#[async_trait]
pub trait Build: Send + Sync {
    fn name(&self) -> &str;

    fn build_dir(&self) -> &Path;

    /// Make sure the tree can produce images for every architecture in
    /// `archs`.
    async fn configure(&mut self, checkout: &dyn Checkout, archs: &BTreeSet<Arch>) -> Result<()>;
}

/// A build directory that already exists on disk.
#[derive(Debug, Clone)]
pub struct ExistingBuild {
    source_dir: PathBuf,
    build_dir: PathBuf,
}

impl ExistingBuild {
    pub const NAME: &'static str = "existing";

    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            build_dir: build_dir.into(),
        }
    }

    fn is_configured(&self) -> bool {
        self.build_dir.join("Makefile").is_file()
    }
}

#[async_trait]
impl Build for ExistingBuild {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    async fn configure(&mut self, checkout: &dyn Checkout, archs: &BTreeSet<Arch>) -> Result<()> {
        if self.is_configured() {
            debug!(build_dir = %self.build_dir.display(), "build already configured");
            return Ok(());
        }

        let revision = checkout.describe().await;
        info!(revision = %revision, archs = ?archs, "configuring build");
        let hake = self.source_dir.join("hake").join("hake.sh");
        let mut args = vec![
            "-s".to_string(),
            self.source_dir.to_string_lossy().into_owned(),
        ];
        for arch in archs {
            args.push("-a".to_string());
            args.push(arch.to_string());
        }
        check_cmd(&hake, &args, &self.build_dir)
            .await
            .map_err(|err| Error::BuildConfiguration {
                build: self.name().to_string(),
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::GitCheckout;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn configure_future_is_send() {
        let mut build = ExistingBuild::new("/nonexistent", "/nonexistent");
        let checkout = GitCheckout::new("/nonexistent");
        let archs = BTreeSet::from([Arch::Armv7]);
        let future = build.configure(&checkout, &archs);
        assert_send(&future);
    }

    #[tokio::test]
    async fn configured_tree_is_left_alone() {
        let build_dir = tempfile::tempdir().unwrap();
        std::fs::write(build_dir.path().join("Makefile"), "all:\n").unwrap();
        let mut build = ExistingBuild::new("/nonexistent", build_dir.path());
        let archs = BTreeSet::from([Arch::Armv7]);
        build
            .configure(&GitCheckout::new("/nonexistent"), &archs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_hake_is_a_build_configuration_error() {
        let source_dir = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let mut build = ExistingBuild::new(source_dir.path(), build_dir.path());
        let archs = BTreeSet::from([Arch::Armv7]);
        let err = build
            .configure(&GitCheckout::new(source_dir.path()), &archs)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BuildConfiguration { ref build, .. } if build == "existing"));
        assert!(err.is_fatal_configuration());
    }
}
