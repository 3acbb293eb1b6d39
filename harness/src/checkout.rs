//! Source checkout metadata recorded alongside every result.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::command::check_output;

/// Read-only view of the source tree under test.
#[async_trait]
pub trait Checkout: Send + Sync {
    /// Human readable revision identifier.
    async fn describe(&self) -> String;

    /// Uncommitted changes as a patch, if any.
    async fn changes(&self) -> Option<String>;
}

/// A git working tree.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    source_dir: PathBuf,
}

const UNKNOWN_REVISION: &str = "(unknown)";

impl GitCheckout {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    fn is_git(&self) -> bool {
        self.source_dir.join(".git").exists()
    }
}

#[async_trait]
impl Checkout for GitCheckout {
    async fn describe(&self) -> String {
        if !self.is_git() {
            return UNKNOWN_REVISION.to_string();
        }
        match check_output("git", ["describe", "--always", "--dirty"], &self.source_dir).await {
            Ok(out) => out.trim().to_string(),
            Err(err) => {
                warn!(error = %err, "could not describe source revision");
                UNKNOWN_REVISION.to_string()
            }
        }
    }

    async fn changes(&self) -> Option<String> {
        if !self.is_git() {
            return None;
        }
        match check_output("git", ["diff", "HEAD"], &self.source_dir).await {
            Ok(diff) if diff.trim().is_empty() => None,
            Ok(diff) => Some(diff),
            Err(err) => {
                warn!(error = %err, "could not collect source changes");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_directory_has_unknown_revision() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = GitCheckout::new(dir.path());
        assert_eq!(checkout.describe().await, "(unknown)");
        assert!(checkout.changes().await.is_none());
    }
}
