//! Emulated ARMv7 machine running under QEMU.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rustix::process::{kill_process, Pid, Signal};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::pty::{PtyConsole, PtyPair};
use super::{build_arm_image, Arch, Machine, MachineOptions};
use crate::command::find_tool;
use crate::console::ConsoleStream;
use crate::error::{Error, Result};
use crate::modules::Modules;
use crate::timeout::TimeoutGuard;

/// Relative to the source tree.
const QEMU_WRAPPER: &str = "tools/qemu-wrapper.sh";
const IMAGE_NAME: &str = "armv7_a15ve_image";
/// How long QEMU gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Uniprocessor ARMv7 QEMU.
pub struct QemuArmv7 {
    options: MachineOptions,
    kernel_img: Option<PathBuf>,
    child: Option<Child>,
    console: Option<PtyConsole>,
    scratch_dir: Option<TempDir>,
}

impl QemuArmv7 {
    pub const NAME: &'static str = "qemu_armv7";
    pub const DESCRIPTION: &'static str = "Uniprocessor ARMv7 QEMU";

    pub fn new(options: MachineOptions) -> Self {
        Self {
            options,
            kernel_img: None,
            child: None,
            console: None,
            scratch_dir: None,
        }
    }

    /// Per-run scratch directory, exported to the emulator as `TMPDIR`.
    pub fn scratch_dir(&mut self) -> Result<&Path> {
        let dir = match self.scratch_dir.take() {
            Some(dir) => dir,
            None => {
                let dir = tempfile::Builder::new().prefix("harness_qemu_").tempdir()?;
                debug!(path = %dir.path().display(), "created QEMU scratch directory");
                dir
            }
        };
        Ok(self.scratch_dir.insert(dir).path())
    }

    fn cmdline(&self) -> Result<(PathBuf, Vec<String>)> {
        let kernel_img = self
            .kernel_img
            .as_ref()
            .ok_or_else(|| Error::machine(Self::NAME, "reboot before setup: no image built"))?;
        let wrapper = find_tool(self.options.source_dir.join(QEMU_WRAPPER))?;
        let args = vec![
            "--arch".to_string(),
            self.platform().to_string(),
            "--image".to_string(),
            kernel_img.to_string_lossy().into_owned(),
        ];
        Ok((wrapper, args))
    }

    /// Terminate a running QEMU, escalating to SIGKILL after a grace period.
    async fn kill_child(&mut self) -> Result<()> {
        self.console = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(pid) = child.id().and_then(|id| Pid::from_raw(id as i32)) {
            debug!(pid = ?child.id(), "terminating QEMU");
            if let Err(errno) = kill_process(pid, Signal::TERM) {
                warn!(error = %errno, "SIGTERM to QEMU failed");
            }
        }
        match TimeoutGuard::new(TERMINATE_GRACE).wait_or_kill(&mut child).await {
            Ok(status) => debug!(%status, "QEMU exited"),
            Err(Error::Timeout(_)) => warn!("QEMU ignored SIGTERM and was killed"),
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

#[async_trait]
impl Machine for QemuArmv7 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bootarch(&self) -> Arch {
        Arch::Armv7
    }

    fn platform(&self) -> &str {
        "a15ve"
    }

    fn boot_timeout(&self) -> Duration {
        // Emulated boots are short; a hang should not hold up the run.
        Duration::from_secs(60)
    }

    async fn lock(&mut self) -> Result<()> {
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    async fn setup(&mut self, build_dir: &Path, modules: &Modules) -> Result<()> {
        self.kernel_img = Some(build_dir.join(IMAGE_NAME));
        build_arm_image(build_dir, self.platform(), modules, IMAGE_NAME).await
    }

    async fn reboot(&mut self) -> Result<()> {
        self.kill_child().await?;
        let (program, args) = self.cmdline()?;
        info!(command = %format!("{} {}", program.display(), args.join(" ")), "starting QEMU");

        let scratch = self.scratch_dir()?.to_path_buf();
        let pty = PtyPair::open()?;
        let (stdin, stdout) = pty.child_stdio()?;
        let child = Command::new(&program)
            .args(&args)
            .current_dir(&self.options.build_dir)
            .env("TMPDIR", &scratch)
            .stdin(stdin)
            .stdout(stdout)
            .kill_on_drop(true)
            .spawn()?;
        self.child = Some(child);
        self.console = Some(pty.into_console()?);
        Ok(())
    }

    async fn get_output(&mut self) -> Result<ConsoleStream> {
        let console = self
            .console
            .take()
            .ok_or_else(|| Error::machine(Self::NAME, "no console: machine is not running"))?;
        Ok(Box::new(console))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.kill_child().await?;
        if let Some(dir) = self.scratch_dir.take() {
            if let Err(err) = dir.close() {
                warn!(error = %err, "failed to remove QEMU scratch directory");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn machine() -> QemuArmv7 {
        QemuArmv7::new(MachineOptions::new("/src", "/build"))
    }

    #[tokio::test]
    async fn shutdown_without_reboot_is_harmless() {
        let mut qemu = machine();
        qemu.shutdown().await.unwrap();
        qemu.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reboot_before_setup_fails() {
        let mut qemu = machine();
        let err = qemu.reboot().await.unwrap_err();
        assert!(matches!(err, Error::Machine { .. }));
    }

    #[tokio::test]
    async fn no_console_while_stopped() {
        let mut qemu = machine();
        assert!(qemu.get_output().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_removes_scratch_dir() {
        let mut qemu = machine();
        let dir = qemu.scratch_dir().unwrap().to_path_buf();
        assert!(dir.is_dir());
        qemu.shutdown().await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn emulator_boots_armv7() {
        let qemu = machine();
        assert_eq!(qemu.buildarchs(), BTreeSet::from([Arch::Armv7]));
        assert_eq!(qemu.boot_timeout(), Duration::from_secs(60));
    }
}
