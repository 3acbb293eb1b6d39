//! Locally attached Pandaboard reached over a serial console.

use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rustix::fs::{flock, FlockOperation};
use rustix::io::Errno;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::pty::PtyPair;
use super::{build_arm_image, Arch, Machine, MachineOptions};
use crate::command::{check_cmd, find_tool};
use crate::console::ConsoleStream;
use crate::error::{Error, Result};
use crate::modules::Modules;

const IMAGE_NAME: &str = "armv7_omap44xx_image.bin";
const USBBOOT_TARGET: &str = "usbboot_panda";

/// Pandaboard ES whose serial port is attached to this host. Booted over
/// USB; the console is bridged through picocom.
pub struct Pandaboard {
    options: MachineOptions,
    build_dir: Option<PathBuf>,
    picocom: Option<Child>,
    /// Open lock file holding the board's advisory lock. The kernel drops
    /// the lock with the descriptor, including when the process dies.
    lock: Option<OwnedFd>,
}

impl Pandaboard {
    pub const NAME: &'static str = "pandaboard";
    pub const DESCRIPTION: &'static str =
        "Locally attached Pandaboard, console on a USB serial adapter";

    pub fn new(options: MachineOptions) -> Self {
        Self {
            options,
            build_dir: None,
            picocom: None,
            lock: None,
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.options
            .lock_dir
            .join(format!("grader-{}.lock", Self::NAME))
    }

    /// UUCP lock file picocom leaves behind for the serial device.
    fn uucp_lock_path(&self) -> Option<PathBuf> {
        let tty = self.options.serial_device.file_name()?;
        Some(Path::new("/var/lock").join(format!("LCK..{}", tty.to_string_lossy())))
    }

    async fn kill_picocom(&mut self) -> Result<()> {
        if let Some(mut picocom) = self.picocom.take() {
            debug!(pid = ?picocom.id(), "stopping picocom");
            picocom.kill().await?;
            if let Some(lock) = self.uucp_lock_path() {
                match tokio::fs::remove_file(&lock).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => warn!(path = %lock.display(), error = %err, "could not remove serial lock file"),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Machine for Pandaboard {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bootarch(&self) -> Arch {
        Arch::Armv7
    }

    fn platform(&self) -> &str {
        "omap44xx"
    }

    fn boot_timeout(&self) -> Duration {
        // Includes waiting for someone to press reset for the USB boot.
        Duration::from_secs(360)
    }

    async fn lock(&mut self) -> Result<()> {
        let path = self.lock_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {}
            Err(errno) if errno == Errno::WOULDBLOCK => {
                let holder = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                let holder = match holder.trim() {
                    "" => "another process".to_string(),
                    pid => format!("pid {pid}"),
                };
                return Err(Error::machine(
                    Self::NAME,
                    format!("already locked by {holder} ({})", path.display()),
                ));
            }
            Err(errno) => return Err(errno.into()),
        }
        file.set_len(0).await?;
        file.write_all(format!("{}\n", std::process::id()).as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), "locked machine");
        self.lock = Some(OwnedFd::from(file.into_std().await));
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        // The file itself stays: unlinking it races with a concurrent `lock`.
        if self.lock.take().is_some() {
            debug!(path = %self.lock_path().display(), "unlocked machine");
        }
        Ok(())
    }

    async fn setup(&mut self, build_dir: &Path, modules: &Modules) -> Result<()> {
        self.build_dir = Some(build_dir.to_path_buf());
        build_arm_image(build_dir, self.platform(), modules, IMAGE_NAME).await
    }

    async fn reboot(&mut self) -> Result<()> {
        self.kill_picocom().await?;
        let build_dir = self
            .build_dir
            .as_deref()
            .ok_or_else(|| Error::machine(Self::NAME, "reboot before setup"))?;
        info!(build_dir = %build_dir.display(), "usbbooting pandaboard; press reset");
        check_cmd("make", [USBBOOT_TARGET], build_dir).await
    }

    async fn get_output(&mut self) -> Result<ConsoleStream> {
        self.kill_picocom().await?;
        let picocom = find_tool("picocom")?;
        let pty = PtyPair::open()?;
        let (stdin, stdout) = pty.child_stdio()?;
        let child = Command::new(picocom)
            .arg("-b")
            .arg(self.options.baud_rate.to_string())
            .arg(&self.options.serial_device)
            .stdin(stdin)
            .stdout(stdout)
            .kill_on_drop(true)
            .spawn()?;
        debug!(pid = ?child.id(), device = %self.options.serial_device.display(), "picocom started");
        self.picocom = Some(child);
        Ok(Box::new(pty.into_console()?))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.kill_picocom().await
    }
}
