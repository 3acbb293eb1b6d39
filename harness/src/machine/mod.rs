//! Victim machines.
//!
//! A [`Machine`] is the capability set the orchestrator needs from a board
//! or emulator: exclusive access, boot preparation, power cycling and a
//! console stream. Variants:
//! - [`QemuArmv7`](qemu::QemuArmv7): emulated Cortex-A15 spawned as a local subprocess
//! - [`Pandaboard`](pandaboard::Pandaboard): physical board bridged over a serial console
//!
//! Both expose their console through a [`pty`] pair, so callers treat them
//! uniformly.

pub mod pandaboard;
pub mod pty;
pub mod qemu;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::command::check_cmd;
use crate::console::ConsoleStream;
use crate::error::{Error, Result};
use crate::modules::{Module, Modules};

/// Boot architectures a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    Armv7,
    Armv8,
    X86_64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::Armv7 => "armv7",
            Arch::Armv8 => "armv8",
            Arch::X86_64 => "x86_64",
        };
        f.write_str(name)
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "armv7" => Ok(Arch::Armv7),
            "armv8" => Ok(Arch::Armv8),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(Error::Config(format!("unknown architecture `{other}`"))),
        }
    }
}

/// Host-side settings shared by all machine variants.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Serial device the physical board's console is attached to.
    pub serial_device: PathBuf,
    pub baud_rate: u32,
    /// Where machine lock files are created.
    pub lock_dir: PathBuf,
}

impl MachineOptions {
    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            build_dir: build_dir.into(),
            serial_device: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 115_200,
            lock_dir: std::env::temp_dir(),
        }
    }
}

/// Boot and console lifecycle of one victim machine.
///
/// Per test the orchestrator calls `lock`, `setup`, `reboot`, `get_output`,
/// `shutdown`, `unlock`; `shutdown` and `unlock` run on every exit path.
#[async_trait]
pub trait Machine: Send {
    fn name(&self) -> &str;

    fn bootarch(&self) -> Arch;

    /// Architectures the build must be configured for.
    fn buildarchs(&self) -> BTreeSet<Arch> {
        BTreeSet::from([self.bootarch()])
    }

    /// Platform identifier used in image and menu file names.
    fn platform(&self) -> &str;

    /// Longest time allowed between reboot and a terminal test outcome.
    fn boot_timeout(&self) -> Duration;

    /// Modules every test boots on this machine unless it changes them.
    fn default_modules(&self) -> Modules {
        arm_default_modules(self.bootarch(), self.platform())
    }

    /// Acquire exclusive access to the machine.
    async fn lock(&mut self) -> Result<()>;

    async fn unlock(&mut self) -> Result<()>;

    /// Prepare boot artifacts for `modules` in `build_dir`.
    async fn setup(&mut self, build_dir: &Path, modules: &Modules) -> Result<()>;

    /// Power-cycle or relaunch the machine, replacing any running instance.
    async fn reboot(&mut self) -> Result<()>;

    /// Console output of the running machine.
    async fn get_output(&mut self) -> Result<ConsoleStream>;

    /// Stop the machine and release OS resources. Safe to call when
    /// `reboot` never ran or failed half-way.
    async fn shutdown(&mut self) -> Result<()>;
}

fn arm_default_modules(arch: Arch, platform: &str) -> Modules {
    let cpu = format!("{arch}/sbin/cpu_{platform}");
    let mut modules = Modules::new();
    modules
        .set_kernel(Module::new(cpu.clone()).with_args(["loglevel=3"]))
        .add_module(Module::new(cpu))
        .add_module(Module::new(format!("{arch}/sbin/init")))
        .add_mmap(0x8000_0000, 0x4000_0000, 1);
    modules
}

/// Write the boot menu for an ARM platform and build the image target.
pub(crate) async fn build_arm_image(
    build_dir: &Path,
    platform: &str,
    modules: &Modules,
    image: &str,
) -> Result<()> {
    let menu_lst = build_dir
        .join("platforms")
        .join("arm")
        .join(format!("menu.lst.armv7_{platform}"));
    debug!(path = %menu_lst.display(), "writing menu.lst");
    if let Some(parent) = menu_lst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&menu_lst, modules.menu_data("/")).await?;

    debug!(image, "building boot image");
    check_cmd("make", [image], build_dir).await
}
