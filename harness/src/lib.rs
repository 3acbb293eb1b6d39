//! Boot acceptance testing for operating system images.
//!
//! The harness boots a build on a set of victim machines (QEMU instances or
//! boards behind a serial console), captures each console under a deadline,
//! classifies the output and records one [`TestCase`] per
//! (build, machine, test) triple.
//!
//! ```no_run
//! # async fn example() -> harness::Result<()> {
//! use harness::{GitCheckout, MachineOptions, Orchestrator, Registry, RunConfig};
//!
//! let config = RunConfig::new("src", "build", false)?;
//! let registry = Registry::builtin();
//! let options = MachineOptions::new(&config.source_dir, &config.build_dir);
//! let machines = registry.resolve_machines(&["qemu*".into()], &options)?;
//! let tests = registry.resolve_tests(&["hello".into()])?;
//! let build = registry.create_build("existing", &config.source_dir, &config.build_dir)?;
//! let checkout = Box::new(GitCheckout::new(&config.source_dir));
//!
//! let report = Orchestrator::new(&config, vec![build], machines, tests, checkout)
//!     .run()
//!     .await?;
//! println!("success: {}", report.success);
//! # Ok(())
//! # }
//! ```

pub mod builds;
pub mod checkout;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod machine;
pub mod modules;
pub mod orchestrator;
pub mod registry;
pub mod results;
pub mod suite;
pub mod timeout;

pub use builds::{Build, ExistingBuild};
pub use checkout::{Checkout, GitCheckout};
pub use config::RunConfig;
pub use console::ConsoleStream;
pub use error::{Error, Result};
pub use machine::{Arch, Machine, MachineOptions};
pub use modules::{Module, Modules};
pub use orchestrator::{Orchestrator, Outcome};
pub use registry::Registry;
pub use results::{ResultCollector, RunReport, TestCase};
pub use suite::{Test, TestResult};
pub use timeout::{Guarded, TimeoutGuard};
