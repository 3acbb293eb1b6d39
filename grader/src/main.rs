use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use harness::{ExistingBuild, GitCheckout, MachineOptions, Orchestrator, Registry, RunConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grader", about = "Boot acceptance tests on victim machines")]
struct Cli {
    /// Source tree of the image under test
    #[arg(value_name = "SOURCEDIR", required_unless_present = "listall")]
    source_dir: Option<PathBuf>,

    /// Existing build directory; results go to BUILDDIR/results
    #[arg(value_name = "BUILDDIR", required_unless_present = "listall")]
    build_dir: Option<PathBuf>,

    /// Victim machines to use (glob, repeatable)
    #[arg(short, long = "machine", value_name = "MACHINE")]
    machines: Vec<String>,

    /// Tests to run (glob, repeatable)
    #[arg(short, long = "test", value_name = "TEST")]
    tests: Vec<String>,

    /// Attempt to continue on errors
    #[arg(short, long = "keepgoing")]
    keep_going: bool,

    /// List available builds, machines and tests
    #[arg(short = 'L', long)]
    listall: bool,

    /// Write the test cases of this run as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Serial device of locally attached boards
    #[arg(long, env = "GRADER_SERIAL_DEVICE", default_value = "/dev/ttyUSB0")]
    serial_device: PathBuf,

    /// Baud rate of the serial console
    #[arg(long, env = "GRADER_SERIAL_BAUD", default_value_t = 115_200)]
    baud: u32,

    /// More output (-v verbose, -vv console lines)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = Registry::builtin();
    if cli.listall {
        print!("{}", registry.list_all());
        return ExitCode::SUCCESS;
    }

    match run(cli, &registry).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, registry: &Registry) -> Result<bool> {
    let (Some(source_dir), Some(build_dir)) = (cli.source_dir, cli.build_dir) else {
        anyhow::bail!("source and build directory must be specified");
    };
    if cli.machines.is_empty() {
        anyhow::bail!("no machines specified");
    }
    if cli.tests.is_empty() {
        anyhow::bail!("no tests specified (try -t hello if unsure)");
    }

    let config = RunConfig::new(source_dir, build_dir, cli.keep_going)?;
    let options = MachineOptions {
        serial_device: cli.serial_device,
        baud_rate: cli.baud,
        ..MachineOptions::new(&config.source_dir, &config.build_dir)
    };

    let build = registry.create_build(ExistingBuild::NAME, &config.source_dir, &config.build_dir)?;
    let machines = registry.resolve_machines(&cli.machines, &options)?;
    let tests = registry.resolve_tests(&cli.tests)?;

    tracing::debug!(
        builds = build.name(),
        machines = %machines.iter().map(|m| m.name()).collect::<Vec<_>>().join(", "),
        tests = %tests.iter().map(|t| t.name()).collect::<Vec<_>>().join(", "),
        "resolved run"
    );

    let checkout = Box::new(GitCheckout::new(&config.source_dir));
    let report = Orchestrator::new(&config, vec![build], machines, tests, checkout)
        .run()
        .await?;

    if let Some(path) = &cli.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    let passed = report.testcases.iter().filter(|tc| tc.passed).count();
    tracing::info!(
        passed,
        total = report.testcases.len(),
        aborted = report.aborted.as_deref().unwrap_or("no"),
        "run complete"
    );
    Ok(report.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeatable_specs() {
        let cli = Cli::parse_from([
            "grader", "-m", "qemu*", "-m", "panda*", "-t", "hello", "-k", "src", "build",
        ]);
        assert_eq!(cli.machines, ["qemu*", "panda*"]);
        assert_eq!(cli.tests, ["hello"]);
        assert!(cli.keep_going);
        assert_eq!(cli.source_dir.unwrap(), PathBuf::from("src"));
    }

    #[test]
    fn listall_needs_no_directories() {
        let cli = Cli::parse_from(["grader", "-L"]);
        assert!(cli.listall);
        assert!(cli.source_dir.is_none());
    }

    #[test]
    fn directories_are_required_otherwise() {
        assert!(Cli::try_parse_from(["grader", "-m", "qemu_armv7"]).is_err());
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(Cli::parse_from(["grader", "-L"]).log_level(), "info");
        assert_eq!(Cli::parse_from(["grader", "-L", "-v"]).log_level(), "debug");
        assert_eq!(Cli::parse_from(["grader", "-L", "-vv"]).log_level(), "trace");
        assert_eq!(Cli::parse_from(["grader", "-L", "-q"]).log_level(), "warn");
    }
}
