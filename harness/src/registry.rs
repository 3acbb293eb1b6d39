//! Named machine, test and build variants, resolved from glob specs.

use std::fmt::Write as _;
use std::path::Path;

use globset::GlobBuilder;

use crate::builds::{Build, ExistingBuild};
use crate::error::{Error, Result};
use crate::machine::pandaboard::Pandaboard;
use crate::machine::qemu::QemuArmv7;
use crate::machine::{Machine, MachineOptions};
use crate::suite::boot::HelloTest;
use crate::suite::Test;

type MachineFactory = Box<dyn Fn(&MachineOptions) -> Box<dyn Machine> + Send + Sync>;
type TestFactory = Box<dyn Fn() -> Box<dyn Test> + Send + Sync>;
type BuildFactory = Box<dyn Fn(&Path, &Path) -> Box<dyn Build> + Send + Sync>;

struct Entry<F> {
    name: String,
    description: String,
    factory: F,
}

/// Every variant the harness knows, populated once at startup.
#[derive(Default)]
pub struct Registry {
    machines: Vec<Entry<MachineFactory>>,
    tests: Vec<Entry<TestFactory>>,
    builds: Vec<Entry<BuildFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in machines, tests and build types.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register_machine(QemuArmv7::NAME, QemuArmv7::DESCRIPTION, |opts| {
                Box::new(QemuArmv7::new(opts.clone()))
            })
            .register_machine(Pandaboard::NAME, Pandaboard::DESCRIPTION, |opts| {
                Box::new(Pandaboard::new(opts.clone()))
            })
            .register_test(HelloTest::NAME, HelloTest::DESCRIPTION, || Box::new(HelloTest))
            .register_build(
                ExistingBuild::NAME,
                "Build directory already on disk",
                |source, build| Box::new(ExistingBuild::new(source, build)),
            );
        registry
    }

    /// Register a machine variant. Names are unique; a later registration
    /// with an existing name replaces the earlier one.
    pub fn register_machine<F>(&mut self, name: &str, description: &str, factory: F) -> &mut Self
    where
        F: Fn(&MachineOptions) -> Box<dyn Machine> + Send + Sync + 'static,
    {
        let factory: MachineFactory = Box::new(factory);
        insert(&mut self.machines, name, description, factory);
        self
    }

    pub fn register_test<F>(&mut self, name: &str, description: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Test> + Send + Sync + 'static,
    {
        let factory: TestFactory = Box::new(factory);
        insert(&mut self.tests, name, description, factory);
        self
    }

    pub fn register_build<F>(&mut self, name: &str, description: &str, factory: F) -> &mut Self
    where
        F: Fn(&Path, &Path) -> Box<dyn Build> + Send + Sync + 'static,
    {
        let factory: BuildFactory = Box::new(factory);
        insert(&mut self.builds, name, description, factory);
        self
    }

    pub fn test_names(&self) -> Vec<&str> {
        self.tests.iter().map(|e| e.name.as_str()).collect()
    }

    /// Instantiate every machine matching any of `specs`, in spec order and
    /// without duplicates.
    pub fn resolve_machines(
        &self,
        specs: &[String],
        options: &MachineOptions,
    ) -> Result<Vec<Box<dyn Machine>>> {
        let entries = resolve(&self.machines, specs, "machines")?;
        Ok(entries.into_iter().map(|e| (e.factory)(options)).collect())
    }

    pub fn resolve_tests(&self, specs: &[String]) -> Result<Vec<Box<dyn Test>>> {
        let entries = resolve(&self.tests, specs, "tests")?;
        Ok(entries.into_iter().map(|e| (e.factory)()).collect())
    }

    pub fn create_build(&self, name: &str, source_dir: &Path, build_dir: &Path) -> Result<Box<dyn Build>> {
        self.builds
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.factory)(source_dir, build_dir))
            .ok_or_else(|| Error::Config(format!("unknown build type \"{name}\"")))
    }

    /// Human readable overview printed by `--listall`.
    pub fn list_all(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Build types:\t{}", names(&self.builds));
        let _ = writeln!(out, "Machines:\t{}", names(&self.machines));
        let _ = writeln!(out, "Tests:");
        for test in &self.tests {
            let _ = writeln!(out, "  {:<20} {}", test.name, test.description.trim());
        }
        out
    }
}

fn names<F>(entries: &[Entry<F>]) -> String {
    entries
        .iter()
        .map(|e| e.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert<F>(entries: &mut Vec<Entry<F>>, name: &str, description: &str, factory: F) {
    let entry = Entry {
        name: name.to_string(),
        description: description.to_string(),
        factory,
    };
    match entries.iter_mut().find(|e| e.name == name) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

fn resolve<'a, F>(entries: &'a [Entry<F>], specs: &[String], kind: &str) -> Result<Vec<&'a Entry<F>>> {
    if specs.is_empty() {
        return Err(Error::Config(format!("no {kind} specified")));
    }
    let mut matched: Vec<&Entry<F>> = Vec::new();
    for spec in specs {
        let glob = GlobBuilder::new(spec)
            .case_insensitive(true)
            .build()?
            .compile_matcher();
        let hits: Vec<&Entry<F>> = entries.iter().filter(|e| glob.is_match(&e.name)).collect();
        if hits.is_empty() {
            return Err(Error::Config(format!(
                "no {kind} match \"{spec}\" (try -L for a list)"
            )));
        }
        for hit in hits {
            if !matched.iter().any(|m| m.name == hit.name) {
                matched.push(hit);
            }
        }
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    fn options() -> MachineOptions {
        MachineOptions::new("/src", "/build")
    }

    #[test]
    fn glob_matching_is_case_insensitive() {
        let registry = Registry::builtin();
        let machines = registry
            .resolve_machines(&specs(&["QEMU*"]), &options())
            .unwrap();
        let names: Vec<&str> = machines.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["qemu_armv7"]);
    }

    #[test]
    fn overlapping_specs_do_not_duplicate() {
        let registry = Registry::builtin();
        let machines = registry
            .resolve_machines(&specs(&["pandaboard", "*", "qemu_armv7"]), &options())
            .unwrap();
        let names: Vec<&str> = machines.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["pandaboard", "qemu_armv7"]);
    }

    #[test]
    fn unmatched_spec_is_a_configuration_error() {
        let registry = Registry::builtin();
        let err = registry.resolve_tests(&specs(&["hello", "nope*"])).err().unwrap();
        assert!(err.is_fatal_configuration());
        assert!(err.to_string().contains("no tests match \"nope*\""));
    }

    #[test]
    fn empty_specs_are_rejected() {
        let registry = Registry::builtin();
        assert!(registry.resolve_tests(&[]).is_err());
        assert!(registry.resolve_machines(&[], &options()).is_err());
    }

    #[test]
    fn re_registration_replaces() {
        let mut registry = Registry::new();
        registry
            .register_test("hello", "first", || Box::new(HelloTest))
            .register_test("hello", "second", || Box::new(HelloTest));
        assert_eq!(registry.test_names(), ["hello"]);
        assert!(registry.list_all().contains("second"));
    }

    #[test]
    fn listing_names_everything() {
        let listing = Registry::builtin().list_all();
        assert!(listing.contains("Build types:\texisting\n"));
        assert!(listing.contains("Machines:\tqemu_armv7, pandaboard\n"));
        assert!(listing.contains("  hello                Basic boot test\n"));
    }

    #[test]
    fn unknown_build_type() {
        let registry = Registry::builtin();
        assert!(registry
            .create_build("release", Path::new("/src"), Path::new("/build"))
            .is_err());
        let build = registry
            .create_build("existing", Path::new("/src"), Path::new("/build"))
            .unwrap();
        assert_eq!(build.build_dir(), Path::new("/build"));
    }
}
