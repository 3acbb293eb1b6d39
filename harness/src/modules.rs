//! Boot module lists and the `menu.lst` descriptor generated from them.

use std::fmt::Write as _;

/// One boot module: a path relative to the build tree plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub path: String,
    pub args: Vec<String>,
}

impl Module {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A physical memory region handed to the boot loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    pub base: u64,
    pub size: u64,
    pub kind: u32,
}

/// What to boot: kernel, modules and memory map of a victim machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modules {
    kernel: Option<Module>,
    modules: Vec<Module>,
    mmaps: Vec<MemoryMap>,
}

impl Modules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_kernel(&mut self, kernel: Module) -> &mut Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn add_module(&mut self, module: Module) -> &mut Self {
        self.modules.push(module);
        self
    }

    /// Replace the arguments of an already listed module; returns false if
    /// no module with that path is present.
    pub fn set_module_args<I, S>(&mut self, path: &str, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.modules.iter_mut().find(|m| m.path == path) {
            Some(module) => {
                module.args = args.into_iter().map(Into::into).collect();
                true
            }
            None => false,
        }
    }

    pub fn add_mmap(&mut self, base: u64, size: u64, kind: u32) -> &mut Self {
        self.mmaps.push(MemoryMap { base, size, kind });
        self
    }

    pub fn kernel(&self) -> Option<&Module> {
        self.kernel.as_ref()
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Render a GRUB-style `menu.lst`, with module paths under `prefix`.
    pub fn menu_data(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        let mut out = String::new();
        out.push_str("timeout 0\n");
        out.push_str("title Harness image\n");
        out.push_str("root (nd)\n");
        if let Some(kernel) = &self.kernel {
            let _ = writeln!(out, "kernel {}", entry(prefix, kernel));
        }
        for module in &self.modules {
            let _ = writeln!(out, "module {}", entry(prefix, module));
        }
        for mmap in &self.mmaps {
            let _ = writeln!(
                out,
                "mmap map {:#x} {:#x} {}",
                mmap.base, mmap.size, mmap.kind
            );
        }
        out
    }
}

fn entry(prefix: &str, module: &Module) -> String {
    let path = module.path.trim_start_matches('/');
    let mut line = format!("{prefix}/{path}");
    for arg in &module.args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_menu_lst() {
        let mut modules = Modules::new();
        modules
            .set_kernel(Module::new("armv7/sbin/cpu_a15ve").with_args(["loglevel=3"]))
            .add_module(Module::new("armv7/sbin/cpu_a15ve"))
            .add_module(Module::new("armv7/sbin/init"))
            .add_mmap(0x8000_0000, 0x4000_0000, 1);

        assert_eq!(
            modules.menu_data("/"),
            "timeout 0\n\
             title Harness image\n\
             root (nd)\n\
             kernel /armv7/sbin/cpu_a15ve loglevel=3\n\
             module /armv7/sbin/cpu_a15ve\n\
             module /armv7/sbin/init\n\
             mmap map 0x80000000 0x40000000 1\n"
        );
    }

    #[test]
    fn module_args_can_be_replaced() {
        let mut modules = Modules::new();
        modules.add_module(Module::new("armv7/sbin/hello"));
        assert!(modules.set_module_args("armv7/sbin/hello", ["a", "b"]));
        assert!(!modules.set_module_args("armv7/sbin/missing", ["x"]));
        assert_eq!(modules.modules()[0].args, vec!["a", "b"]);
        assert!(modules.menu_data("/boot/").contains("module /boot/armv7/sbin/hello a b\n"));
    }
}
