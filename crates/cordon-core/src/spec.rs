//! Sandbox specification
//!
//! [`SandboxSpec`] accumulates the description of one sandbox instance and
//! serializes it into the argument vector the enforcement binary parses.
//! Nothing is validated here; a source path that does not exist or a
//! cgroup that was never created is the enforcement binary's problem and
//! surfaces as its non-zero exit.

use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// A file exposed into the sandbox filesystem view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMapping {
    /// Path on the host
    pub source: PathBuf,
    /// Path inside the sandbox
    pub destination: PathBuf,
    /// Also resolve and expose the shared libraries the file links against
    pub with_shared_libs: bool,
}

/// A directory mounted into the sandbox filesystem view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirMapping {
    /// Path on the host
    pub source: PathBuf,
    /// Path inside the sandbox
    pub destination: PathBuf,
}

/// Accumulated configuration for one sandbox instance
///
/// Built once through the chainable mutators, then read any number of
/// times by [`build_arguments`](Self::build_arguments). File, directory,
/// and environment entries keep insertion order because the enforcement
/// binary applies them sequentially. Optional fields use the zero value
/// ("" / 0) as the unset sentinel and are omitted from the serialized
/// invocation entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSpec {
    root: PathBuf,
    files: Vec<FileMapping>,
    mount_dirs: Vec<DirMapping>,
    env: Vec<String>,
    no_new_net: bool,
    cgroup: String,
    cpuset: String,
    memory_limit: u64,
    usage_stats: PathBuf,
    exec_dir: PathBuf,
}

impl SandboxSpec {
    /// Create a spec for the sandbox rooted at `root`
    ///
    /// The root is fixed for the lifetime of the spec; everything else
    /// starts unset.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
            mount_dirs: Vec::new(),
            env: Vec::new(),
            no_new_net: false,
            cgroup: String::new(),
            cpuset: String::new(),
            memory_limit: 0,
            usage_stats: PathBuf::new(),
            exec_dir: PathBuf::new(),
        }
    }

    /// Filesystem root the enforcement binary manages for this instance
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expose a file inside the sandbox
    ///
    /// With `with_shared_libs` the enforcement binary also exposes the
    /// dynamic libraries the file needs. Duplicate destinations are not
    /// checked here and are left for the enforcement binary to reject.
    #[must_use]
    pub fn add_file(
        mut self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        with_shared_libs: bool,
    ) -> Self {
        self.files.push(FileMapping {
            source: source.into(),
            destination: destination.into(),
            with_shared_libs,
        });
        self
    }

    /// Mount a directory inside the sandbox
    #[must_use]
    pub fn mount_dir(
        mut self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        self.mount_dirs.push(DirMapping {
            source: source.into(),
            destination: destination.into(),
        });
        self
    }

    /// Append a raw `KEY=VALUE` environment assignment
    ///
    /// The token is passed through verbatim; its shape is the caller's
    /// responsibility.
    #[must_use]
    pub fn env(mut self, assignment: impl Into<String>) -> Self {
        self.env.push(assignment.into());
        self
    }

    /// Deny the sandboxed process any new network access
    #[must_use]
    pub fn no_new_net(mut self, deny: bool) -> Self {
        self.no_new_net = deny;
        self
    }

    /// Control group to place the sandboxed process in
    #[must_use]
    pub fn cgroup(mut self, name: impl Into<String>) -> Self {
        self.cgroup = name.into();
        self
    }

    /// CPU affinity list, e.g. `"1,2"`
    #[must_use]
    pub fn cpuset(mut self, cpus: impl Into<String>) -> Self {
        self.cpuset = cpus.into();
        self
    }

    /// Memory limit in bytes
    ///
    /// Zero means unset; a genuine zero-byte limit is not representable.
    #[must_use]
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Memory limit in megabytes
    #[must_use]
    pub fn memory_limit_mb(self, mb: u64) -> Self {
        self.memory_limit(mb * 1024 * 1024)
    }

    /// Write usage statistics to `path` after the sandbox exits
    #[must_use]
    pub fn usage_stats(mut self, path: impl Into<PathBuf>) -> Self {
        self.usage_stats = path.into();
        self
    }

    /// Working directory for the target program inside the sandbox
    #[must_use]
    pub fn exec_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_dir = path.into();
        self
    }

    /// Serialize the spec into the enforcement binary's argument vector,
    /// followed by `--` and the target program invocation
    ///
    /// The enforcement binary's flag parser is positional, so the emission
    /// order here is a wire contract: root first, then file mappings,
    /// directory mounts, and environment tokens in insertion order, then
    /// the scalar flags, each omitted entirely while unset. Target
    /// arguments are appended verbatim as discrete tokens; no shell is
    /// ever involved.
    ///
    /// Pure and deterministic: repeated calls against an unmutated spec
    /// produce identical vectors.
    pub fn build_arguments<S>(
        &self,
        program: impl AsRef<OsStr>,
        args: impl IntoIterator<Item = S>,
    ) -> Vec<OsString>
    where
        S: AsRef<OsStr>,
    {
        let mut argv: Vec<OsString> = vec![self.root.clone().into_os_string()];

        for file in &self.files {
            argv.push(if file.with_shared_libs {
                "--add_elf_file".into()
            } else {
                "--add_file".into()
            });
            argv.push(file.source.clone().into_os_string());
            argv.push(file.destination.clone().into_os_string());
        }

        for dir in &self.mount_dirs {
            argv.push("--mount_dir".into());
            argv.push(dir.source.clone().into_os_string());
            argv.push(dir.destination.clone().into_os_string());
        }

        for assignment in &self.env {
            argv.push("--env".into());
            argv.push(assignment.clone().into());
        }

        if self.no_new_net {
            argv.push("--no_new_net".into());
        }

        if !self.cgroup.is_empty() {
            argv.push("--cgroup".into());
            argv.push(self.cgroup.clone().into());
        }

        if !self.cpuset.is_empty() {
            argv.push("--cpuset".into());
            argv.push(self.cpuset.clone().into());
        }

        if self.memory_limit != 0 {
            argv.push("--mem_limit".into());
            argv.push(self.memory_limit.to_string().into());
        }

        if !self.usage_stats.as_os_str().is_empty() {
            argv.push("--save_usage_stat".into());
            argv.push(self.usage_stats.clone().into_os_string());
        }

        if !self.exec_dir.as_os_str().is_empty() {
            argv.push("--exec_dir".into());
            argv.push(self.exec_dir.clone().into_os_string());
        }

        argv.push("--".into());
        argv.push(program.as_ref().to_os_string());
        argv.extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));

        argv
    }
}
