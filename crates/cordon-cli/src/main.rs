//! cordon CLI - Run commands under the cordon enforcement binary

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cordon_core::{Launcher, SandboxSpec};

#[derive(Parser)]
#[command(name = "cordon")]
#[command(author, version, about = "Launch commands inside a cordon sandbox")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program under the enforcement binary
    Run {
        #[command(flatten)]
        spec: SpecArgs,

        /// Enforcement binary (defaults to CORDON_ENFORCER or the system path)
        #[arg(long)]
        enforcer: Option<PathBuf>,

        /// Kill the sandbox after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Target program and its arguments
        #[arg(last = true, required = true)]
        command: Vec<OsString>,
    },

    /// Print the enforcement invocation without running it
    Show {
        #[command(flatten)]
        spec: SpecArgs,

        /// Enforcement binary (defaults to CORDON_ENFORCER or the system path)
        #[arg(long)]
        enforcer: Option<PathBuf>,

        /// Target program and its arguments
        #[arg(last = true, required = true)]
        command: Vec<OsString>,
    },
}

/// Sandbox fields, one flag per spec field
#[derive(Args)]
struct SpecArgs {
    /// Sandbox root directory
    #[arg(short, long)]
    root: PathBuf,

    /// Expose a file inside the sandbox
    #[arg(long, num_args = 2, value_names = ["SRC", "DST"], action = ArgAction::Append)]
    add_file: Vec<PathBuf>,

    /// Expose an executable and the shared libraries it links against
    #[arg(long, num_args = 2, value_names = ["SRC", "DST"], action = ArgAction::Append)]
    add_elf_file: Vec<PathBuf>,

    /// Mount a directory inside the sandbox
    #[arg(long, num_args = 2, value_names = ["SRC", "DST"], action = ArgAction::Append)]
    mount_dir: Vec<PathBuf>,

    /// Environment assignment, KEY=VALUE
    #[arg(short, long, action = ArgAction::Append)]
    env: Vec<String>,

    /// Deny the sandbox any new network access
    #[arg(long)]
    no_new_net: bool,

    /// Control group name
    #[arg(long)]
    cgroup: Option<String>,

    /// CPU affinity list, e.g. 1,2
    #[arg(long)]
    cpuset: Option<String>,

    /// Memory limit in bytes
    #[arg(long)]
    mem_limit: Option<u64>,

    /// Write usage statistics to this path
    #[arg(long)]
    usage_stats: Option<PathBuf>,

    /// Working directory inside the sandbox
    #[arg(long)]
    exec_dir: Option<PathBuf>,
}

impl SpecArgs {
    fn into_spec(self) -> SandboxSpec {
        let mut spec = SandboxSpec::new(self.root);

        for pair in self.add_file.chunks(2) {
            spec = spec.add_file(pair[0].clone(), pair[1].clone(), false);
        }
        for pair in self.add_elf_file.chunks(2) {
            spec = spec.add_file(pair[0].clone(), pair[1].clone(), true);
        }
        for pair in self.mount_dir.chunks(2) {
            spec = spec.mount_dir(pair[0].clone(), pair[1].clone());
        }
        for assignment in self.env {
            spec = spec.env(assignment);
        }

        spec = spec.no_new_net(self.no_new_net);
        if let Some(name) = self.cgroup {
            spec = spec.cgroup(name);
        }
        if let Some(cpus) = self.cpuset {
            spec = spec.cpuset(cpus);
        }
        if let Some(bytes) = self.mem_limit {
            spec = spec.memory_limit(bytes);
        }
        if let Some(path) = self.usage_stats {
            spec = spec.usage_stats(path);
        }
        if let Some(path) = self.exec_dir {
            spec = spec.exec_dir(path);
        }

        spec
    }
}

fn launcher_for(enforcer: Option<PathBuf>) -> Launcher {
    enforcer.map_or_else(Launcher::default, Launcher::new)
}

fn split_command(command: &[OsString]) -> Result<(&OsString, &[OsString])> {
    command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("missing target program"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cordon=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            spec,
            enforcer,
            timeout,
            command,
        } => {
            let spec = spec.into_spec();
            let launcher = launcher_for(enforcer);
            let (program, args) = split_command(&command)?;

            let cancel = CancellationToken::new();

            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, cancelling sandbox");
                    interrupt.cancel();
                }
            });

            if let Some(secs) = timeout {
                let expiry = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    tracing::info!(timeout = secs, "deadline elapsed, cancelling sandbox");
                    expiry.cancel();
                });
            }

            let status = launcher
                .cancellable(&spec, program, args, cancel)
                .status()
                .await?;

            let code = status
                .code()
                .or_else(|| status.signal().map(|signal| 128 + signal))
                .unwrap_or(1);
            std::process::exit(code);
        }

        Commands::Show {
            spec,
            enforcer,
            command,
        } => {
            let spec = spec.into_spec();
            let launcher = launcher_for(enforcer);
            let (program, args) = split_command(&command)?;

            let mut tokens = vec![launcher.enforcer().as_os_str().to_os_string()];
            tokens.extend(spec.build_arguments(program, args));

            let line = tokens
                .iter()
                .map(|token| token.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
    }

    Ok(())
}
