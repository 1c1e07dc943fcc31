use anyhow::{Context, Result};
use clap::CommandFactory;

use crate::cli::{Cli, Command, ContainerCommand, ImageCommand};
use crate::core::manager::{self, RunOptions};
use crate::platform::linux::init::{InitArgs, Pid1};

/// Dispatch a parsed CLI command to the appropriate handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Bootstrap { name, dist, version } => {
            manager::bootstrap(&name, &dist, version.as_deref())
                .with_context(|| format!("failed to bootstrap image '{name}'"))?;
            println!("Image {name} is ready");
            Ok(())
        }
        Command::Image { command } => match command {
            ImageCommand::List => {
                for name in manager::image_list() {
                    println!("{name}");
                }
                Ok(())
            }
            ImageCommand::Remove { names } => {
                manager::image_remove(&names).context("failed to remove image(s)")
            }
        },
        Command::Run {
            name,
            image,
            cmd,
            cpu,
            memory,
            hostname,
            host_network,
        } => {
            let opts = RunOptions {
                hostname,
                host_network,
                cpu_limit: cpu,
                memory_limit: memory,
            };
            manager::run(&name, &image, &cmd, opts)
                .with_context(|| format!("failed to run container '{name}'"))?;
            println!("Container {name} started");
            Ok(())
        }
        Command::Kill { names } => manager::kill(&names).context("failed to stop container(s)"),
        Command::Container { command } => match command {
            ContainerCommand::List => {
                for name in manager::container_list_running() {
                    println!("{name}");
                }
                Ok(())
            }
            ContainerCommand::ListAll => {
                for name in manager::container_list_all() {
                    println!("{name}");
                }
                Ok(())
            }
            ContainerCommand::Remove { name } => {
                manager::container_remove(&name)
                    .with_context(|| format!("failed to remove container '{name}'"))?;
                println!("Removed container {name}");
                Ok(())
            }
        },
        Command::Usage => {
            Cli::command()
                .print_long_help()
                .context("failed to print usage")?;
            Ok(())
        }
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { payload } => run_init(&payload),
    }
}

/// The hidden init payload: this process is PID 1 of a fresh namespace. It
/// never returns; failures before readiness surface to the supervisor as a
/// closed control pipe.
fn run_init(payload: &str) -> Result<()> {
    let args: InitArgs =
        serde_json::from_str(payload).context("failed to decode init arguments")?;
    let code = match Pid1::new(args).and_then(Pid1::run) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("vessel-init: {err}");
            1
        }
    };
    std::process::exit(code);
}
