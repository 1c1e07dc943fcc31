pub mod commands;

use clap::{Parser, Subcommand};

/// Vessel — a minimalist Linux container engine.
#[derive(Parser, Debug)]
#[command(name = "vessel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap an image from a distribution's package servers.
    Bootstrap {
        /// Name of the new image.
        name: String,

        /// Distribution: alpine, debian or ubuntu.
        dist: String,

        /// Distribution release (e.g. "v3.16" for alpine, "bullseye" for
        /// debian). Defaults to the newest supported release.
        version: Option<String>,
    },

    /// Manage images.
    Image {
        #[command(subcommand)]
        command: ImageCommand,
    },

    /// Run a command in a new container.
    Run {
        /// Name of the new container.
        name: String,

        /// Name of the image to run it from.
        image: String,

        /// The entrypoint command, shell-style quoted (e.g. "/bin/sh -c 'echo hi'").
        #[arg(short = 'c', long = "cmd")]
        cmd: String,

        /// CPU share as a percentage between 0 (exclusive) and 100.
        #[arg(long)]
        cpu: Option<f64>,

        /// Memory hard limit in MiB.
        #[arg(long)]
        memory: Option<u64>,

        /// Hostname inside the container (default: a random generated name).
        #[arg(long)]
        hostname: Option<String>,

        /// Keep the host's network namespace and pass /etc/resolv.conf
        /// through read-only.
        #[arg(long)]
        host_network: bool,
    },

    /// Stop one or more running containers.
    Kill {
        /// Container name(s).
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Manage containers.
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },

    /// Display usage information and exit.
    #[command(alias = "use")]
    Usage,

    /// Output version information and exit.
    #[command(alias = "v")]
    Version,

    /// Container init payload (internal; spawned by the supervisor).
    #[command(hide = true)]
    Init {
        /// JSON-encoded init arguments.
        payload: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// List images.
    #[command(alias = "ls")]
    List,

    /// Remove one or more images.
    #[command(alias = "rm")]
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ContainerCommand {
    /// List running containers.
    #[command(alias = "ls")]
    List,

    /// List all containers.
    #[command(name = "list-all", alias = "lsa")]
    ListAll,

    /// Remove a stopped container.
    #[command(alias = "rm")]
    Remove {
        /// Container name.
        name: String,
    },
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
