//! Navecd CLI - author, verify and publish GitOps projects

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

mod commands;
mod compiler;
mod exit_codes;

#[derive(Parser)]
#[command(name = "navecd")]
#[command(version)]
#[command(about = "Declarative continuous delivery for Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project skeleton
    Init {
        /// Module identifier, e.g. github.com/org/infra
        module: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Compile a local project and verify its dependency graph
    Verify {
        /// Project path
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project sub directory holding the configuration
        #[arg(long, default_value = ".")]
        dir: String,
    },

    /// Register a GitOpsProject on the cluster
    Install {
        /// URL of the project's OCI repository
        #[arg(long)]
        url: String,

        /// Artifact reference (tag)
        #[arg(long = "ref")]
        reference: String,

        /// Directory within the project holding the configuration
        #[arg(long, default_value = ".")]
        dir: String,

        /// Project name
        #[arg(long)]
        name: String,

        /// Pull interval in seconds
        #[arg(long, default_value_t = 30)]
        interval: i64,

        /// Controller shard handling this project
        #[arg(long)]
        shard: Option<String>,

        /// Workload identity provider for registry access
        #[arg(long, value_parser = ["aws", "azure", "gcp"])]
        wip: Option<String>,

        /// Name of a secret holding registry credentials
        #[arg(long)]
        secret: Option<String>,

        /// Allow plain HTTP registries
        #[arg(long)]
        insecure: bool,
    },

    /// Package the current directory and push it as an artifact
    Push {
        /// URL of the project's OCI repository
        #[arg(long)]
        url: String,

        /// Artifact reference (tag)
        #[arg(long = "ref")]
        reference: String,

        /// Allow plain HTTP registries
        #[arg(long)]
        insecure: bool,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    let env_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Init { module, output } => commands::init::run(&module, &output),
        Commands::Verify { path, dir } => commands::verify::run(&path, &dir).await,
        Commands::Install {
            url,
            reference,
            dir,
            name,
            interval,
            shard,
            wip,
            secret,
            insecure,
        } => {
            commands::install::run(commands::install::InstallArgs {
                url,
                reference,
                dir,
                name,
                interval,
                shard,
                wip,
                secret,
                insecure,
            })
            .await
        }
        Commands::Push {
            url,
            reference,
            insecure,
        } => commands::push::run(&url, &reference, insecure).await,
        Commands::Version => {
            println!("navecd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}
