//! kcluster-operator - provisions KubernetesCluster resources until their nodes are Ready

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod commands;
mod error;
mod exit_codes;

use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "kcluster-operator")]
#[command(version)]
#[command(about = "Reconciles KubernetesCluster resources until their nodes are Ready", long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Controller options when no subcommand is given
    #[command(flatten)]
    run: RunArgs,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller (default)
    Run(RunArgs),

    /// Print the KubernetesCluster CustomResourceDefinition
    Crd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Logs go to stderr; stdout is reserved for command output and JSON status events
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.log_format);

    let result = match cli.command {
        Some(Commands::Crd) => commands::crd::run(),
        Some(Commands::Run(args)) => commands::run::run(args).await,
        None => commands::run::run(cli.run).await,
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
