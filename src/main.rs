//! ddosban - ban abusive clients from load balancer access logs.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use ddosban::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            at,
            dry_run,
            format,
        } => {
            let fmt = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            ddosban::commands::run::run(at, dry_run, fmt, cli.verbose, &cli.config).await
        }
        Commands::Window { at } => ddosban::commands::window::run(at, &cli.config).await,
        Commands::Dump { file, at } => ddosban::commands::dump::run(file, at, &cli.config).await,
        Commands::Config { action } => ddosban::commands::config::run(action, &cli.config).await,
        Commands::Version => {
            println!("ddosban {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
