use anyhow::Result;
use clap::{Parser, Subcommand};
use misub_rs::{aggregate, catalog, refresh, serve};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
  /// Log at debug level unless RUST_LOG is set.
  #[arg(long, short, global = true, default_value_t = false)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve aggregated subscriptions over HTTP (base64 or via the converter).
  Serve(serve::Args),

  /// Aggregate all sources (or one profile) once and print the base64 output.
  Aggregate(aggregate::Args),

  /// Fetch every enabled subscription and store its node count and traffic info.
  Refresh(refresh::Args),

  /// Delete a subscription or manual node and prune profile references to it.
  Remove(catalog::RemoveArgs),
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);
  match cli.command {
    Commands::Serve(args) => serve::run(args).await,
    Commands::Aggregate(args) => aggregate::run(args).await,
    Commands::Refresh(args) => refresh::run(args).await,
    Commands::Remove(args) => catalog::run_remove(args).await,
  }
}
