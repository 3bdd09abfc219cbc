use clap::Parser;
use kubemeta::cli::{commands, Cli};
use kubemeta::config::Config;
use std::process;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    debug!("Starting kubemeta v{}", kubemeta::VERSION);

    let Some(command) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        process::exit(1);
    };

    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => commands::handle_command(command, config, cli.output).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
