//! AutoSSL command line entrypoint
//!
//! `serve` runs the HTTP API together with the renewal scheduler.

mod commands;

use clap::{Parser, Subcommand};
use commands::{GenerateKeyCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTOSSL_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "AUTOSSL_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the renewal scheduler
    Serve(ServeCommand),
    /// Print a fresh random DATA_ENCRYPTION_KEY
    GenerateKey(GenerateKeyCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes full control when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        EnvFilter::new(format!(
            "autossl_cli={level},\
             autossl_certs={level},\
             autossl_core={level},\
             autossl_providers={level},\
             autossl_database={level},\
             autossl_migrations={level},\
             autossl_entities={level},\
             sqlx=warn,\
             sea_orm=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::GenerateKey(key_cmd) => key_cmd.execute(),
    }
}
