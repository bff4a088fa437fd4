use clap::Parser;
use tracing_subscriber::EnvFilter;

use clinic_api::cli::utils::output_error;
use clinic_api::cli::{Cli, OutputFormat};
use clinic_api::config;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_format = OutputFormat::from_cli(&cli);

    if let Err(e) = clinic_api::cli::run(cli, config::config()).await {
        match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => output_error(&output_format, &format!("{e:?}")),
            _ => output_error(&output_format, &format!("{e:#}")),
        }
        std::process::exit(1);
    }
}
