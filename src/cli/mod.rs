pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic CLI - Operational tasks against the tenant registry")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create or update the registry tables")]
    Migrate,

    #[command(about = "Create the platform super-admin (no-op if it already exists)")]
    ProvisionSuperAdmin {
        #[arg(long, help = "Super-admin email address")]
        email: String,

        #[arg(long, env = "SUPER_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    #[command(about = "Inspect and manage onboarded clinics")]
    Tenants {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate => commands::admin::migrate(config, output_format).await,
        Commands::ProvisionSuperAdmin { email, password } => {
            commands::admin::provision_super_admin(config, &email, &password, output_format).await
        }
        Commands::Tenants { cmd } => commands::tenant::handle(cmd, config, output_format).await,
    }
}
