use clap::Subcommand;
use serde_json::json;

use crate::app;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::registry::{TenantRecord, TenantRegistry};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List active clinics")]
    List,

    #[command(about = "Search active clinics by name")]
    Search {
        #[arg(help = "Part of the clinic name")]
        query: String,
    },

    #[command(about = "Soft-disable a clinic (hidden from join, login and search)")]
    Disable {
        #[arg(help = "Clinic slug")]
        slug: String,
    },
}

pub async fn handle(
    cmd: TenantCommands,
    config: &AppConfig,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let registry = TenantRegistry::new(
        app::connect_registry(config).await?,
        config.registry.settings(),
    );

    match cmd {
        TenantCommands::List => {
            let tenants = registry.list_active().await?;
            print_tenants(&output_format, &tenants)
        }
        TenantCommands::Search { query } => {
            let tenants = registry.search_by_name(&query).await?;
            print_tenants(&output_format, &tenants)
        }
        TenantCommands::Disable { slug } => {
            registry.deactivate(&slug).await?;
            output_success(
                &output_format,
                &format!("Clinic '{}' disabled", slug),
                Some(json!({ "slug": slug })),
            )
        }
    }
}

fn print_tenants(output_format: &OutputFormat, tenants: &[TenantRecord]) -> anyhow::Result<()> {
    if tenants.is_empty() {
        return output_empty_collection(output_format, "tenants", "No clinics found");
    }

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "tenants": tenants }))?);
        }
        OutputFormat::Text => {
            println!(
                "{:<24} {:<30} {:<8} {:<17} {}",
                "SLUG", "NAME", "CODE", "CREATED", "LOCATOR"
            );
            println!("{}", "-".repeat(110));
            for tenant in tenants {
                println!(
                    "{:<24} {:<30} {:<8} {:<17} {}",
                    tenant.slug,
                    tenant.display_name,
                    tenant.join_code,
                    tenant.created_at.format("%Y-%m-%d %H:%M"),
                    tenant.store_locator
                );
            }
        }
    }
    Ok(())
}
