use serde_json::json;

use crate::app;
use crate::auth::hash_password;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::registry::TenantRegistry;

pub async fn migrate(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    app::connect_registry(config).await?;
    output_success(
        &output_format,
        &format!(
            "Registry schema is up to date ({})",
            config.database.registry_database
        ),
        None,
    )
}

pub async fn provision_super_admin(
    config: &AppConfig,
    email: &str,
    password: &str,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    if email.trim().is_empty() || password.is_empty() {
        anyhow::bail!("Both --email and --password (or SUPER_ADMIN_PASSWORD) are required");
    }

    let registry = TenantRegistry::new(
        app::connect_registry(config).await?,
        config.registry.settings(),
    );
    let hash = hash_password(password, config.security.bcrypt_cost)?;
    let created = registry.provision_super_admin(email, &hash).await?;

    let message = if created {
        format!("Super-admin {} provisioned", email)
    } else {
        format!("Super-admin {} already exists, nothing to do", email)
    };
    output_success(
        &output_format,
        &message,
        Some(json!({ "email": email, "created": created })),
    )
}
