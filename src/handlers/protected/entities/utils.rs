use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::database::driver::{document_id, Document};
use crate::database::factory::EntitySet;
use crate::database::models::{redact_user, EntityName};
use crate::error::ApiError;
use crate::middleware::TenantContext;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Path segment to entity; accepts "MedicalRecord" or "medical_records".
pub fn parse_entity(segment: &str) -> Result<EntityName, ApiError> {
    segment
        .parse()
        .map_err(|_| ApiError::not_found(format!("Unknown entity '{}'", segment)))
}

pub fn parse_id(segment: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(segment)
        .map_err(|_| ApiError::bad_request(format!("Invalid record id '{}'", segment)))
}

/// Users are created through onboarding only.
pub fn ensure_writable(entity: EntityName) -> Result<(), ApiError> {
    if entity == EntityName::User {
        return Err(ApiError::forbidden(
            "Users are managed through clinic signup and join",
        ));
    }
    Ok(())
}

pub fn body_object(body: Value) -> Result<Document, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::bad_request("Request body must be a JSON object")),
    }
}

/// Query string to an equality filter plus an optional limit.
pub fn filter_from_query(
    mut params: HashMap<String, String>,
) -> Result<(Document, i64), ApiError> {
    let limit = match params.remove("limit") {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ApiError::bad_request("limit must be a positive integer"))?
            .min(MAX_LIMIT),
        None => DEFAULT_LIMIT,
    };
    let filter = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    Ok((filter, limit))
}

pub fn present(entity: EntityName, doc: Document) -> Document {
    match entity {
        EntityName::User => redact_user(doc),
        _ => doc,
    }
}

/// Append an audit entry. Failures are logged and never fail the request.
pub async fn record_activity(
    entities: &EntitySet,
    ctx: &TenantContext,
    action: &str,
    entity: EntityName,
    record: &Document,
) {
    if entity == EntityName::ActivityLog {
        return;
    }

    let Value::Object(entry) = json!({
        "action": action,
        "entity": entity.as_str(),
        "record_id": document_id(record).map(|id| id.to_string()),
        "actor_id": ctx.user_id().map(|id| id.to_string()),
        "actor_role": ctx.caller.role(),
        "metadata": { "email": ctx.caller.email() },
    }) else {
        return;
    };

    if let Err(e) = entities.get(EntityName::ActivityLog).insert(entry).await {
        warn!(
            "Failed to record {} on {} in {}: {}",
            action,
            entity,
            entities.locator(),
            e
        );
    }
}
