use axum::extract::{rejection::JsonRejection, Path};
use axum::Json;
use serde_json::Value;

use crate::database::driver::Document;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, TenantContext};

use super::utils::{body_object, ensure_writable, parse_entity, parse_id, present, record_activity};

fn not_found(entity: impl std::fmt::Display, id: impl std::fmt::Display) -> ApiError {
    ApiError::not_found(format!("{} {} not found", entity, id))
}

/// GET /api/entities/:entity/:id - show single record by id
pub async fn get(
    ctx: TenantContext,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<Document> {
    let entity = parse_entity(&entity)?;
    let id = parse_id(&id)?;

    let doc = ctx
        .entities()?
        .get(entity)
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found(entity, id))?;
    Ok(ApiResponse::success(present(entity, doc)))
}

/// PATCH /api/entities/:entity/:id - merge fields into a record
pub async fn patch(
    ctx: TenantContext,
    Path((entity, id)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Document> {
    let entity = parse_entity(&entity)?;
    ensure_writable(entity)?;
    let id = parse_id(&id)?;
    let Json(body) = payload?;
    let changes = body_object(body)?;
    let entities = ctx.entities()?;

    let updated = entities
        .get(entity)
        .update(id, changes)
        .await?
        .ok_or_else(|| not_found(entity, id))?;
    record_activity(entities, &ctx, "update", entity, &updated).await;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/entities/:entity/:id - remove a record
pub async fn delete(
    ctx: TenantContext,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<()> {
    let entity = parse_entity(&entity)?;
    ensure_writable(entity)?;
    let id = parse_id(&id)?;
    let entities = ctx.entities()?;

    let accessor = entities.get(entity);
    let Some(existing) = accessor.find_by_id(id).await? else {
        return Err(not_found(entity, id));
    };
    if !accessor.delete(id).await? {
        return Err(not_found(entity, id));
    }
    record_activity(entities, &ctx, "delete", entity, &existing).await;
    Ok(ApiResponse::no_content())
}
