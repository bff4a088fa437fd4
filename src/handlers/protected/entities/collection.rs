use std::collections::HashMap;

use axum::extract::{rejection::JsonRejection, Path, Query};
use axum::Json;
use serde_json::Value;
use tracing::debug;

use crate::database::driver::Document;
use crate::middleware::{ApiResponse, ApiResult, TenantContext};

use super::utils::{
    body_object, ensure_writable, filter_from_query, parse_entity, present, record_activity,
};

/// GET /api/entities/:entity - list records in the caller's clinic
///
/// Query parameters other than `limit` are exact-match string filters, e.g.
/// `/api/entities/appointments?status=scheduled&limit=20`.
pub async fn get(
    ctx: TenantContext,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Document>> {
    let entity = parse_entity(&entity)?;
    let (filter, limit) = filter_from_query(params)?;
    let entities = ctx.entities()?;

    let docs = entities.get(entity).find(&filter, Some(limit)).await?;
    debug!(
        "Listed {} {} records in {}",
        docs.len(),
        entity,
        entities.locator()
    );
    Ok(ApiResponse::success(
        docs.into_iter().map(|doc| present(entity, doc)).collect(),
    ))
}

/// POST /api/entities/:entity - create a record
///
/// `id`, `created_at` and `updated_at` are assigned by the store and ignored
/// if present in the body.
pub async fn post(
    ctx: TenantContext,
    Path(entity): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Document> {
    let entity = parse_entity(&entity)?;
    ensure_writable(entity)?;
    let Json(body) = payload?;
    let doc = body_object(body)?;
    let entities = ctx.entities()?;

    let created = entities.get(entity).insert(doc).await?;
    record_activity(entities, &ctx, "create", entity, &created).await;
    Ok(ApiResponse::created(created))
}
