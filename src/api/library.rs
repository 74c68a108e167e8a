/// Library database upload and listing
use crate::{
    auth::Identity,
    context::AppContext,
    error::{AppError, AppResult},
    gates,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Build library routes
pub fn routes(ctx: Arc<AppContext>) -> Router<Arc<AppContext>> {
    let upload_limit = ctx.config.service.upload_limit;

    Router::new()
        .route("/upload-database", post(upload_database))
        .layer(DefaultBodyLimit::max(upload_limit))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            gates::entitlement_gate,
        ))
        .route("/databases", get(list_databases))
        .route_layer(middleware::from_fn_with_state(ctx, gates::require_auth))
}

/// Accept a single multipart file and store it under the caller's identity,
/// replacing any prior upload of the same name
async fn upload_database(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?
        .ok_or_else(|| AppError::Validation("Upload contains no file".to_string()))?;

    let filename = field
        .file_name()
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Validation("Upload is missing a filename".to_string()))?;

    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;

    if data.len() > ctx.config.service.upload_limit {
        return Err(AppError::Validation(format!(
            "Database exceeds the {} byte upload limit",
            ctx.config.service.upload_limit
        )));
    }

    let size = data.len();
    ctx.library_store
        .put(&identity.id, &filename, data.to_vec())
        .await?;

    info!(
        "Stored library database {} ({} bytes) for {}",
        filename, size, identity.id
    );

    Ok(Json(json!({
        "success": true,
        "filename": filename,
        "size": size,
    })))
}

/// List the caller's stored library databases
async fn list_databases(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Value>> {
    let files = ctx.library_store.list(&identity.id).await?;

    Ok(Json(json!({
        "databases": files
            .iter()
            .map(|f| json!({ "filename": f.filename, "size": f.size }))
            .collect::<Vec<_>>(),
    })))
}
