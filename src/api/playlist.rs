/// Playlist import endpoints and crate file downloads
use crate::{
    auth::Identity,
    context::AppContext,
    entitlement::{Entitlement, Role},
    error::{AppError, AppResult},
    gates,
    jobs::JobParams,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Build playlist routes
pub fn routes(ctx: Arc<AppContext>) -> Router<Arc<AppContext>> {
    let blocking = Router::new()
        .route("/process-playlist", post(process_playlist))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            gates::quota_gate,
        ));

    Router::new()
        .merge(blocking)
        .route("/download-crate/:filename", get(download_crate))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            gates::entitlement_gate,
        ))
        .route_layer(middleware::from_fn_with_state(
            ctx,
            gates::require_auth,
        ))
        // SSE transport cannot carry an Authorization header; this route
        // gates itself inside the handler from a query-string token
        .route("/process-playlist-progress", get(process_playlist_progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPlaylistRequest {
    playlist_url: String,
    threshold: Option<u8>,
    database_file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressQuery {
    token: String,
    playlist_url: String,
    threshold: Option<u8>,
    database_file_name: String,
}

fn job_params(
    ctx: &AppContext,
    identity: &Identity,
    entitlement: &Entitlement,
    playlist_url: String,
    threshold: Option<u8>,
    database_file_name: String,
) -> JobParams {
    JobParams {
        identity_id: identity.id.clone(),
        playlist_url,
        threshold: threshold.unwrap_or(ctx.config.import.default_threshold),
        database_filename: database_file_name,
        free_tier: entitlement.role == Role::Free,
    }
}

/// Run an import to completion, returning one JSON result
async fn process_playlist(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
    Extension(entitlement): Extension<Entitlement>,
    Json(body): Json<ProcessPlaylistRequest>,
) -> AppResult<Json<Value>> {
    let params = job_params(
        &ctx,
        &identity,
        &entitlement,
        body.playlist_url,
        body.threshold,
        body.database_file_name,
    );

    let result = ctx.job_runner.run_blocking(params).await?;
    Ok(Json(result))
}

/// Run an import with progress streamed as SSE events
///
/// The full gate sequence runs inside the handler: token from the query
/// string, then entitlement, then quota. Gate failures come back as plain
/// JSON error responses before the stream opens.
async fn process_playlist_progress(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ProgressQuery>,
) -> Result<Response, AppError> {
    let (identity, _) = gates::resolve_identity(
        &ctx.session_cache,
        ctx.auth_provider.as_ref(),
        &query.token,
    )
    .await?;
    let (entitlement, downgraded) = gates::resolve_entitlement(
        &ctx.entitlement_store,
        &ctx.entitlement_cache,
        ctx.config.entitlement.trial_days,
        &identity,
    )
    .await?;
    gates::enforce_quota(
        &ctx.entitlement_store,
        &ctx.entitlement_cache,
        ctx.config.entitlement.free_daily_exports,
        &entitlement,
    )
    .await?;

    let params = job_params(
        &ctx,
        &identity,
        &entitlement,
        query.playlist_url,
        query.threshold,
        query.database_file_name,
    );

    let mut response = ctx.job_runner.run_streaming(params).into_response();
    if downgraded {
        response
            .headers_mut()
            .insert("x-entitlement-downgraded", HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Serve a previously claimed crate file from the caller's own directory
async fn download_crate(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(AppError::Validation(format!(
            "Invalid crate filename: {}",
            filename
        )));
    }

    let path = ctx
        .config
        .storage
        .user_crate_directory
        .join(&identity.id)
        .join(&filename);

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::ResourceNotFound(filename));
        }
        Err(e) => {
            return Err(AppError::Storage(format!(
                "Failed to read crate file {}: {}",
                filename, e
            )))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}
