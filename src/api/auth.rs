/// Account endpoints, thin delegations to the external auth provider
use crate::{
    auth::{Identity, SessionTokens},
    context::AppContext,
    entitlement::Entitlement,
    error::{AppError, AppResult},
    gates,
};
use axum::{
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Build auth routes
pub fn routes(ctx: Arc<AppContext>) -> Router<Arc<AppContext>> {
    let gated = Router::new()
        .route("/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            gates::entitlement_gate,
        ));

    Router::new()
        .merge(gated)
        .route("/api/auth/verify", get(verify))
        .route_layer(middleware::from_fn_with_state(ctx, gates::require_auth))
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
        .route("/auth/signout", post(signout))
        .route("/auth/reset-password", post(reset_password))
}

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ResetPasswordRequest {
    email: String,
}

fn session_body(session: &SessionTokens) -> Value {
    json!({
        "accessToken": session.access_token,
        "refreshToken": session.refresh_token,
        "user": {
            "id": session.identity.id,
            "email": session.identity.email,
        },
    })
}

async fn signup(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> AppResult<Json<Value>> {
    let session = ctx.auth_provider.sign_up(&body.email, &body.password).await?;
    ctx.session_cache
        .store(&session.access_token, &session.identity);
    Ok(Json(session_body(&session)))
}

async fn signin(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> AppResult<Json<Value>> {
    let session = ctx.auth_provider.sign_in(&body.email, &body.password).await?;
    ctx.session_cache
        .store(&session.access_token, &session.identity);

    // Upsert: first web contact creates the trial record, then flags it.
    // Best effort either way, sign-in itself does not depend on it.
    match gates::resolve_entitlement(
        &ctx.entitlement_store,
        &ctx.entitlement_cache,
        ctx.config.entitlement.trial_days,
        &session.identity,
    )
    .await
    {
        Ok(_) => {
            if let Err(e) = ctx
                .entitlement_store
                .mark_seen_on_web(&session.identity.email)
                .await
            {
                debug!(
                    "Failed to mark {} as seen on web: {}",
                    session.identity.email, e
                );
            }
        }
        Err(e) => debug!(
            "Failed to resolve entitlement for {} on sign-in: {}",
            session.identity.email, e
        ),
    }
    ctx.entitlement_cache.invalidate(&session.identity.email);

    Ok(Json(session_body(&session)))
}

async fn signout(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let token = gates::extract_bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthenticated("Missing bearer token".to_string()))?;

    ctx.session_cache.flush(&token);
    ctx.auth_provider.sign_out(&token).await?;

    Ok(Json(json!({ "success": true })))
}

async fn reset_password(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    ctx.auth_provider.reset_password(&body.email).await?;
    Ok(Json(json!({ "success": true })))
}

/// Current identity plus subscription state, behind auth + entitlement gates
async fn me(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
    Extension(entitlement): Extension<Entitlement>,
) -> Json<Value> {
    Json(json!({
        "user": {
            "id": identity.id,
            "email": identity.email,
        },
        "entitlement": {
            "role": entitlement.role,
            "trialEndsAt": entitlement.trial_end,
            "subscriptionType": entitlement.subscription_type,
            "subscriptionEndsAt": entitlement.subscription_end,
            "exportsToday": entitlement.exports_today,
            "dailyExportLimit": ctx.config.entitlement.free_daily_exports,
        },
        "subscriptionStatus": entitlement.subscription_status(),
    }))
}

/// Lightweight token check, auth gate only
async fn verify(Extension(identity): Extension<Identity>) -> Json<Value> {
    Json(json!({
        "valid": true,
        "user": {
            "id": identity.id,
            "email": identity.email,
        },
    }))
}
