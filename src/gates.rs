/// Request gates: authentication, entitlement, quota
///
/// Gates run strictly in sequence per request: rate limit (its own
/// middleware), then auth, then entitlement, then quota on export routes.
/// Each gate attaches its result as a request extension for the handler and
/// for the gates after it.
use crate::{
    auth::{AuthProvider, Identity, SessionCache},
    context::AppContext,
    entitlement::{self, Entitlement, EntitlementCache, EntitlementStore, Role, RoleCheck},
    error::{AppError, AppResult},
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve a bearer token to an identity: session cache first, then the
/// provider (with the result cached)
///
/// Returns the identity plus a replacement token when a silent refresh
/// happened, so the response can advertise it.
pub async fn resolve_identity(
    session_cache: &SessionCache,
    provider: &dyn AuthProvider,
    token: &str,
) -> AppResult<(Identity, Option<String>)> {
    if let Some(identity) = session_cache.resolve(token) {
        let refreshed = session_cache
            .refresh_if_expiring(token, &identity, provider)
            .await;
        return Ok((identity, refreshed));
    }

    let identity = provider.verify(token).await?;
    session_cache.store(token, &identity);
    Ok((identity, None))
}

/// Resolve the caller's entitlement: cache, then store, with a trial record
/// created lazily on first contact
///
/// Expired trial or premium records are downgraded in-flight; the persistence
/// write is fail-open (the request proceeds with the downgraded view either
/// way) but creation failure is fatal, since without a record no role
/// decision is possible. Returns the record plus whether a downgrade happened
/// on this request.
pub async fn resolve_entitlement(
    store: &EntitlementStore,
    cache: &EntitlementCache,
    trial_days: i64,
    identity: &Identity,
) -> AppResult<(Entitlement, bool)> {
    let now = Utc::now();

    let record = match cache.get(&identity.email) {
        Some(record) => record,
        None => {
            let found = store
                .find_by_email(&identity.email)
                .await
                .map_err(|e| AppError::EntitlementLookupFailed(e.to_string()))?;
            match found {
                Some(record) => record,
                None => {
                    debug!("First contact, starting trial for {}", identity.email);
                    let trial =
                        Entitlement::new_trial(&identity.id, &identity.email, now, trial_days);
                    store
                        .create(&trial)
                        .await
                        .map_err(|e| AppError::EntitlementLookupFailed(e.to_string()))?
                }
            }
        }
    };

    // Best-effort activity marker, off the request path
    {
        let store = store.clone();
        let id = record.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_seen(&id, now).await {
                debug!("Failed to touch last_seen for {}: {}", id, e);
            }
        });
    }

    let (record, downgraded) = match entitlement::evaluate(&record, now) {
        RoleCheck::ActiveTrial | RoleCheck::ActivePremium | RoleCheck::Free => (record, false),
        RoleCheck::TrialExpired | RoleCheck::PremiumExpired => {
            let downgraded = record.downgraded_to_free();
            if let Err(e) = store.save_role(&downgraded).await {
                // Fail open: the caller is treated as free for this request
                // and the write is retried on a later one
                warn!(
                    "Failed to persist downgrade for {}: {}",
                    downgraded.email, e
                );
            }
            (downgraded, true)
        }
    };

    cache.put(&record);
    Ok((record, downgraded))
}

/// Enforce and pre-charge the daily export quota for free-tier callers
///
/// The counter resets when the stored date is not today, then the export is
/// charged before the operation runs: a failed import still consumes the
/// day's budget. The persistence write is best-effort.
pub async fn enforce_quota(
    store: &EntitlementStore,
    cache: &EntitlementCache,
    limit: u32,
    entitlement: &Entitlement,
) -> AppResult<()> {
    if entitlement.role != Role::Free {
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let mut record = entitlement.clone();
    if record.last_export_date != today {
        record.exports_today = 0;
        record.last_export_date = today;
    }

    if record.exports_today >= limit {
        return Err(AppError::QuotaExceeded {
            exports_today: record.exports_today,
            limit,
        });
    }

    record.exports_today += 1;
    if let Err(e) = store
        .save_quota(&record.id, record.exports_today, record.last_export_date)
        .await
    {
        warn!("Failed to persist quota charge for {}: {}", record.email, e);
    }
    cache.put(&record);

    Ok(())
}

/// Middleware: require a valid bearer token, attach the `Identity`
pub async fn require_auth(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthenticated("Missing bearer token".to_string()))?;

    let (identity, refreshed) =
        resolve_identity(&ctx.session_cache, ctx.auth_provider.as_ref(), &token).await?;
    request.extensions_mut().insert(identity);

    let mut response = next.run(request).await;
    if let Some(new_token) = refreshed {
        if let Ok(value) = HeaderValue::from_str(&new_token) {
            response.headers_mut().insert("x-refreshed-token", value);
        }
    }
    Ok(response)
}

/// Middleware: attach the `Identity` when the bearer token resolves, proceed
/// unauthenticated otherwise
///
/// For endpoints that personalize their response but do not require login.
/// Never rejects: a missing or invalid token just means no identity
/// extension is attached.
pub async fn optional_auth(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(request.headers()) {
        Some(token) => token,
        None => return next.run(request).await,
    };

    match resolve_identity(&ctx.session_cache, ctx.auth_provider.as_ref(), &token).await {
        Ok((identity, refreshed)) => {
            request.extensions_mut().insert(identity);
            let mut response = next.run(request).await;
            if let Some(new_token) = refreshed {
                if let Ok(value) = HeaderValue::from_str(&new_token) {
                    response.headers_mut().insert("x-refreshed-token", value);
                }
            }
            response
        }
        Err(e) => {
            debug!("Optional auth could not resolve token: {}", e);
            next.run(request).await
        }
    }
}

/// Middleware: resolve the caller's entitlement, attach the `Entitlement`
///
/// Must run behind `require_auth`.
pub async fn entitlement_gate(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| AppError::Internal("Entitlement gate reached without auth".to_string()))?;

    let (record, downgraded) = resolve_entitlement(
        &ctx.entitlement_store,
        &ctx.entitlement_cache,
        ctx.config.entitlement.trial_days,
        &identity,
    )
    .await?;
    request.extensions_mut().insert(record);

    let mut response = next.run(request).await;
    if downgraded {
        response
            .headers_mut()
            .insert("x-entitlement-downgraded", HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Middleware: enforce the daily export quota on export routes
///
/// Must run behind `entitlement_gate`.
pub async fn quota_gate(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let record = request
        .extensions()
        .get::<Entitlement>()
        .cloned()
        .ok_or_else(|| AppError::Internal("Quota gate reached without entitlement".to_string()))?;

    enforce_quota(
        &ctx.entitlement_store,
        &ctx.entitlement_cache,
        ctx.config.entitlement.free_daily_exports,
        &record,
    )
    .await?;

    Ok(next.run(request).await)
}
