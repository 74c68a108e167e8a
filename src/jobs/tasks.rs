/// Background task implementations
use crate::{context::AppContext, error::AppResult};

/// Drop expired session cache entries; returns the number removed
pub fn sweep_session_cache(ctx: &AppContext) -> usize {
    ctx.session_cache.sweep()
}

/// Drop expired entitlement cache entries; returns the number removed
pub fn sweep_entitlement_cache(ctx: &AppContext) -> usize {
    ctx.entitlement_cache.sweep()
}

/// Drop elapsed per-caller rate-limit windows; returns the number removed
pub fn sweep_rate_limiter(ctx: &AppContext) -> usize {
    ctx.rate_limiter.sweep()
}

/// Purge stale library database working copies
pub async fn purge_library_cache(ctx: &AppContext) -> AppResult<usize> {
    ctx.library_cache.purge_stale().await
}
