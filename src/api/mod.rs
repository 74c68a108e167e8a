/// API routes and handlers
pub mod auth;
pub mod library;
pub mod playlist;

use crate::context::AppContext;
use axum::Router;
use std::sync::Arc;

/// Build API routes
pub fn routes(ctx: Arc<AppContext>) -> Router<Arc<AppContext>> {
    Router::new()
        .merge(auth::routes(ctx.clone()))
        .merge(library::routes(ctx.clone()))
        .merge(playlist::routes(ctx))
}
