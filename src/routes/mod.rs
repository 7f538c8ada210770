pub mod engagements;
pub mod health;
pub mod notifications;
pub mod posts;
pub mod users;
pub mod x_auth;

#[cfg(test)]
mod tests;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::routes())
        .merge(users::routes())
        .merge(x_auth::routes())
        .merge(posts::routes())
        .merge(engagements::routes())
        .merge(notifications::routes())
}
