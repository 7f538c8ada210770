//! Post CRUD (§4.5.5). Scheduling side effects are implicit: the scheduler's
//! tick re-reads `status`/`scheduled_at` on every fire, so these handlers only
//! ever need to update the row.

use axum::{
    extract::{Path, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::posts::{self, Location, NewPost, Post, PostUpdate};
use crate::error::{ok, AppError, AppResult, Envelope};
use crate::identity::{require_owner, Principal};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/posts", post(create_post).get(list_posts))
        .route("/posts/{id}", get(get_post).patch(update_post).delete(delete_post))
        .route("/posts/local/{postIdLocal}", get(get_post_by_local_id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub post_id_local: Uuid,
    pub content: String,
    pub title: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default)]
    pub cloud_image_urls: Vec<String>,
    pub location: Option<Location>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn default_visibility() -> String {
    "public".to_string()
}

/// §3's content/image-count/location-range invariants, shared by create and
/// update so a `PATCH` cannot drive a Post out of bounds any more than a
/// `POST` can.
fn validate_content(content: &str) -> Result<(), AppError> {
    if content.is_empty() || content.chars().count() > 280 {
        return Err(AppError::Validation(
            "content must be 1-280 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_image_urls(urls: &[String]) -> Result<(), AppError> {
    if urls.len() > 4 {
        return Err(AppError::Validation(
            "cloudImageUrls supports at most 4 images".to_string(),
        ));
    }
    Ok(())
}

fn validate_location(loc: &Location) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lng) {
        return Err(AppError::Validation("location out of range".to_string()));
    }
    Ok(())
}

fn validate_scheduled_at(scheduled_at: DateTime<Utc>) -> Result<(), AppError> {
    if scheduled_at <= Utc::now() {
        return Err(AppError::Validation(
            "scheduledAt must be in the future".to_string(),
        ));
    }
    Ok(())
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<CreatePostRequest>,
) -> AppResult<Json<Envelope<Post>>> {
    validate_content(&body.content)?;
    validate_image_urls(&body.cloud_image_urls)?;
    if let Some(loc) = &body.location {
        validate_location(loc)?;
    }
    if let Some(scheduled_at) = body.scheduled_at {
        validate_scheduled_at(scheduled_at)?;
    }

    users_find_or_create(&state, &principal.subject).await?;

    let post = posts::create(
        &state.db,
        NewPost {
            user_id: &principal.subject,
            post_id_local: body.post_id_local,
            content: &body.content,
            title: body.title.as_deref(),
            visibility: &body.visibility,
            cloud_image_urls: &body.cloud_image_urls,
            location: body.location.as_ref(),
            scheduled_at: body.scheduled_at,
        },
    )
    .await?;

    Ok(ok(post))
}

async fn users_find_or_create(state: &AppState, user_id: &str) -> Result<(), AppError> {
    crate::domain::users::find_or_create(&state.db, user_id).await?;
    Ok(())
}

async fn list_posts(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Envelope<Vec<Post>>>> {
    let posts = posts::list_for_user(&state.db, &principal.subject).await?;
    Ok(ok(posts))
}

async fn get_post(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Envelope<Post>>> {
    let post = posts::get_by_id(&state.db, id).await?.ok_or(AppError::NotFound)?;
    require_owner(&principal, &post.user_id)?;
    Ok(ok(post))
}

async fn get_post_by_local_id(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(post_id_local): Path<Uuid>,
) -> AppResult<Json<Envelope<Post>>> {
    let post = posts::get_by_local_id(&state.db, &principal.subject, post_id_local)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(post))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub content: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub title: Option<Option<String>>,
    pub visibility: Option<String>,
    pub cloud_image_urls: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<Location>>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

/// Distinguishes "field omitted" from "field explicitly set to null" so a
/// `PATCH` can clear `title`, `location`, or `scheduledAt`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

async fn update_post(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePostRequest>,
) -> AppResult<Json<Envelope<Post>>> {
    let current = posts::get_by_id(&state.db, id).await?.ok_or(AppError::NotFound)?;
    require_owner(&principal, &current.user_id)?;

    if current.status == posts::PostStatus::Publishing {
        return Err(AppError::Conflict(
            "post is currently publishing".to_string(),
        ));
    }
    if let Some(content) = &body.content {
        validate_content(content)?;
    }
    if let Some(urls) = &body.cloud_image_urls {
        validate_image_urls(urls)?;
    }
    if let Some(Some(loc)) = &body.location {
        validate_location(loc)?;
    }
    if let Some(Some(scheduled_at)) = body.scheduled_at {
        validate_scheduled_at(scheduled_at)?;
    }

    let patch = PostUpdate {
        content: body.content.as_deref(),
        title: body.title.as_ref().map(|t| t.as_deref()),
        visibility: body.visibility.as_deref(),
        cloud_image_urls: body.cloud_image_urls.as_deref(),
        location: body.location.as_ref().map(|l| l.as_ref()),
        scheduled_at: body.scheduled_at,
    };

    let updated = posts::update(&state.db, id, patch)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(updated))
}

#[derive(Serialize)]
struct Empty {}

async fn delete_post(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Envelope<Empty>>> {
    let current = posts::get_by_id(&state.db, id).await?.ok_or(AppError::NotFound)?;
    require_owner(&principal, &current.user_id)?;

    if current.status == posts::PostStatus::Publishing {
        return Err(AppError::Conflict(
            "cannot delete a post while it is publishing".to_string(),
        ));
    }

    posts::delete(&state.db, id).await?;
    Ok(ok(Empty {}))
}
