//! Blog API endpoints
//!
//! Public:
//! - GET /api/v1/blogs?page=&per_page= - Published blogs, newest first
//! - GET /api/v1/blogs/{slug} - Blog with its section/content tree
//!
//! Admin:
//! - GET/POST /api/v1/admin/blogs
//! - GET/PATCH/DELETE /api/v1/admin/blogs/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::api::common::PageQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::models::{Blog, BlogDetail, CreateBlogInput, PagedResult, UpdateBlogInput};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_published))
        .route("/{slug}", get(get_published))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all).post(create_blog))
        .route("/{id}", get(get_blog).patch(update_blog).delete(delete_blog))
}

/// GET /api/v1/blogs
async fn list_published(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedResult<Blog>>, ApiError> {
    Ok(Json(
        state
            .blog_service
            .list_published(query.page, query.per_page)
            .await?,
    ))
}

/// GET /api/v1/blogs/{slug}
async fn get_published(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<BlogDetail>, ApiError> {
    Ok(Json(state.blog_service.get_published(&slug).await?))
}

/// GET /api/v1/admin/blogs
async fn list_all(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedResult<Blog>>, ApiError> {
    Ok(Json(
        state.blog_service.list_all(query.page, query.per_page).await?,
    ))
}

/// GET /api/v1/admin/blogs/{id}
async fn get_blog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogDetail>, ApiError> {
    Ok(Json(state.blog_service.get(id).await?))
}

/// POST /api/v1/admin/blogs
async fn create_blog(
    State(state): State<AppState>,
    Json(body): Json<CreateBlogInput>,
) -> Result<(StatusCode, Json<BlogDetail>), ApiError> {
    let blog = state.blog_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(blog)))
}

/// PATCH /api/v1/admin/blogs/{id}
///
/// `sections`, when present, replaces the whole tree.
async fn update_blog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBlogInput>,
) -> Result<Json<BlogDetail>, ApiError> {
    Ok(Json(state.blog_service.update(id, body).await?))
}

/// DELETE /api/v1/admin/blogs/{id}
async fn delete_blog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.blog_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
