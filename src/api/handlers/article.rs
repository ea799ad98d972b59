use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::models::{
    ArticleListResponse, ArticlePatchRequest, ArticleRequest, ArticleResponse, PageQuery,
};
use crate::utils::extract::{JsonBody, PathParam, QueryParams};
use crate::utils::response::AppError;
use crate::AppState;

/// GET /articles
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    QueryParams(query): QueryParams<PageQuery>,
) -> Result<Json<ArticleListResponse>, AppError> {
    let (articles, total) = state
        .article_service
        .list(&auth_user, query.into())
        .await?;

    Ok(Json(ArticleListResponse {
        articles: articles.into_iter().map(ArticleResponse::from).collect(),
        total,
    }))
}

/// POST /articles
pub async fn create_article(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    JsonBody(req): JsonBody<ArticleRequest>,
) -> Result<(StatusCode, Json<ArticleResponse>), AppError> {
    let article = state.article_service.create(&auth_user, req).await?;
    Ok((StatusCode::CREATED, Json(ArticleResponse::from(article))))
}

/// GET /articles/:id
pub async fn get_article(
    State(state): State<Arc<AppState>>,
    PathParam(article_id): PathParam<i64>,
) -> Result<Json<ArticleResponse>, AppError> {
    let article = state.article_service.get(article_id).await?;
    Ok(Json(ArticleResponse::from(article)))
}

/// PUT /articles/:id
pub async fn update_article(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(article_id): PathParam<i64>,
    JsonBody(req): JsonBody<ArticleRequest>,
) -> Result<Json<ArticleResponse>, AppError> {
    let article = state
        .article_service
        .update(&auth_user, article_id, req)
        .await?;
    Ok(Json(ArticleResponse::from(article)))
}

/// PATCH /articles/:id
pub async fn patch_article(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(article_id): PathParam<i64>,
    JsonBody(req): JsonBody<ArticlePatchRequest>,
) -> Result<Json<ArticleResponse>, AppError> {
    let article = state
        .article_service
        .patch(&auth_user, article_id, req)
        .await?;
    Ok(Json(ArticleResponse::from(article)))
}

/// DELETE /articles/:id
pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(article_id): PathParam<i64>,
) -> Result<StatusCode, AppError> {
    state.article_service.delete(&auth_user, article_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
