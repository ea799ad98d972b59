//! Extractors whose rejections render as the API error envelope.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use super::response::AppError;

/// `Json<T>` with an enveloped rejection.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

/// `Path<T>` with an enveloped rejection.
#[derive(Debug)]
pub struct PathParam<T>(pub T);

/// `Query<T>` with an enveloped rejection.
#[derive(Debug)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!("Rejected request body: {}", rejection.body_text());
                Err(json_rejection(rejection))
            }
        }
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(path_rejection(rejection)),
        }
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            AppError::bad_request("Expected request with `Content-Type: application/json`")
        }
        other => AppError::bad_request(&other.body_text()),
    }
}

fn path_rejection(rejection: PathRejection) -> AppError {
    tracing::debug!("Rejected path parameters: {}", rejection.body_text());
    match rejection {
        PathRejection::FailedToDeserializePathParams(_) => {
            AppError::bad_request("Invalid path parameter.")
        }
        other => AppError::internal(&other.body_text()),
    }
}

fn query_rejection(rejection: QueryRejection) -> AppError {
    tracing::debug!("Rejected query string: {}", rejection.body_text());
    AppError::bad_request(&rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Paging {
        limit: Option<i64>,
    }

    fn parts(uri: &str) -> Parts {
        let (parts, _) = axum::http::Request::builder()
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_query_params_accepts_valid_input() {
        let mut parts = parts("/articles?limit=5");
        let QueryParams(paging) = QueryParams::<Paging>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(paging.limit, Some(5));
    }

    #[tokio::test]
    async fn test_query_params_rejection_is_bad_request() {
        let mut parts = parts("/articles?limit=abc");
        let err = QueryParams::<Paging>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "BAD_REQUEST");
    }
}
