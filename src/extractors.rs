use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::auth::SessionContext;
use crate::error::{AppError, GENERAL_FIELD};
use crate::state::AppState;
use crate::store::Deadline;

/// Per-request session built from the `Authorization` header.
///
/// Anonymous when the header is absent or uses another scheme. A `Token`
/// credential that does not verify rejects the request with 401.
#[derive(Debug, Clone)]
pub struct Session(pub SessionContext);

impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let cx = SessionContext::from_authorization(header, &state.codec).map_err(|e| {
            tracing::debug!("Rejected credential: {}", e);
            AppError::unauthenticated()
        })?;

        Ok(Session(
            cx.with_deadline(Deadline::after(state.config.request_timeout())),
        ))
    }
}

/// `Json<T>` whose rejections render the error envelope.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::validation(GENERAL_FIELD, rejection.body_text())),
        }
    }
}

/// `Query<T>` whose rejections render the error envelope.
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(AppError::validation("query", rejection.body_text())),
        }
    }
}

/// `Path<T>` whose rejections render the error envelope.
#[derive(Debug, Clone)]
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(AppError::validation("path", rejection.body_text())),
        }
    }
}
