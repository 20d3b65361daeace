use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name to human readable message.
pub type FieldErrors = BTreeMap<String, String>;

/// Message of an internal error, carried on the 500 response for
/// [`attach_error_details`] to reveal.
#[derive(Debug, Clone)]
pub struct InternalErrorDetails(pub String);

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("2FA token required")]
    TwoFactorRequired,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::TwoFactorRequired => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(errors) => json!({ "errors": errors }),
            AppError::TwoFactorRequired => json!({
                "error": self.to_string(),
                "requiresTwoFactor": true,
            }),
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                let mut response = (status, Json(json!({ "error": "Internal server error" })))
                    .into_response();
                response
                    .extensions_mut()
                    .insert(InternalErrorDetails(e.to_string()));
                return response;
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Rewrites 500 bodies to include the error message when `expose` is set.
/// Without this layer internal errors stay opaque.
pub async fn attach_error_details(
    State(expose): State<bool>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !expose {
        return response;
    }
    match response.extensions().get::<InternalErrorDetails>().cloned() {
        Some(InternalErrorDetails(details)) => (
            response.status(),
            Json(json!({ "error": "Internal server error", "details": details })),
        )
            .into_response(),
        None => response,
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use axum_test::TestServer;
    use serde_json::Value;

    async fn failing() -> AppResult<()> {
        Err(anyhow::anyhow!("disk on fire").into())
    }

    fn server(expose: bool) -> TestServer {
        let app = Router::new()
            .route("/fail", get(failing))
            .layer(middleware::from_fn_with_state(expose, attach_error_details));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn details_follow_each_router_setting() {
        let production = server(false);
        let development = server(true);

        let exposed = development.get("/fail").await;
        let hidden = production.get("/fail").await;

        hidden.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body = hidden.json::<Value>();
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("details").is_none());

        exposed.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(exposed.json::<Value>()["details"], "disk on fire");
    }

    #[tokio::test]
    async fn client_errors_are_untouched() {
        let app = Router::new()
            .route(
                "/missing",
                get(|| async { Err::<(), _>(AppError::NotFound("Mission")) }),
            )
            .layer(middleware::from_fn_with_state(true, attach_error_details));
        let response = TestServer::new(app).unwrap().get("/missing").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>(), json!({ "error": "Mission not found" }));
    }
}
