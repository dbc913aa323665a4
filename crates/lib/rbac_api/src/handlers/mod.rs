//! Request handlers.

pub mod apis;
pub mod auth;
pub mod health;
pub mod me;
pub mod roles;

use axum::extract::FromRequest;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// JSON extractor and response whose rejections use the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl<T: serde::Serialize> IntoResponse for AppJson<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}
