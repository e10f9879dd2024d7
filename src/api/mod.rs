//! REST API module.
//!
//! Handlers for every `/api` route, grouped by resource.

mod admin;
mod auth;
mod extract;
mod machines;
mod news;
mod search;
mod sensors;
mod tickets;
mod users;

pub use admin::*;
pub use auth::*;
pub use machines::*;
pub use news::*;
pub use search::*;
pub use sensors::*;
pub use tickets::*;
pub use users::*;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::errors::AppError;

pub(crate) use extract::{Json, Query};

/// `{ "success": true, "data": ... }` body returned by every handler.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        axum::Json(self).into_response()
    }
}

/// Handler result: the success envelope or an [`AppError`].
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Wrap `data` in the success envelope.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse {
        success: true,
        data,
    })
}
