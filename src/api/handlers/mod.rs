//! HTTP handlers module

mod control;
mod devices;
mod records;
mod status;

pub use self::control::*;
pub use self::devices::*;
pub use self::records::*;
pub use self::status::*;

use axum::{http::header, response::IntoResponse};

/// GET /healthz - Liveness only
pub async fn healthz() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], "OK")
}
