//! REST API layer.

mod error;
mod rest;

pub use error::{ApiError, ErrorCode};
pub use rest::router;
