//! Thin control API for the crawler control plane.

pub mod error;
pub mod routes;

pub use routes::create_router;
