//! Local test API
//!
//! Serves the job handler over HTTP in the shape of the serverless runtime's
//! local test server, so a worker can be exercised without the job queue.

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, create_router};
