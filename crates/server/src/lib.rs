//! Hopper upload server library.
//!
//! Exposes the session manager, HTTP routes, and lifecycle sweeper so
//! integration tests and the binary share one wiring path.

pub mod error;
pub mod handlers;
pub mod manager;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use error::{ApiError, ApiResult};
pub use manager::UploadManager;
pub use routes::create_router;
pub use state::AppState;
