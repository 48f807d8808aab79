//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, timing)
//!     → security (rate limit, API key)
//!     → handlers.rs / admin (aggregate, records, refresh, logs)
//!     → error.rs (JSON error bodies)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::{X_REQUEST_ID, X_RESPONSE_TIME_MS};
pub use server::{build_router, AppState, HttpServer};
