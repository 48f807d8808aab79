//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_ip.rs (who is this, honoring trusted proxies only)
//!     → rate_limit.rs (fixed window per client, 429 when exhausted)
//!     → auth.rs (API key on data and admin routes, 401 when missing)
//!     → handlers
//!     → headers.rs (security headers on the way out)
//! ```
//!
//! # Design Decisions
//! - Rate limiting runs before auth so unauthenticated floods are counted too
//! - No trust in forwarding headers from untrusted peers
//! - The API key is never kept in plain text after startup

pub mod auth;
pub mod client_ip;
pub mod headers;
pub mod rate_limit;

pub use auth::{api_key_middleware, extract_api_key, ApiKeyVerifier, X_API_KEY};
pub use client_ip::ClientIdentityResolver;
pub use headers::apply_security_headers;
pub use rate_limit::{rate_limit_middleware, FixedWindowLimiter, RateDecision, RateLimitState};
