//! HTTP ingress subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id / trace / timeout / body limit layers)
//!     → request.rs (HTTP parts → IngressRequest + InvocationContext)
//!     → IngressStage::respond
//!     → response.rs (IngressResponse → JSON + CORS header)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{build_router, AppState, HttpServer};
