//! # Lockout Axum Integration
//!
//! Axum middleware that refuses requests from locked source addresses, and a
//! rejection type that renders lockout decisions as HTTP responses.
//!
//! - Locked address: `429 Too Many Requests` with `Retry-After` and a JSON body
//!   describing the lock
//! - Lockout storage unavailable: `503 Service Unavailable` (never let through)
//! - Anything else: `500 Internal Server Error`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::{net::SocketAddr, sync::Arc};
//! use axum::{Router, middleware::from_fn_with_state, routing::post};
//! use lockout::{LoginGuardBuilder, SqliteRepositoryProvider};
//! use lockout_axum::{GuardState, address_lockout};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let guard = Arc::new(
//!         LoginGuardBuilder::new()
//!             .with_sqlite("sqlite://lockout.db?mode=rwc")
//!             .await?
//!             .apply_migrations(true)
//!             .build()
//!             .await?,
//!     );
//!     let _sweepers = guard.start_sweepers();
//!
//!     let app = Router::new()
//!         .route("/login", post(login_handler))
//!         .layer(from_fn_with_state(
//!             GuardState::new(guard),
//!             address_lockout::<SqliteRepositoryProvider>,
//!         ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//!
//! async fn login_handler() -> &'static str {
//!     "Address not locked"
//! }
//! ```

mod error;
mod middleware;

pub use error::{LockoutRejection, Result};
pub use middleware::{GuardState, address_lockout, client_address};
