//! `wellcast-gateway`: HTTP surface of the Wellcast workflow scheduler.
//!
//! The binary in `main.rs` wires configuration, SQLite, the broker and the
//! beat loop; the router itself lives here so it can be driven in tests.

pub mod app;
pub mod auth;
pub mod http;

pub use app::{build_router, AppState};
