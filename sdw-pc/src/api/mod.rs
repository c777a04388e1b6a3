//! HTTP API
//!
//! Status, pump commands and debug injection under `/api`, plus an SSE
//! stream of control events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
