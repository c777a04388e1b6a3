//! # SDW Common Library
//!
//! Shared code for the solar dewatering (SDW) services including:
//! - Error type and result alias
//! - Configuration loading, resolution and validation
//! - Clock abstraction (wall clock and manually driven clock for tests)
//! - Control event types (SdwEvent enum)

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
