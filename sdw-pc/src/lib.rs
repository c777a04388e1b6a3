//! sdw-pc: solar dewatering pump controller
//!
//! Simulated tank, weather feed and pump predictor driven by a periodic
//! control loop, with an HTTP API for status and manual control.

pub mod api;
pub mod control_loop;
pub mod error;
pub mod policy;
pub mod predictor;
pub mod simulation;
pub mod state;
pub mod weather;

pub use error::{ApiError, Error, Result};
