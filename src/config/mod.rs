//! # Configuration
//!
//! Process-wide settings, fixed at start.

mod controller;

pub use controller::ControllerConfig;
