//! # Runtime
//!
//! Process wiring: startup, the controller watch loop, the error policy and
//! the background watches that feed the index and the fan-out.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
pub mod watchers;
