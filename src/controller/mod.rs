//! # Controller
//!
//! Core controller modules for the Cached Certificate Controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `fanout`: Marks dependents Pending when an upstream secret rotates
//! - `index`: Upstream Certificate to request secondary index
//! - `materialize`: Target secret construction and write planning
//! - `naming`: Upstream Certificate name derivation
//! - `reconciler`: Core reconciliation logic

pub mod backoff;
pub mod fanout;
pub mod index;
pub mod materialize;
pub mod naming;
pub mod reconciler;
