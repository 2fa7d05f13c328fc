//! Command handlers.
//!
//! Each handler takes the [`CliContext`](crate::CliContext), drives the tool
//! service and formats the outcome for the terminal. Servers are always
//! stopped before a handler returns.

pub mod call;
pub mod servers;
pub mod tools;
