//! # classbeacon-server
//!
//! HTTP server library for classbeacon: the API handlers, shared state and
//! logging setup used by the `classbeacon-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
