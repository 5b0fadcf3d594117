//! # blueprox-server
//!
//! HTTP server library for the blueprox proximity estimation engine.
//!
//! This library provides the API handlers, logging setup and state management; the
//! `blueprox-server` binary wires them to a listener and starts the monitor loop.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
