//! # brigade-server
//!
//! The Brigade API server: the authoritative state machine for Events,
//! Workers, and Jobs.
//!
//! Layering, bottom up:
//!
//! - [`store`]: persistence traits with CAS on Event versions, plus the
//!   in-memory implementation
//! - [`auth`]: bearer-token resolution and the authorization predicate
//! - [`watch`]: status-change fan-out for watch streams
//! - Services ([`events`], [`workers`], [`jobs`], [`projects`],
//!   [`roles`]): every legal mutation, one idempotent operation each
//! - [`api`] and [`server`]: the `/v2` HTTP binding
//! - [`local`]: in-process client adapters for single-process wiring

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod auth;
pub mod events;
pub mod jobs;
pub mod local;
pub mod metrics;
pub mod projects;
pub mod roles;
pub mod server;
pub mod store;
pub mod testing;
pub mod watch;
pub mod workers;

pub use server::{router, serve, AppState, VERSION};
