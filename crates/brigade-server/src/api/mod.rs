//! The HTTP surface: `/v2` routes, authentication extraction, and error
//! mapping.

pub mod context;
pub mod error;
pub mod events;
pub mod jobs;
pub mod projects;
pub mod system;
pub mod workers;
