//! # brigade-core
//!
//! Shared foundation for the Brigade control plane.
//!
//! This crate provides the types and pure logic used by every Brigade
//! component:
//!
//! - **Identifiers**: Strongly-typed Event and Project IDs
//! - **Data Model**: Projects, Events, Workers, and Jobs
//! - **Phase Graph**: The Worker/Job lifecycle state machine
//! - **Authorization Core**: Principals, roles, and the permission predicate
//! - **Workload Naming**: Idempotent pod/secret/volume names and labels
//! - **Error Types**: The seven error kinds shared across the wire
//!
//! ## Crate Boundary
//!
//! `brigade-core` is the only crate allowed to define shared primitives.
//! It performs no I/O: stores, queues, and the substrate live in their own
//! crates and speak these types.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod authz;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod naming;
pub mod observability;
pub mod phase;
pub mod project;
pub mod status;
pub mod worker;

pub use authz::{
    Principal, PrincipalGrants, PrincipalReference, PrincipalType, ProjectRole,
    ProjectRoleAssignment, ProjectRoleGrant, Role, RoleAssignment, RoleGrant, SCOPE_GLOBAL,
};
pub use error::{Error, Result};
pub use event::{Event, EventSelector, NewEvent};
pub use id::{EventId, ProjectId};
pub use job::{ContainerSpec, Job, JobHost, JobSpec, NewJob};
pub use phase::Phase;
pub use project::{Project, ProjectSpec, DEFAULT_WORKER_LIMIT};
pub use status::WorkloadStatus;
pub use worker::{Worker, WorkerSpec};
