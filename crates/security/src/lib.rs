//! Security module for Kestrel — path fencing and domain policy.
//!
//! Provides:
//! - **Path validation**: confine tool file access to a root directory
//! - **Domain policy**: blocked and preferred web domains

pub mod domain;
pub mod path;

pub use domain::{host_of, DomainPolicy};
pub use path::{resolve_within, PathValidationError};
