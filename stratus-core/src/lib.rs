//! Stratus Core
//!
//! Provider-agnostic building blocks for managing cloud resources:
//! identifiers, attribute schemas, named locks and completion pollers.

pub mod identifier;
pub mod lock;
pub mod poller;
pub mod provider;
pub mod resource;
pub mod schema;
