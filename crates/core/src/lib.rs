//! `consign-core`: shared building blocks for the dispatch workspace.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the product value object and the domain error model.

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, ConsignmentId, CourierId};
pub use value_object::{ProductRef, ValueObject};
