//! The in-memory object graph.
//!
//! This module defines the `RszGraph` arena, its `RszInstance` nodes and the
//! algorithms that keep the instance list, the object table and the references
//! between instances consistent.

/// Cycle-safe deep copies.
pub mod clone;
/// Defines the `RszGraph` arena and its tables.
pub mod core;
/// Structural comparison.
pub mod equality;
/// Defines the `InstanceId` handle.
pub mod id;
/// Defines `RszInstance`, `RszValue` and `RszRef`.
pub mod instance;
/// Flatten / unflatten and table reconstruction.
pub mod rebuild;

pub use self::clone::CloneContext;
pub use self::core::RszGraph;
pub use id::InstanceId;
pub use instance::{RszInstance, RszRef, RszValue, UserData, STRUCT_INDEX, UNASSIGNED_INDEX};
