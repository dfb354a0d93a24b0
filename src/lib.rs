//! # rszgraph
//!
//! A schema-driven codec for RSZ blocks: the binary object graphs embedded in
//! game resource files (scenes, prefabs, user files).
//!
//! ## Overview
//!
//! An RSZ block carries no type information beyond a numeric type id per
//! instance. The meaning of every byte comes from an external schema, the
//! [`SchemaRegistry`], which maps type ids to classes and classes to ordered
//! field descriptors (type, size, alignment, array flag). The codec walks the
//! schema to decode each instance's payload, then rebuilds the references
//! between instances into an in-memory graph that can be inspected, mutated,
//! cloned and written back.
//!
//! ### Key Features
//!
//! *   **Arena Graph:** Instances live in an arena owned by [`RszGraph`] and
//!     reference each other through stable [`InstanceId`] handles, so shared
//!     and cyclic references need no reference counting.
//! *   **Type Inference:** Untyped 4-byte fields are classified as reference,
//!     float or integer on first sight. A wrong guess is detected while
//!     resolving references, the field is demoted and the block decoded again.
//! *   **Userdata Indirection:** Instances whose payload lives in an external
//!     resource, or in a nested RSZ block decoded recursively.
//! *   **Topological Write:** The instance list is rebuilt children-first from
//!     the object table roots; unreachable instances are pruned.
//! *   **Cycle-Safe Clones:** [`CloneContext`] keeps shared children shared
//!     across a batch of clones.
//!
//! ## Architecture
//!
//! ### Block Layout
//!
//! ```text
//! [Header] [Object Table] [Instance Infos] [UserData Infos + Strings] [Instance Data] [Nested Blocks]
//! ```
//!
//! Every offset is relative to the start of the block. See [`format`] for the
//! exact layout of each section.
//!
//! ### Read Flow
//!
//! header → object table → instance descriptors (one registry lookup each) →
//! userdata records → sequential payload decode → reference resolution
//! (`unflatten`). Writing mirrors the flow, optionally after
//! [`RszGraph::rebuild_instance_list`].
//!
//! ## Usage Patterns
//!
//! ### Reading and writing
//!
//! ```rust,ignore
//! use rszgraph::{Rsz, SchemaRegistry};
//!
//! let registry = SchemaRegistry::from_json_file("rsz_schema.json")?;
//! let mut graph = Rsz::load("scene.rsz", &registry)?;
//!
//! for root in graph.object_list() {
//!     println!("{}", graph.get(*root)?.class_name());
//! }
//! Rsz::save("scene.out.rsz", &mut graph)?;
//! ```
//!
//! ### Building a graph
//!
//! ```rust,ignore
//! use rszgraph::{RszGraph, RszOptions, RszRef, RszValue};
//!
//! let mut graph = RszGraph::new(&registry, RszOptions::default());
//! let child = graph.create_instance("app.Transform")?;
//! let root = graph.create_instance("app.GameObject")?;
//! graph.get_mut(root)?.set_field("transform", RszValue::Ref(RszRef::Node(child)))?;
//! graph.add_to_object_table(root)?;
//! let bytes = rszgraph::Rsz::write_bytes(&mut graph)?;
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` block maps files in [`RszReader`].
//! * **No Panics:** malformed input never panics; counts are bounded by the
//!   buffer size and by [`RszOptions`].
//! * **Comprehensive Errors:** all failures correspond to an [`RszError`].
//! * **Shared Schema State:** inference results are stored in the registry's
//!   field descriptors. A registry is single-threaded (`!Sync`); call
//!   [`SchemaRegistry::freeze`] once a representative file has been decoded to
//!   stop further mutation.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod error;
pub mod format;
pub mod inspector;
pub mod options;
pub mod reader;
pub mod schema;
pub mod writer;

// --- INTERNAL IMPLEMENTATION MODULES ---
pub mod graph;
#[doc(hidden)]
pub mod io;

// Private modules
mod codec;

// --- RE-EXPORTS ---

pub use api::Rsz;
pub use error::{Result, RszError};
pub use graph::{
    CloneContext, InstanceId, RszGraph, RszInstance, RszRef, RszValue, UserData, STRUCT_INDEX,
    UNASSIGNED_INDEX,
};
pub use inspector::{DebugReport, RszInspector};
pub use io::ByteCursor;
pub use options::{RszOptions, UserDataLayout};
pub use reader::{ReadOutcome, RszReader};
pub use schema::{RszClass, RszField, RszFieldType, SchemaRegistry};

/// Constants used throughout the library.
pub mod constants {
    /// Header version stamped on graphs created in memory.
    pub const DEFAULT_VERSION: u32 = 16;
    /// Upper bound for array element counts.
    pub const DEFAULT_MAX_ARRAY_LEN: usize = 32 * 1024;
    /// Upper bound for string lengths, in code units.
    pub const DEFAULT_MAX_STRING_LEN: usize = 1024 * 1024;
    /// Full-file restarts allowed per read.
    pub const DEFAULT_MAX_SCHEMA_RETRIES: usize = 16;
    /// Maximum backward distance of a value still classified as a reference.
    pub const DEFAULT_BACKREF_WINDOW: i32 = 101;
    /// Deepest chain of embedded userdata blocks a read will follow.
    pub const MAX_EMBEDDED_DEPTH: usize = 16;
}
