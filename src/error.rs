//! Centralized error handling for rszgraph.
//!
//! Every fallible operation in the crate returns [`Result`]. Library code never
//! panics on malformed input: truncated buffers, bad counts and dangling indices
//! all surface as an [`RszError`].
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`RszError::Io`]): file system and memory-map failures.
//! - **Schema Errors** ([`RszError::Schema`]): the registry could not be loaded or
//!   has no entry for a requested class.
//! - **Serialization Errors** ([`RszError::Serialization`]): JSON or bincode
//!   failures while loading/saving registry data.
//! - **Format Errors** ([`RszError::Format`]): the block is not a valid RSZ graph.
//! - **Inference Conflicts** ([`RszError::InferenceConflict`]): an ambiguous field
//!   classified inconsistently within a single array.
//! - **Misclassification** ([`RszError::Misclassified`]): an inferred reference
//!   failed validation. The read driver recovers from this one by restarting.
//! - **Write Errors** ([`RszError::Write`]): the in-memory graph cannot be encoded.
//! - **Internal Errors** ([`RszError::Internal`]): invalid handles or broken graph
//!   invariants.
//!
//! ## Usage
//!
//! ```rust
//! use rszgraph::{Rsz, RszError, SchemaRegistry};
//!
//! let registry = SchemaRegistry::new();
//! match Rsz::read_bytes(b"nope", &registry) {
//!     Err(RszError::Format(msg)) => println!("not an RSZ block: {msg}"),
//!     Err(e) => println!("other error: {e}"),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for rszgraph operations.
pub type Result<T> = std::result::Result<T, RszError>;

/// The master error enum covering all failure domains of the codec.
///
/// The type is `Clone` so the read driver can inspect a recoverable error and
/// still hand it back unchanged. I/O errors are wrapped in `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum RszError {
    /// Low-level I/O failure (file not found, permission denied, mmap failure).
    Io(Arc<io::Error>),

    /// The schema registry is missing a class, or its source document is invalid.
    Schema(String),

    /// JSON or bincode encoding/decoding failure of registry data.
    Serialization(String),

    /// The binary block does not conform to the RSZ layout.
    ///
    /// ## Common Causes
    ///
    /// - Wrong magic bytes (not `RSZ\0`)
    /// - Unknown type id in the instance descriptor table
    /// - Array or string count out of the sanity bound
    /// - Malformed userdata region
    /// - Truncated block
    /// - A declared reference field pointing forward or out of range
    Format(String),

    /// An ambiguous field was classified as a reference for one element of an
    /// array and as a float for another.
    InferenceConflict {
        /// Class owning the field.
        class: String,
        /// Field name.
        field: String,
    },

    /// An inferred reference field failed the backward-reference check during
    /// unflatten. The field has already been reset to a plain integer; the read
    /// must be restarted from scratch.
    Misclassified {
        /// Class owning the field.
        class: String,
        /// Field name.
        field: String,
    },

    /// The in-memory graph cannot be written (value/type mismatch, reference to an
    /// instance absent from the instance list, struct class mismatch).
    Write(String),

    /// Logic error: invalid instance handle or broken internal invariant.
    Internal(String),
}

impl RszError {
    /// Returns true if the error only asks for the read to be restarted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Misclassified { .. })
    }
}

impl fmt::Display for RszError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Schema(s) => write!(f, "Schema Error: {s}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::InferenceConflict { class, field } => write!(
                f,
                "Inference Conflict: {class}.{field} classified inconsistently across array elements"
            ),
            Self::Misclassified { class, field } => {
                write!(f, "Misclassified Field: {class}.{field} is not a reference")
            }
            Self::Write(s) => write!(f, "Write Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for RszError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RszError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for RszError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
