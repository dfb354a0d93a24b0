//! Codec configuration.

use crate::constants::{
    DEFAULT_BACKREF_WINDOW, DEFAULT_MAX_ARRAY_LEN, DEFAULT_MAX_SCHEMA_RETRIES,
    DEFAULT_MAX_STRING_LEN, DEFAULT_VERSION,
};

/// On-disk shape of the userdata table (only present when the header version is
/// greater than 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserDataLayout {
    /// Each record points at an external resource path stored in a UTF-16
    /// string table right after the records.
    #[default]
    External,
    /// Legacy shape: each record embeds a complete nested RSZ block, stored
    /// after the data section and decoded recursively.
    Embedded,
}

/// Configuration shared by the read and write paths.
///
/// Kept small and `Copy` so it can be threaded through nested (embedded) graph
/// reads without borrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RszOptions {
    /// Header version stamped on graphs created in memory. Read graphs keep the
    /// version found in their header.
    pub version: u32,
    /// Shape of the userdata table.
    pub userdata_layout: UserDataLayout,
    /// Upper bound for array element counts.
    pub max_array_len: usize,
    /// Upper bound for string lengths (in code units).
    pub max_string_len: usize,
    /// Maximum number of full-file restarts caused by misclassified fields.
    pub max_schema_retries: usize,
    /// How far back (in instance indices) an ambiguous value may point to still
    /// be considered a reference.
    pub backref_window: i32,
}

impl Default for RszOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            userdata_layout: UserDataLayout::External,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_schema_retries: DEFAULT_MAX_SCHEMA_RETRIES,
            backref_window: DEFAULT_BACKREF_WINDOW,
        }
    }
}

impl RszOptions {
    /// Options for blocks whose userdata records embed nested graphs.
    pub fn embedded() -> Self {
        Self {
            userdata_layout: UserDataLayout::Embedded,
            ..Self::default()
        }
    }

    /// Returns a copy with a different header version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}
