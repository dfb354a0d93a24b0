//! Defines the physical binary layout of an RSZ block.
//!
//! # Layout
//! All offsets are relative to the first byte of the block; every value is
//! little endian.
//!
//! ```text
//! [Header] [Object Table] (align 16) [Instance Infos] (align 16)
//! [UserData Infos + String Table] (align 16) [Instance Data] [Nested Blocks]
//! ```
//!
//! The userdata fields of the header and the userdata table only exist for
//! versions greater than 3. Version 3 and below pad every instance info with
//! 8 reserved bytes instead.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::{RszError, Result};
use crate::io::ByteCursor;

/// Magic number identifying an RSZ block: `"RSZ\0"`.
pub const RSZ_MAGIC: u32 = u32::from_le_bytes(*b"RSZ\0");

/// Versions up to this one use the legacy layout.
pub const LEGACY_VERSION_MAX: u32 = 3;

/// Returns true if `version` carries the userdata table.
pub fn has_userdata_table(version: u32) -> bool {
    version > LEGACY_VERSION_MAX
}

/// Hash stored in embedded userdata records created in memory.
pub fn path_hash(name: &str) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(name.as_bytes());
    hasher.finish() as u32
}

/// The fixed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RszHeader {
    /// Always [`RSZ_MAGIC`].
    pub magic: u32,
    /// Layout version.
    pub version: u32,
    /// Number of object table entries.
    pub object_count: i32,
    /// Number of instance descriptors, NULL sentinel included.
    pub instance_count: i32,
    /// Number of userdata records (v > 3 only).
    pub userdata_count: i64,
    /// Offset of the instance descriptor table.
    pub instance_offset: i64,
    /// Offset of the instance data section.
    pub data_offset: i64,
    /// Offset of the userdata table (v > 3 only).
    pub userdata_offset: i64,
}

impl RszHeader {
    /// Creates a zeroed header for `version`; offsets are patched after writing.
    pub fn new(version: u32) -> Self {
        Self {
            magic: RSZ_MAGIC,
            version,
            object_count: 0,
            instance_count: 0,
            userdata_count: 0,
            instance_offset: 0,
            data_offset: 0,
            userdata_offset: 0,
        }
    }

    /// Size of the header in bytes for `version`.
    pub fn size(version: u32) -> usize {
        if has_userdata_table(version) {
            48
        } else {
            32
        }
    }

    /// Reads and validates a header at the cursor position.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let magic = cursor.read_u32()?;
        if magic != RSZ_MAGIC {
            return Err(RszError::Format(format!("invalid RSZ magic {magic:#010x}")));
        }
        let version = cursor.read_u32()?;
        let object_count = cursor.read_i32()?;
        let instance_count = cursor.read_i32()?;
        let mut header = Self::new(version);
        header.object_count = object_count;
        header.instance_count = instance_count;
        if has_userdata_table(version) {
            header.userdata_count = cursor.read_i64()?;
        }
        header.instance_offset = cursor.read_i64()?;
        header.data_offset = cursor.read_i64()?;
        if has_userdata_table(version) {
            header.userdata_offset = cursor.read_i64()?;
        }
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.object_count < 0 || self.instance_count < 0 || self.userdata_count < 0 {
            return Err(RszError::Format(format!(
                "negative table count (objects {}, instances {}, userdata {})",
                self.object_count, self.instance_count, self.userdata_count
            )));
        }
        if self.instance_offset < 0 || self.data_offset < 0 || self.userdata_offset < 0 {
            return Err(RszError::Format("negative section offset".into()));
        }
        Ok(())
    }

    /// Writes the header at the cursor position.
    pub fn write(&self, cursor: &mut ByteCursor<'_>) {
        cursor.write_u32(self.magic);
        cursor.write_u32(self.version);
        cursor.write_i32(self.object_count);
        cursor.write_i32(self.instance_count);
        if has_userdata_table(self.version) {
            cursor.write_i64(self.userdata_count);
        }
        cursor.write_i64(self.instance_offset);
        cursor.write_i64(self.data_offset);
        if has_userdata_table(self.version) {
            cursor.write_i64(self.userdata_offset);
        }
    }
}

/// One entry of the instance descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Class type id (0 for the NULL sentinel).
    pub type_id: u32,
    /// Class layout checksum.
    pub crc: u32,
}

impl InstanceInfo {
    /// Size in bytes of one descriptor for `version`.
    pub fn size(version: u32) -> usize {
        if has_userdata_table(version) {
            8
        } else {
            16
        }
    }

    /// Reads one descriptor.
    pub fn read(cursor: &mut ByteCursor<'_>, version: u32) -> Result<Self> {
        let type_id = cursor.read_u32()?;
        let crc = cursor.read_u32()?;
        if !has_userdata_table(version) {
            cursor.read_u64()?;
        }
        Ok(Self { type_id, crc })
    }

    /// Writes one descriptor.
    pub fn write(&self, cursor: &mut ByteCursor<'_>, version: u32) {
        cursor.write_u32(self.type_id);
        cursor.write_u32(self.crc);
        if !has_userdata_table(version) {
            cursor.write_u64(0);
        }
    }
}

/// One entry of the userdata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDataInfo {
    /// Record pointing at an external resource path.
    External {
        /// Index of the indirected instance.
        instance_id: i32,
        /// Its class type id.
        type_id: u32,
        /// Resource path, stored in the string table.
        path: String,
    },
    /// Legacy record embedding a nested RSZ block.
    Embedded {
        /// Index of the indirected instance.
        instance_id: i32,
        /// Its class type id.
        type_id: u32,
        /// Hash identifying the embedded resource.
        path_hash: u32,
        /// Byte size of the nested block.
        data_size: u32,
        /// Offset of the nested block, relative to the owning block.
        rsz_offset: i64,
    },
}

impl UserDataInfo {
    /// Size of an external record.
    pub const EXTERNAL_SIZE: usize = 16;
    /// Size of an embedded record.
    pub const EMBEDDED_SIZE: usize = 24;

    /// Index of the instance this record belongs to.
    pub fn instance_id(&self) -> i32 {
        match self {
            Self::External { instance_id, .. } | Self::Embedded { instance_id, .. } => *instance_id,
        }
    }

    /// Type id recorded for the instance.
    pub fn type_id(&self) -> u32 {
        match self {
            Self::External { type_id, .. } | Self::Embedded { type_id, .. } => *type_id,
        }
    }

    /// Reads an external record; `base` is the block start used to resolve
    /// the string offset.
    pub fn read_external(cursor: &mut ByteCursor<'_>, base: u64) -> Result<Self> {
        let instance_id = cursor.read_i32()?;
        let type_id = cursor.read_u32()?;
        let path_offset = cursor.read_u64()?;
        let path_pos = base
            .checked_add(path_offset)
            .ok_or_else(|| RszError::Format(format!("userdata path offset {path_offset} overflows")))?;
        let path = cursor.read_utf16z_at(path_pos)?;
        Ok(Self::External {
            instance_id,
            type_id,
            path,
        })
    }

    /// Reads an embedded record.
    pub fn read_embedded(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(Self::Embedded {
            instance_id: cursor.read_i32()?,
            type_id: cursor.read_u32()?,
            path_hash: cursor.read_u32()?,
            data_size: cursor.read_u32()?,
            rsz_offset: cursor.read_i64()?,
        })
    }

    /// Writes the record. External paths go into the cursor's deferred string
    /// table; flush it before the data section.
    pub fn write(&self, cursor: &mut ByteCursor<'_>) {
        match self {
            Self::External {
                instance_id,
                type_id,
                path,
            } => {
                cursor.write_i32(*instance_id);
                cursor.write_u32(*type_id);
                cursor.write_string_offset(path);
            }
            Self::Embedded {
                instance_id,
                type_id,
                path_hash,
                data_size,
                rsz_offset,
            } => {
                cursor.write_i32(*instance_id);
                cursor.write_u32(*type_id);
                cursor.write_u32(*path_hash);
                cursor.write_u32(*data_size);
                cursor.write_i64(*rsz_offset);
            }
        }
    }
}
