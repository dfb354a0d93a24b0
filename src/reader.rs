//! The Read-Side Engine.
//!
//! Decodes an RSZ block into an [`RszGraph`]: header, object table, instance
//! descriptors, userdata records (recursing into embedded blocks), then the
//! sequential instance payloads, and finally reference resolution.
//!
//! Ambiguous fields are classified speculatively while decoding. When
//! resolution proves a classification wrong, the field is demoted in the
//! registry and the whole block is decoded again: [`RszGraph::try_read`] reports
//! that as [`ReadOutcome::NeedsSchemaRetry`], [`RszGraph::read`] loops on it.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::codec::{self, DecodeContext};
use crate::constants::MAX_EMBEDDED_DEPTH;
use crate::error::{RszError, Result};
use crate::format::{has_userdata_table, InstanceInfo, RszHeader, UserDataInfo};
use crate::graph::{RszGraph, RszInstance, UserData};
use crate::io::ByteCursor;
use crate::options::{RszOptions, UserDataLayout};
use crate::schema::SchemaRegistry;

/// Result of one decode pass.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The block decoded and every reference resolved.
    Complete(RszGraph),
    /// An inferred reference field failed validation and has been demoted to an
    /// integer; decoding the block again will use the corrected type.
    NeedsSchemaRetry {
        /// Class owning the field.
        class: String,
        /// The demoted field.
        field: String,
    },
}

impl RszGraph {
    /// Decodes the block starting at `offset`, restarting when a speculative
    /// field classification turns out wrong (at most
    /// [`RszOptions::max_schema_retries`] times).
    pub fn read(
        cursor: &mut ByteCursor<'_>,
        offset: u64,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<Self> {
        read_nested(cursor, offset, registry, options, 0)
    }

    /// Runs a single decode pass.
    pub fn try_read(
        cursor: &mut ByteCursor<'_>,
        offset: u64,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<ReadOutcome> {
        try_read_nested(cursor, offset, registry, options, 0)
    }
}

/// Retry loop shared by top-level reads and embedded blocks at `depth`.
fn read_nested(
    cursor: &mut ByteCursor<'_>,
    offset: u64,
    registry: &SchemaRegistry,
    options: RszOptions,
    depth: usize,
) -> Result<RszGraph> {
    let mut retries = 0;
    loop {
        match try_read_nested(cursor, offset, registry, options, depth)? {
            ReadOutcome::Complete(graph) => return Ok(graph),
            ReadOutcome::NeedsSchemaRetry { class, field } => {
                if retries >= options.max_schema_retries {
                    return Err(RszError::Format(format!(
                        "gave up after {retries} schema retries (last demoted {class}.{field})"
                    )));
                }
                retries += 1;
                tracing::warn!(%class, %field, retries, "restarting decode after misclassification");
            }
        }
    }
}

fn try_read_nested(
    cursor: &mut ByteCursor<'_>,
    offset: u64,
    registry: &SchemaRegistry,
    options: RszOptions,
    depth: usize,
) -> Result<ReadOutcome> {
    match decode_block(cursor, offset, registry, options, depth) {
        Ok(graph) => Ok(ReadOutcome::Complete(graph)),
        Err(RszError::Misclassified { class, field }) => {
            Ok(ReadOutcome::NeedsSchemaRetry { class, field })
        }
        Err(e) => Err(e),
    }
}

fn format_err(msg: impl Into<String>) -> RszError {
    RszError::Format(msg.into())
}

fn section(base: u64, offset: i64, what: &str) -> Result<u64> {
    u64::try_from(offset)
        .ok()
        .and_then(|o| base.checked_add(o))
        .ok_or_else(|| format_err(format!("{what} offset {offset} is invalid")))
}

fn decode_block(
    cursor: &mut ByteCursor<'_>,
    base: u64,
    registry: &SchemaRegistry,
    options: RszOptions,
    depth: usize,
) -> Result<RszGraph> {
    cursor.seek(base)?;
    let header = RszHeader::read(cursor)?;
    let version = header.version;
    let available = cursor.len() as u64;

    // Counts come straight from the file; bound them by the buffer before
    // allocating anything.
    let object_count = header.object_count as u64;
    let instance_count = header.instance_count as u64;
    if object_count * 4 > available
        || instance_count * InstanceInfo::size(version) as u64 > available
        || (header.userdata_count as u64).saturating_mul(UserDataInfo::EXTERNAL_SIZE as u64) > available
    {
        return Err(format_err(format!(
            "table counts exceed the buffer (objects {object_count}, instances {instance_count}, userdata {})",
            header.userdata_count
        )));
    }

    let object_table = cursor.read_i32_seq(object_count as usize)?;

    cursor.seek(section(base, header.instance_offset, "instance table")?)?;
    let infos = (0..instance_count)
        .map(|_| InstanceInfo::read(cursor, version))
        .collect::<Result<Vec<_>>>()?;
    match infos.first() {
        Some(info) if info.type_id == 0 => {}
        Some(info) => {
            return Err(format_err(format!(
                "instance 0 must be the NULL sentinel, found type {:#x}",
                info.type_id
            )))
        }
        None => return Err(format_err("instance table is empty")),
    }

    let mut classes = Vec::with_capacity(infos.len());
    for (index, info) in infos.iter().enumerate() {
        let class = registry.class_by_type_id(info.type_id).ok_or_else(|| {
            format_err(format!("instance {index}: unknown type id {:#x}", info.type_id))
        })?;
        if index > 0 && class.crc != info.crc {
            tracing::warn!(
                class = %class.name,
                expected = class.crc,
                found = info.crc,
                "class checksum mismatch"
            );
        }
        classes.push(class);
    }

    let userdata_infos = if has_userdata_table(version) && header.userdata_count > 0 {
        cursor.seek(section(base, header.userdata_offset, "userdata table")?)?;
        read_userdata_table(cursor, base, header.userdata_count as usize, &infos, options)?
    } else {
        Vec::new()
    };

    let mut user_data: Vec<Option<UserData>> = vec![None; infos.len()];
    for record in &userdata_infos {
        let slot = record.instance_id() as usize;
        user_data[slot] = Some(match record {
            UserDataInfo::External { path, .. } => UserData::External { path: path.clone() },
            UserDataInfo::Embedded {
                path_hash,
                data_size,
                rsz_offset,
                ..
            } => {
                let nested_base = section(base, *rsz_offset, "embedded block")?;
                // Nested blocks live after their parent's header, so every
                // level moves strictly forward through the buffer.
                if nested_base <= base {
                    return Err(format_err(format!(
                        "embedded block at {nested_base} does not follow its parent block at {base}"
                    )));
                }
                if nested_base.saturating_add(u64::from(*data_size)) > available {
                    return Err(format_err(format!(
                        "embedded block at {nested_base} ({data_size} bytes) exceeds the buffer"
                    )));
                }
                if depth >= MAX_EMBEDDED_DEPTH {
                    return Err(format_err(format!(
                        "embedded blocks nested deeper than {MAX_EMBEDDED_DEPTH} levels"
                    )));
                }
                let nested = cursor.read_at(nested_base, |c| {
                    read_nested(c, nested_base, registry, options, depth + 1)
                })?;
                UserData::Embedded {
                    path_hash: *path_hash,
                    graph: Box::new(nested),
                }
            }
        });
    }

    let mut graph = RszGraph::new(registry, options);
    graph.version = version;
    cursor.seek(section(base, header.data_offset, "data")?)?;
    for (index, (class, payload)) in classes.into_iter().zip(user_data).enumerate().skip(1) {
        let owner_index = index as i32;
        let mut instance = match payload {
            Some(ud) => RszInstance::new_user_data(class, ud),
            None => {
                let ctx = DecodeContext {
                    registry,
                    options,
                    owner_index,
                };
                let values = codec::read_values(cursor, &class, ctx)?;
                RszInstance::new(class, values)
            }
        };
        instance.index = owner_index;
        let id = graph.alloc(instance)?;
        graph.instance_list.push(id);
    }
    graph.instance_infos = infos;
    graph.userdata_infos = userdata_infos;

    for (position, entry) in object_table.iter().enumerate() {
        let id = usize::try_from(*entry)
            .ok()
            .filter(|i| *i > 0)
            .and_then(|i| graph.instance_list.get(i).copied())
            .ok_or_else(|| format_err(format!("object table entry {position} points at {entry}")))?;
        graph.get_mut(id)?.object_table_index = position as i32;
        graph.object_list.push(id);
    }
    graph.object_table = object_table;

    graph.unflatten()?;
    tracing::debug!(
        base,
        version,
        instances = graph.instance_list.len(),
        objects = graph.object_list.len(),
        userdata = graph.userdata_infos.len(),
        "decoded RSZ block"
    );
    Ok(graph)
}

fn read_userdata_table(
    cursor: &mut ByteCursor<'_>,
    base: u64,
    count: usize,
    infos: &[InstanceInfo],
    options: RszOptions,
) -> Result<Vec<UserDataInfo>> {
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let record = match options.userdata_layout {
            UserDataLayout::External => UserDataInfo::read_external(cursor, base)?,
            UserDataLayout::Embedded => UserDataInfo::read_embedded(cursor)?,
        };
        let index = record.instance_id();
        let info = usize::try_from(index)
            .ok()
            .filter(|i| *i > 0)
            .and_then(|i| infos.get(i))
            .ok_or_else(|| format_err(format!("userdata record points at instance {index}")))?;
        if info.type_id != record.type_id() {
            return Err(format_err(format!(
                "userdata record for instance {index} has type {:#x}, descriptor says {:#x}",
                record.type_id(),
                info.type_id
            )));
        }
        records.push(record);
    }
    Ok(records)
}

/// A memory-mapped file holding one or more RSZ blocks.
#[derive(Debug)]
pub struct RszReader {
    mmap: Arc<Mmap>,
}

impl RszReader {
    /// Maps a file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the map is read-only; concurrent external modification of the
        // file is outside our control, as with any mmap reader.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
        })
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// File size in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// True for an empty file.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Decodes the block starting at `offset`, borrowing the mapped bytes.
    pub fn read_graph(
        &self,
        offset: u64,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<RszGraph> {
        let mut cursor = ByteCursor::from_slice(&self.mmap);
        RszGraph::read(&mut cursor, offset, registry, options)
    }

    /// Returns the header of the block at `offset` without decoding it.
    pub fn header_at(&self, offset: u64) -> Result<RszHeader> {
        let mut cursor = ByteCursor::from_slice(&self.mmap);
        cursor.seek(offset)?;
        RszHeader::read(&mut cursor)
    }
}

