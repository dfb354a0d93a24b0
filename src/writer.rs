//! The Write-Side Engine.
//!
//! Encodes an [`RszGraph`] as an RSZ block. The header is written twice: once
//! as a placeholder to reserve its space, and again at the end once every
//! section offset is known. Embedded userdata blocks are appended after the
//! data section and their records patched in place.

use crate::codec;
use crate::error::{RszError, Result};
use crate::format::{has_userdata_table, RszHeader, UserDataInfo};
use crate::graph::{InstanceId, RszGraph, RszRef, UserData};
use crate::io::ByteCursor;

/// Section alignment inside a block.
const SECTION_ALIGN: usize = 16;

/// Byte offsets of `data_size` and `rsz_offset` inside an embedded record.
const EMBEDDED_SIZE_FIELD: u64 = 12;
const EMBEDDED_OFFSET_FIELD: u64 = 16;

fn relative(pos: u64, base: u64) -> Result<i64> {
    pos.checked_sub(base)
        .and_then(|d| i64::try_from(d).ok())
        .ok_or_else(|| RszError::Internal(format!("position {pos} lies before block base {base}")))
}

impl RszGraph {
    /// Writes the graph as an RSZ block starting at `offset`, leaving the cursor
    /// at the end of the block.
    ///
    /// The descriptor and userdata tables are regenerated from the current
    /// instance list first. The instance list itself is written as it is; call
    /// [`RszGraph::rebuild_instance_list`] beforehand if the graph was mutated
    /// in a way that invalidated it. Every referenced instance must be listed.
    pub fn write(&mut self, cursor: &mut ByteCursor<'_>, offset: u64) -> Result<()> {
        self.rebuild_instance_info(false)?;
        let version = self.version;
        if !has_userdata_table(version) && !self.userdata_infos.is_empty() {
            return Err(RszError::Write(format!(
                "version {version} has no userdata table, but {} instances need one",
                self.userdata_infos.len()
            )));
        }

        let count = |n: usize, what: &str| {
            i32::try_from(n).map_err(|_| RszError::Write(format!("too many {what}: {n}")))
        };
        let mut header = RszHeader::new(version);
        header.object_count = count(self.object_table.len(), "objects")?;
        header.instance_count = count(self.instance_list.len(), "instances")?;
        header.userdata_count = self.userdata_infos.len() as i64;

        cursor.seek(offset)?;
        header.write(cursor);
        cursor.write_i32_seq(&self.object_table);

        cursor.align_write(SECTION_ALIGN);
        header.instance_offset = relative(cursor.tell(), offset)?;
        for info in &self.instance_infos {
            info.write(cursor, version);
        }

        let mut record_positions = Vec::with_capacity(self.userdata_infos.len());
        if has_userdata_table(version) {
            cursor.align_write(SECTION_ALIGN);
            header.userdata_offset = relative(cursor.tell(), offset)?;
            for record in &self.userdata_infos {
                record_positions.push(cursor.tell());
                record.write(cursor);
            }
            cursor.flush_string_table(offset)?;
        }

        cursor.align_write(SECTION_ALIGN);
        header.data_offset = relative(cursor.tell(), offset)?;
        let resolve = |reference: RszRef| -> Result<i32> {
            match reference {
                RszRef::Raw(index) => Ok(index),
                RszRef::Node(id) if self.is_listed(id) => self.get(id).map(|node| node.index),
                RszRef::Node(id) => Err(RszError::Write(format!(
                    "reference to {id} ({}), which is not in the instance list",
                    self.get(id).map(|n| n.class_name().to_owned()).unwrap_or_default()
                ))),
            }
        };
        for id in &self.instance_list {
            let node = self.get(*id)?;
            if node.is_null() || node.is_user_data() {
                continue;
            }
            codec::write_values(cursor, node, &resolve)?;
        }

        self.write_embedded_blocks(cursor, offset, &record_positions)?;

        let end = cursor.tell();
        cursor.seek(offset)?;
        header.write(cursor);
        cursor.seek(end)?;
        tracing::debug!(
            offset,
            version,
            bytes = end - offset,
            instances = self.instance_list.len(),
            objects = self.object_list.len(),
            "wrote RSZ block"
        );
        Ok(())
    }

    fn write_embedded_blocks(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        offset: u64,
        record_positions: &[u64],
    ) -> Result<()> {
        let embedded: Vec<(usize, InstanceId)> = self
            .userdata_infos
            .iter()
            .enumerate()
            .filter(|(_, record)| matches!(record, UserDataInfo::Embedded { .. }))
            .filter_map(|(i, record)| {
                let index = usize::try_from(record.instance_id()).ok()?;
                self.instance_list.get(index).map(|id| (i, *id))
            })
            .collect();

        for (record, id) in embedded {
            let Some(UserData::Embedded { graph, .. }) = &mut self.get_mut(id)?.user_data else {
                continue;
            };
            cursor.align_write(SECTION_ALIGN);
            let start = cursor.tell();
            graph.write(cursor, start)?;
            let end = cursor.tell();
            let size = u32::try_from(end - start)
                .map_err(|_| RszError::Write(format!("embedded block of {id} is too large")))?;
            let rsz_offset = relative(start, offset)?;

            let slot = record_positions
                .get(record)
                .copied()
                .ok_or_else(|| RszError::Internal("missing userdata record position".into()))?;
            cursor.seek(slot + EMBEDDED_SIZE_FIELD)?;
            cursor.write_u32(size);
            cursor.seek(slot + EMBEDDED_OFFSET_FIELD)?;
            cursor.write_i64(rsz_offset);
            cursor.seek(end)?;

            if let Some(UserDataInfo::Embedded {
                data_size,
                rsz_offset: stored,
                ..
            }) = self.userdata_infos.get_mut(record)
            {
                *data_size = size;
                *stored = rsz_offset;
            }
        }
        Ok(())
    }
}
