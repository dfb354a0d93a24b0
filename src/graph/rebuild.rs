//! Reference resolution and instance list reconstruction.
//!
//! On read, [`RszGraph::unflatten`] turns raw list indices into arena handles.
//! On write, [`RszGraph::rebuild_instance_list`] walks the object list and
//! produces a deduplicated, children-first instance list, and
//! [`RszGraph::rebuild_instance_info`] regenerates the descriptor tables.

use std::collections::HashSet;

use super::core::RszGraph;
use super::id::InstanceId;
use super::instance::{RszRef, RszValue, UserData, UNASSIGNED_INDEX};
use crate::format::{InstanceInfo, UserDataInfo};
use crate::schema::RszField;
use crate::{RszError, Result};

impl RszGraph {
    /// Resolves every raw reference index of the listed instances.
    ///
    /// A declared reference may point at any listed instance, forward or
    /// backward; the target's handle is taken from the list, so resolution does
    /// not depend on visiting order. Already resolved references are skipped.
    ///
    /// A reference guessed by inference must also point strictly backwards
    /// (`0 <= v < owner index`). When it does not, the field is demoted to a
    /// plain integer and [`RszError::Misclassified`] is returned; the caller must
    /// decode the block again. An index outside the list, or an inferred field
    /// that already used its retry, is a format error.
    pub fn unflatten(&mut self) -> Result<()> {
        for position in 0..self.instance_list.len() {
            let id = self.instance_list[position];
            let slot = id.slot();
            let Some(node) = self.nodes.get_mut(slot) else {
                return Err(RszError::Internal(format!("listed instance {id} missing from arena")));
            };
            let owner_index = node.index;
            let class = std::rc::Rc::clone(node.class());
            for (field, value) in class.fields.iter().zip(node.values.iter_mut()) {
                resolve_value(value, field, &class.name, owner_index, &self.instance_list)?;
            }
        }
        Ok(())
    }

    /// Every instance reachable from `roots`, each exactly once, children before
    /// the instances referencing them (depth-first post-order, fields in schema
    /// order). Raw, unresolved references are not followed.
    pub fn flatten(&self, roots: &[InstanceId]) -> Result<Vec<InstanceId>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<(InstanceId, bool)> = Vec::new();
        for root in roots {
            stack.push((*root, false));
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                if !visited.insert(id) {
                    continue;
                }
                stack.push((id, true));
                let children = self.get(id)?.referenced_ids();
                for child in children.into_iter().rev() {
                    if !visited.contains(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }
        Ok(order)
    }

    /// [`RszGraph::flatten`] for a single root: the root comes last.
    pub fn children_first(&self, root: InstanceId) -> Result<Vec<InstanceId>> {
        self.flatten(&[root])
    }

    /// Rebuilds the instance list from the object list.
    ///
    /// Every instance reachable from an object-list root is listed once, children
    /// first, after the NULL sentinel. Unreachable instances are dropped (their
    /// index becomes -1) and object table entries are re-pointed at the new
    /// indices.
    pub fn rebuild_instance_list(&mut self) -> Result<()> {
        let roots = self.object_list.clone();
        let order = self.flatten(&roots)?;

        for id in std::mem::take(&mut self.instance_list) {
            self.get_mut(id)?.index = UNASSIGNED_INDEX;
        }
        let mut list = Vec::with_capacity(order.len() + 1);
        list.push(InstanceId::NULL);
        list.extend(order.into_iter().filter(|id| *id != InstanceId::NULL));
        for (position, id) in list.iter().enumerate() {
            self.get_mut(*id)?.index = i32::try_from(position)
                .map_err(|_| RszError::Internal("instance list overflow".into()))?;
        }
        let dropped = self.instance_infos.len().saturating_sub(list.len());
        self.instance_list = list;

        self.object_table = self
            .object_list
            .iter()
            .map(|id| self.get(*id).map(|node| node.index))
            .collect::<Result<_>>()?;
        tracing::debug!(
            instances = self.instance_list.len(),
            objects = self.object_list.len(),
            dropped,
            "rebuilt instance list"
        );
        Ok(())
    }

    /// Regenerates the instance descriptor table and the userdata table from the
    /// current instance list.
    ///
    /// With `rebuild_object_table`, object-list entries whose instance is no
    /// longer listed are dropped and the object table is recomputed from the
    /// remaining roots.
    pub fn rebuild_instance_info(&mut self, rebuild_object_table: bool) -> Result<()> {
        let mut infos = Vec::with_capacity(self.instance_list.len());
        let mut userdata = Vec::new();
        for id in &self.instance_list {
            let node = self.get(*id)?;
            let class = node.class();
            infos.push(InstanceInfo {
                type_id: class.type_id,
                crc: class.crc,
            });
            match &node.user_data {
                None => {}
                Some(UserData::External { path }) => userdata.push(UserDataInfo::External {
                    instance_id: node.index,
                    type_id: class.type_id,
                    path: path.clone(),
                }),
                Some(UserData::Embedded { path_hash, .. }) => userdata.push(UserDataInfo::Embedded {
                    instance_id: node.index,
                    type_id: class.type_id,
                    path_hash: *path_hash,
                    data_size: 0,
                    rsz_offset: 0,
                }),
            }
        }
        self.instance_infos = infos;
        self.userdata_infos = userdata;

        if rebuild_object_table {
            let mut kept = Vec::with_capacity(self.object_list.len());
            for id in std::mem::take(&mut self.object_list) {
                if self.is_listed(id) {
                    kept.push(id);
                } else {
                    self.get_mut(id)?.object_table_index = UNASSIGNED_INDEX;
                }
            }
            self.object_table = kept
                .iter()
                .map(|id| self.get(*id).map(|node| node.index))
                .collect::<Result<_>>()?;
            self.object_list = kept;
            self.restamp_object_table()?;
        }
        Ok(())
    }

    /// Convenience for the usual pre-write sequence: rebuild the instance list,
    /// then the descriptor tables and the object table.
    pub fn rebuild(&mut self) -> Result<()> {
        self.rebuild_instance_list()?;
        self.rebuild_instance_info(true)
    }
}

fn resolve_value(
    value: &mut RszValue,
    field: &RszField,
    class_name: &str,
    owner_index: i32,
    list: &[InstanceId],
) -> Result<()> {
    match value {
        RszValue::Ref(reference) => resolve_ref(reference, field, class_name, owner_index, list),
        RszValue::Array(items) => {
            for item in items {
                resolve_value(item, field, class_name, owner_index, list)?;
            }
            Ok(())
        }
        RszValue::Struct(inner) => {
            let class = std::rc::Rc::clone(inner.class());
            for (inner_field, inner_value) in class.fields.iter().zip(inner.values.iter_mut()) {
                resolve_value(inner_value, inner_field, &class.name, owner_index, list)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve_ref(
    reference: &mut RszRef,
    field: &RszField,
    class_name: &str,
    owner_index: i32,
    list: &[InstanceId],
) -> Result<()> {
    let RszRef::Raw(raw) = *reference else {
        return Ok(());
    };
    let inferred = field.is_inferred();
    let target = usize::try_from(raw)
        .ok()
        .filter(|_| !inferred || raw < owner_index)
        .and_then(|index| list.get(index).copied());
    match target {
        Some(id) => {
            *reference = RszRef::Node(id);
            Ok(())
        }
        None if inferred && field.demote_to_int() => {
            tracing::warn!(
                class = class_name,
                field = %field.name,
                raw,
                owner_index,
                "inferred reference failed validation, demoted to S32"
            );
            Err(RszError::Misclassified {
                class: class_name.to_owned(),
                field: field.name.clone(),
            })
        }
        None if inferred => Err(RszError::Format(format!(
            "{class_name}.{} at instance {owner_index} references {raw}, which is not an earlier instance",
            field.name
        ))),
        None => Err(RszError::Format(format!(
            "{class_name}.{} at instance {owner_index} references {raw}, outside the {} listed instances",
            field.name,
            list.len()
        ))),
    }
}
