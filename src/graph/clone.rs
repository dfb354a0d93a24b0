use std::collections::HashMap;

use super::core::RszGraph;
use super::id::InstanceId;
use super::instance::{RszRef, UNASSIGNED_INDEX};
use crate::Result;

/// Source to copy map shared by the [`RszGraph::clone_cached`] calls of one
/// batch.
///
/// The context is never cleared implicitly: reuse it across calls to keep
/// shared children shared, and [`clear`](CloneContext::clear) it (or drop it)
/// between independent batches.
#[derive(Debug, Default, Clone)]
pub struct CloneContext {
    copies: HashMap<InstanceId, InstanceId>,
}

impl CloneContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances copied so far.
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// True if nothing was copied yet.
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Forgets every recorded copy.
    pub fn clear(&mut self) {
        self.copies.clear();
    }

    /// The copy made for `source`, if any.
    pub fn get(&self, source: InstanceId) -> Option<InstanceId> {
        self.copies.get(&source).copied()
    }
}

impl RszGraph {
    /// Copies one instance, inline structs included.
    ///
    /// References are copied as they are: the copy points at the same targets as
    /// the source. The copy is not listed and not in the object table.
    pub fn clone_instance(&mut self, id: InstanceId) -> Result<InstanceId> {
        let mut copy = self.get(id)?.clone();
        copy.index = UNASSIGNED_INDEX;
        copy.object_table_index = UNASSIGNED_INDEX;
        self.alloc(copy)
    }

    /// Copies `id` and everything it references.
    ///
    /// Every source instance is copied at most once per `ctx`, so shared and
    /// diamond-shaped references stay shared among the copies, across calls too.
    /// Cycles are copied as cycles. The NULL sentinel is never copied.
    pub fn clone_cached(&mut self, id: InstanceId, ctx: &mut CloneContext) -> Result<InstanceId> {
        if id == InstanceId::NULL {
            return Ok(id);
        }
        let mut fresh = Vec::new();
        let mut pending = vec![id];
        while let Some(source) = pending.pop() {
            if source == InstanceId::NULL || ctx.copies.contains_key(&source) {
                continue;
            }
            let copy = self.clone_instance(source)?;
            ctx.copies.insert(source, copy);
            fresh.push(copy);
            pending.extend(self.get(source)?.referenced_ids());
        }

        for copy in fresh {
            let copies = &ctx.copies;
            self.get_mut(copy)?.for_each_ref_mut(&mut |reference| {
                if let RszRef::Node(target) = reference {
                    if let Some(mapped) = copies.get(&*target) {
                        *target = *mapped;
                    }
                }
            });
        }
        tracing::trace!(source = %id, copies = ctx.len(), "cloned subgraph");
        Ok(ctx.copies.get(&id).copied().unwrap_or(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RszClass, RszField, RszFieldType, SchemaRegistry};
    use crate::{RszOptions, RszValue};

    fn graph() -> RszGraph {
        let mut registry = SchemaRegistry::new();
        registry.register(RszClass::new(
            1,
            0,
            "app.Node",
            vec![
                RszField::new("next", RszFieldType::Object),
                RszField::new("id", RszFieldType::S32),
            ],
        ));
        RszGraph::new(&registry, RszOptions::default())
    }

    #[test]
    fn self_cycle_is_copied_as_a_cycle() -> Result<()> {
        let mut g = graph();
        let node = g.create_instance("app.Node")?;
        g.get_mut(node)?.set_field("next", RszValue::Ref(RszRef::Node(node)))?;

        let mut ctx = CloneContext::new();
        let copy = g.clone_cached(node, &mut ctx)?;
        assert_ne!(copy, node);
        assert_eq!(g.get(copy)?.referenced_ids(), vec![copy]);
        assert_eq!(ctx.len(), 1);
        Ok(())
    }

    #[test]
    fn context_is_not_cleared_between_calls() -> Result<()> {
        let mut g = graph();
        let node = g.create_instance("app.Node")?;
        let mut ctx = CloneContext::new();
        let first = g.clone_cached(node, &mut ctx)?;
        assert_eq!(g.clone_cached(node, &mut ctx)?, first);

        ctx.clear();
        assert_ne!(g.clone_cached(node, &mut ctx)?, first);
        Ok(())
    }
}
