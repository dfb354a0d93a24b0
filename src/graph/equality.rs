use std::collections::HashSet;

use super::core::RszGraph;
use super::id::InstanceId;
use super::instance::{RszInstance, RszRef, RszValue, UserData};

impl RszGraph {
    /// Structural comparison of instance `a` of this graph with instance `b` of
    /// `other` (which may be this graph).
    ///
    /// Classes must match by name, then values are compared field by field.
    /// Arrays compare element-wise, inline structs and referenced instances
    /// recursively, floats bitwise. Arena handles and list indices are ignored.
    ///
    /// A pair of instances already under comparison counts as equal when met
    /// again, so reference cycles terminate.
    pub fn deep_eq(&self, a: InstanceId, other: &RszGraph, b: InstanceId) -> bool {
        let mut visiting = HashSet::new();
        Comparison {
            left: self,
            right: other,
            visiting: &mut visiting,
        }
        .nodes(a, b)
    }
}

struct Comparison<'a> {
    left: &'a RszGraph,
    right: &'a RszGraph,
    visiting: &'a mut HashSet<(InstanceId, InstanceId)>,
}

impl Comparison<'_> {
    fn nodes(&mut self, a: InstanceId, b: InstanceId) -> bool {
        if !self.visiting.insert((a, b)) {
            return true;
        }
        match (self.left.get(a), self.right.get(b)) {
            (Ok(x), Ok(y)) => self.instances(x, y),
            _ => false,
        }
    }

    fn instances(&mut self, x: &RszInstance, y: &RszInstance) -> bool {
        if x.class_name() != y.class_name() || x.values.len() != y.values.len() {
            return false;
        }
        let user_data_eq = match (&x.user_data, &y.user_data) {
            (None, None) => true,
            (Some(UserData::External { path: p }), Some(UserData::External { path: q })) => p == q,
            (
                Some(UserData::Embedded { path_hash: h1, graph: g1 }),
                Some(UserData::Embedded { path_hash: h2, graph: g2 }),
            ) => h1 == h2 && graphs_eq(g1, g2),
            _ => false,
        };
        user_data_eq
            && x.values
                .iter()
                .zip(&y.values)
                .all(|(v, w)| self.values(v, w))
    }

    fn values(&mut self, v: &RszValue, w: &RszValue) -> bool {
        match (v, w) {
            (RszValue::Bool(a), RszValue::Bool(b)) => a == b,
            (RszValue::S8(a), RszValue::S8(b)) => a == b,
            (RszValue::U8(a), RszValue::U8(b)) => a == b,
            (RszValue::S16(a), RszValue::S16(b)) => a == b,
            (RszValue::U16(a), RszValue::U16(b)) => a == b,
            (RszValue::S32(a), RszValue::S32(b)) => a == b,
            (RszValue::U32(a), RszValue::U32(b)) => a == b,
            (RszValue::S64(a), RszValue::S64(b)) => a == b,
            (RszValue::U64(a), RszValue::U64(b)) => a == b,
            (RszValue::F32(a), RszValue::F32(b)) => a.to_bits() == b.to_bits(),
            (RszValue::F64(a), RszValue::F64(b)) => a.to_bits() == b.to_bits(),
            (RszValue::String(a), RszValue::String(b)) | (RszValue::Ascii(a), RszValue::Ascii(b)) => a == b,
            (RszValue::Bytes(a), RszValue::Bytes(b)) => a == b,
            (RszValue::Array(a), RszValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values(x, y))
            }
            (RszValue::Struct(a), RszValue::Struct(b)) => self.instances(a, b),
            (RszValue::Ref(a), RszValue::Ref(b)) => self.refs(*a, *b),
            _ => false,
        }
    }

    fn refs(&mut self, a: RszRef, b: RszRef) -> bool {
        match (a, b) {
            (RszRef::Raw(x), RszRef::Raw(y)) => x == y,
            (RszRef::Node(x), RszRef::Node(y)) => {
                match (x == InstanceId::NULL, y == InstanceId::NULL) {
                    (true, true) => true,
                    (false, false) => self.nodes(x, y),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// Two nested graphs are equal when their object lists are pairwise deep-equal.
fn graphs_eq(a: &RszGraph, b: &RszGraph) -> bool {
    a.object_list().len() == b.object_list().len()
        && a.object_list()
            .iter()
            .zip(b.object_list())
            .all(|(x, y)| a.deep_eq(*x, b, *y))
}
