use std::fmt;

/// A strong handle to an instance in a graph's arena.
///
/// Handles are stable for the lifetime of the graph: they do not change when
/// the instance list is rebuilt, unlike [`RszInstance::index`](super::RszInstance::index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Handle of the NULL sentinel, always the first arena slot.
    pub const NULL: Self = Self(0);

    /// Restricted to the graph module so handles only come from an arena.
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw arena slot.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub(crate) fn slot(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
