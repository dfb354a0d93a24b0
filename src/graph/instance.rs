use std::rc::Rc;

use super::core::RszGraph;
use super::id::InstanceId;
use crate::error::{RszError, Result};
use crate::schema::RszClass;

/// `index` of an instance that is not (or no longer) in the instance list.
pub const UNASSIGNED_INDEX: i32 = -1;

/// `index` of an inline struct instance; these never live in the instance list.
pub const STRUCT_INDEX: i32 = -2;

/// A reference field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RszRef {
    /// Index into the instance list, not resolved yet.
    Raw(i32),
    /// Resolved handle. [`InstanceId::NULL`] stands for "no object".
    Node(InstanceId),
}

impl RszRef {
    /// The null reference.
    pub const NULL: Self = Self::Node(InstanceId::NULL);

    /// Returns the resolved target, if any.
    pub fn node(&self) -> Option<InstanceId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Raw(_) => None,
        }
    }
}

/// One decoded field value.
#[derive(Debug, Clone)]
pub enum RszValue {
    /// `Bool`.
    Bool(bool),
    /// `S8`.
    S8(i8),
    /// `U8`.
    U8(u8),
    /// `S16`.
    S16(i16),
    /// `U16`.
    U16(u16),
    /// `S32`, and ambiguous blobs classified as integers.
    S32(i32),
    /// `U32`.
    U32(u32),
    /// `S64`.
    S64(i64),
    /// `U64`.
    U64(u64),
    /// `F32`, and ambiguous blobs classified as floats.
    F32(f32),
    /// `F64`.
    F64(f64),
    /// UTF-16 string (`String`, `Resource`).
    String(String),
    /// ASCII string (`RuntimeType`).
    Ascii(String),
    /// Opaque fixed-size payload of any other field type.
    Bytes(Vec<u8>),
    /// `Object` / `UserData` reference, and blobs classified as references.
    Ref(RszRef),
    /// Inline struct instance.
    Struct(Box<RszInstance>),
    /// Array field.
    Array(Vec<RszValue>),
}

impl RszValue {
    /// Returns the integer payload of an `S32` value.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::S32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of an `F32` value.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the reference of a reference value.
    pub fn as_reference(&self) -> Option<RszRef> {
        match self {
            Self::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the elements of an array value.
    pub fn as_array(&self) -> Option<&[RszValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the instance of a struct value.
    pub fn as_struct(&self) -> Option<&RszInstance> {
        match self {
            Self::Struct(inner) => Some(inner),
            _ => None,
        }
    }

    /// Calls `f` for every reference in this value, descending into arrays and
    /// inline structs, in field order.
    pub fn for_each_ref(&self, f: &mut dyn FnMut(RszRef)) {
        match self {
            Self::Ref(r) => f(*r),
            Self::Array(items) => {
                for item in items {
                    item.for_each_ref(f);
                }
            }
            Self::Struct(inner) => {
                for value in &inner.values {
                    value.for_each_ref(f);
                }
            }
            _ => {}
        }
    }

    /// Mutable counterpart of [`RszValue::for_each_ref`].
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut RszRef)) {
        match self {
            Self::Ref(r) => f(r),
            Self::Array(items) => {
                for item in items {
                    item.for_each_ref_mut(f);
                }
            }
            Self::Struct(inner) => {
                for value in &mut inner.values {
                    value.for_each_ref_mut(f);
                }
            }
            _ => {}
        }
    }
}

/// Indirected payload of an instance.
#[derive(Debug, Clone)]
pub enum UserData {
    /// The payload lives in an external resource.
    External {
        /// Resource path.
        path: String,
    },
    /// The payload is a complete nested graph (legacy layout).
    Embedded {
        /// Hash identifying the nested resource.
        path_hash: u32,
        /// The nested graph.
        graph: Box<RszGraph>,
    },
}

/// One node of an object graph.
#[derive(Debug, Clone)]
pub struct RszInstance {
    class: Rc<RszClass>,
    pub(crate) index: i32,
    pub(crate) object_table_index: i32,
    /// One value per schema field, empty for userdata-indirected instances.
    pub values: Vec<RszValue>,
    /// Present when the payload is stored outside the data section.
    pub user_data: Option<UserData>,
}

impl RszInstance {
    pub(crate) fn new(class: Rc<RszClass>, values: Vec<RszValue>) -> Self {
        Self {
            class,
            index: UNASSIGNED_INDEX,
            object_table_index: UNASSIGNED_INDEX,
            values,
            user_data: None,
        }
    }

    pub(crate) fn new_struct(class: Rc<RszClass>, values: Vec<RszValue>) -> Self {
        Self {
            index: STRUCT_INDEX,
            ..Self::new(class, values)
        }
    }

    pub(crate) fn new_user_data(class: Rc<RszClass>, user_data: UserData) -> Self {
        Self {
            user_data: Some(user_data),
            ..Self::new(class, Vec::new())
        }
    }

    /// The class of this instance.
    pub fn class(&self) -> &Rc<RszClass> {
        &self.class
    }

    /// Fully qualified class name.
    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    /// Position in the instance list, [`UNASSIGNED_INDEX`] or [`STRUCT_INDEX`].
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Position in the object table, or -1.
    pub fn object_table_index(&self) -> i32 {
        self.object_table_index
    }

    /// True for the NULL sentinel.
    pub fn is_null(&self) -> bool {
        self.class.is_null()
    }

    /// True for inline struct instances.
    pub fn is_struct(&self) -> bool {
        self.index == STRUCT_INDEX
    }

    /// True if the payload is userdata-indirected.
    pub fn is_user_data(&self) -> bool {
        self.user_data.is_some()
    }

    /// Looks up a field value by name.
    pub fn field(&self, name: &str) -> Option<&RszValue> {
        self.class.field_index(name).and_then(|i| self.values.get(i))
    }

    /// Looks up a mutable field value by name.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut RszValue> {
        let index = self.class.field_index(name)?;
        self.values.get_mut(index)
    }

    /// Replaces a field value. The value is checked against the schema when the
    /// graph is written.
    pub fn set_field(&mut self, name: &str, value: RszValue) -> Result<()> {
        let class_name = self.class.name.clone();
        let slot = self.field_mut(name).ok_or_else(|| {
            RszError::Schema(format!("class {class_name:?} has no field {name:?}"))
        })?;
        *slot = value;
        Ok(())
    }

    /// Resolved reference targets in field order, duplicates included.
    pub fn referenced_ids(&self) -> Vec<InstanceId> {
        let mut ids = Vec::new();
        for value in &self.values {
            value.for_each_ref(&mut |r| {
                if let RszRef::Node(id) = r {
                    ids.push(id);
                }
            });
        }
        ids
    }

    pub(crate) fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut RszRef)) {
        for value in &mut self.values {
            value.for_each_ref_mut(f);
        }
    }
}
