//! Schema registry: per-class ordered field descriptors.
//!
//! Schemas are loaded from the JSON dump format used by the modding community:
//!
//! ```json
//! {
//!   "5d6a4b2e": {
//!     "name": "app.EnemyParam",
//!     "crc": "1f2e3d4c",
//!     "fields": [
//!       { "name": "_Hp", "type": "S32", "array": false, "align": 4, "size": 4,
//!         "native": false, "original_type": "System.Int32" }
//!     ]
//!   }
//! }
//! ```
//!
//! Field descriptors carry one piece of interior mutability: the resolved type
//! of ambiguous 4-byte `Data` fields. The value codec locks it on first
//! observation, and every later instance of the class (in this file and in any
//! later file decoded with the same registry) uses the locked type. Call
//! [`SchemaRegistry::freeze`] to stop further inference once a representative
//! file has decoded successfully.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{RszError, Result};

/// Type tag of a field.
///
/// Only the tags the codec treats specially matter for decoding: references
/// (`Object`, `UserData`), inline `Struct`, scalars, strings and the ambiguous
/// `Data` blob. Every other tag is carried as an opaque blob of `size` bytes.
#[allow(missing_docs)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RszFieldType {
    Object,
    Action,
    Struct,
    NativeObject,
    Resource,
    UserData,
    Bool,
    C8,
    C16,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F32,
    F64,
    String,
    MBString,
    Enum,
    Uint2,
    Uint3,
    Uint4,
    Int2,
    Int3,
    Int4,
    Float2,
    Float3,
    Float4,
    Float3x3,
    Float3x4,
    Float4x3,
    Float4x4,
    Half2,
    Half4,
    Mat3,
    Mat4,
    Vec2,
    Vec3,
    Vec4,
    VecU4,
    Quaternion,
    Guid,
    Color,
    DateTime,
    AABB,
    Capsule,
    TaperedCapsule,
    Cone,
    Line,
    LineSegment,
    OBB,
    Plane,
    PlaneXZ,
    Point,
    Range,
    RangeI,
    Size,
    Sphere,
    Triangle,
    Cylinder,
    Ellipsoid,
    Area,
    Torus,
    Rect,
    Rect3D,
    Frustum,
    KeyFrame,
    Uri,
    GameObjectRef,
    RuntimeType,
    Sfix,
    Sfix2,
    Sfix3,
    Sfix4,
    Position,
    F16,
    Data,
    /// Any tag this crate does not know; carried as an opaque blob.
    #[serde(other)]
    Undefined,
}

impl RszFieldType {
    /// Returns true for fields whose value is an index into the instance list.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Object | Self::UserData)
    }

    /// `(align, size)` used when a descriptor is built in code without an
    /// explicit layout.
    pub fn default_layout(self) -> (usize, usize) {
        match self {
            Self::Bool | Self::C8 | Self::S8 | Self::U8 => (1, 1),
            Self::C16 | Self::S16 | Self::U16 | Self::F16 => (2, 2),
            Self::S64 | Self::U64 | Self::F64 | Self::DateTime => (8, 8),
            Self::Vec2 | Self::Float2 | Self::Int2 | Self::Uint2 | Self::Range | Self::RangeI => {
                (4, 8)
            }
            Self::Float3 | Self::Int3 | Self::Uint3 => (4, 12),
            Self::Float4 | Self::Int4 | Self::Uint4 => (4, 16),
            Self::Vec3 | Self::Vec4 | Self::Quaternion | Self::Position => (16, 16),
            Self::Guid | Self::Uri | Self::GameObjectRef => (8, 16),
            Self::Mat4 | Self::Float4x4 => (16, 64),
            _ => (4, 4),
        }
    }
}

/// A single field descriptor.
#[derive(Debug)]
pub struct RszField {
    /// Field name.
    pub name: String,
    /// Type as declared by the schema source.
    pub declared_type: RszFieldType,
    /// Whether the field is a length-prefixed array.
    pub array: bool,
    /// Per-element alignment in bytes.
    pub align: usize,
    /// Per-element size in bytes (meaningful for fixed-size types).
    pub size: usize,
    /// Whether the engine marks the field as native.
    pub native: bool,
    /// Engine type name; names the nested class of `Struct` fields.
    pub original_type: String,
    resolved: Cell<RszFieldType>,
    locked: Cell<bool>,
    retried: Cell<bool>,
}

impl Clone for RszField {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            declared_type: self.declared_type,
            array: self.array,
            align: self.align,
            size: self.size,
            native: self.native,
            original_type: self.original_type.clone(),
            resolved: Cell::new(self.resolved.get()),
            locked: Cell::new(self.locked.get()),
            retried: Cell::new(self.retried.get()),
        }
    }
}

impl RszField {
    /// Creates a scalar field with the default layout of `ty`.
    pub fn new(name: impl Into<String>, ty: RszFieldType) -> Self {
        let (align, size) = ty.default_layout();
        Self {
            name: name.into(),
            declared_type: ty,
            array: false,
            align,
            size,
            native: false,
            original_type: String::new(),
            resolved: Cell::new(ty),
            locked: Cell::new(false),
            retried: Cell::new(false),
        }
    }

    /// Marks the field as an array.
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    /// Overrides alignment and size.
    pub fn with_layout(mut self, align: usize, size: usize) -> Self {
        self.align = align;
        self.size = size;
        self
    }

    /// Sets the engine type name (the nested class for `Struct` fields).
    pub fn with_original_type(mut self, original_type: impl Into<String>) -> Self {
        self.original_type = original_type.into();
        self
    }

    /// The type the codec currently uses for this field.
    pub fn ty(&self) -> RszFieldType {
        self.resolved.get()
    }

    /// True for an untyped 4-byte blob whose type has not been locked yet.
    pub fn needs_inference(&self) -> bool {
        self.declared_type == RszFieldType::Data && self.size == 4 && !self.locked.get()
    }

    /// True once inference has chosen a type for this field.
    pub fn is_inferred(&self) -> bool {
        self.declared_type == RszFieldType::Data && self.locked.get()
    }

    /// True if the current type is a reference.
    pub fn is_reference(&self) -> bool {
        self.ty().is_reference()
    }

    /// Locks the inferred type.
    pub(crate) fn lock_type(&self, ty: RszFieldType) {
        self.resolved.set(ty);
        self.locked.set(true);
    }

    /// Demotes a misclassified reference to a plain integer. Returns false if
    /// the field already used its single retry.
    pub(crate) fn demote_to_int(&self) -> bool {
        if self.retried.get() {
            return false;
        }
        self.retried.set(true);
        self.lock_type(RszFieldType::S32);
        true
    }

    /// Forgets any inference result.
    pub fn reset_inference(&self) {
        self.resolved.set(self.declared_type);
        self.locked.set(false);
        self.retried.set(false);
    }
}

/// A class: an ordered list of field descriptors plus its identity.
#[derive(Debug, Clone)]
pub struct RszClass {
    /// Type id (hash of the class name), as stored in instance descriptors.
    pub type_id: u32,
    /// Layout checksum, stored next to the type id.
    pub crc: u32,
    /// Fully qualified class name.
    pub name: String,
    /// Fields in on-disk order.
    pub fields: Vec<RszField>,
}

impl RszClass {
    /// Creates a class.
    pub fn new(type_id: u32, crc: u32, name: impl Into<String>, fields: Vec<RszField>) -> Self {
        Self {
            type_id,
            crc,
            name: name.into(),
            fields,
        }
    }

    /// The class of the NULL sentinel instance.
    pub fn null() -> Self {
        Self::new(0, 0, "", Vec::new())
    }

    /// True for the NULL sentinel class.
    pub fn is_null(&self) -> bool {
        self.type_id == 0
    }

    /// Looks up a field index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrNumber {
    Number(u32),
    Text(String),
}

impl HexOrNumber {
    fn parse(&self) -> Result<u32> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => parse_hex(s),
        }
    }
}

fn parse_hex(text: &str) -> Result<u32> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .map_err(|e| RszError::Schema(format!("invalid hex number {text:?}: {e}")))
}

#[derive(Deserialize)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    ty: RszFieldType,
    #[serde(default)]
    array: bool,
    #[serde(default = "default_align")]
    align: usize,
    #[serde(default)]
    size: usize,
    #[serde(default)]
    native: bool,
    #[serde(default)]
    original_type: String,
}

fn default_align() -> usize {
    1
}

#[derive(Deserialize)]
struct ClassDef {
    name: String,
    crc: HexOrNumber,
    #[serde(default)]
    fields: Vec<FieldDef>,
}

/// Snapshot entry of one inferred field, as exported by
/// [`SchemaRegistry::export_resolved`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResolvedField {
    type_id: u32,
    field: u32,
    ty: RszFieldType,
    retried: bool,
}

#[derive(Debug, Clone)]
struct RegistryInner {
    by_id: HashMap<u32, Rc<RszClass>>,
    by_name: HashMap<String, u32>,
    null_class: Rc<RszClass>,
    // Kept outside the copy-on-write set so every clone sees one freeze state.
    frozen: Rc<Cell<bool>>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            null_class: Rc::new(RszClass::null()),
            frozen: Rc::new(Cell::new(false)),
        }
    }
}

/// Lookup from type id or class name to class descriptors.
///
/// Cloning is cheap and clones share the same descriptors, including their
/// inference state.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    inner: Rc<RegistryInner>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from classes defined in code.
    pub fn from_classes(classes: impl IntoIterator<Item = RszClass>) -> Self {
        let mut registry = Self::new();
        for class in classes {
            registry.register(class);
        }
        registry
    }

    /// Parses a JSON schema dump.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let defs: HashMap<String, ClassDef> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for (key, def) in defs {
            let type_id = parse_hex(&key)?;
            let fields = def
                .fields
                .into_iter()
                .map(|f| {
                    let mut field = RszField::new(f.name, f.ty).with_layout(f.align, f.size);
                    field.array = f.array;
                    field.native = f.native;
                    field.original_type = f.original_type;
                    field
                })
                .collect();
            let class = RszClass::new(type_id, def.crc.parse()?, def.name, fields);
            registry.register(class);
        }
        tracing::debug!(classes = registry.len(), "loaded schema registry");
        Ok(registry)
    }

    /// Reads and parses a JSON schema dump from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Adds (or replaces) a class. Registries cloned earlier keep the old set.
    pub fn register(&mut self, class: RszClass) -> Rc<RszClass> {
        let inner = Rc::make_mut(&mut self.inner);
        let class = Rc::new(class);
        inner.by_name.insert(class.name.clone(), class.type_id);
        inner.by_id.insert(class.type_id, Rc::clone(&class));
        class
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.inner.by_id.len()
    }

    /// Returns true if no class is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.by_id.is_empty()
    }

    /// Looks up a class by type id. Type id 0 is the NULL sentinel class.
    pub fn class_by_type_id(&self, type_id: u32) -> Option<Rc<RszClass>> {
        if type_id == 0 {
            return Some(Rc::clone(&self.inner.null_class));
        }
        self.inner.by_id.get(&type_id).cloned()
    }

    /// Looks up a class by its fully qualified name.
    pub fn class_by_name(&self, name: &str) -> Option<Rc<RszClass>> {
        let type_id = self.inner.by_name.get(name)?;
        self.class_by_type_id(*type_id)
    }

    /// Looks up a class name by type id.
    pub fn class_name_by_type_id(&self, type_id: u32) -> Option<&str> {
        self.inner.by_id.get(&type_id).map(|c| c.name.as_str())
    }

    /// Like [`SchemaRegistry::class_by_name`] but fails with a schema error.
    pub fn require_class(&self, name: &str) -> Result<Rc<RszClass>> {
        self.class_by_name(name)
            .ok_or_else(|| RszError::Schema(format!("class {name:?} is not in the registry")))
    }

    /// The NULL sentinel class.
    pub fn null_class(&self) -> Rc<RszClass> {
        Rc::clone(&self.inner.null_class)
    }

    /// Stops further inference. Ambiguous fields still unlocked decode as `S32`.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    /// Returns true once [`SchemaRegistry::freeze`] has been called.
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Clears every inference result and unfreezes the registry.
    pub fn reset_inference(&self) {
        self.inner.frozen.set(false);
        for class in self.inner.by_id.values() {
            for field in &class.fields {
                field.reset_inference();
            }
        }
    }

    /// Serializes the inferred field types so a later process can reuse them
    /// without decoding a representative file first.
    pub fn export_resolved(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<ResolvedField> = self
            .inner
            .by_id
            .values()
            .flat_map(|class| {
                class.fields.iter().enumerate().filter(|(_, f)| f.is_inferred()).map(
                    move |(i, f)| ResolvedField {
                        type_id: class.type_id,
                        field: u32::try_from(i).unwrap_or(u32::MAX),
                        ty: f.ty(),
                        retried: f.retried.get(),
                    },
                )
            })
            .collect();
        entries.sort_by_key(|e| (e.type_id, e.field));
        bincode::serde::encode_to_vec(&entries, bincode::config::standard())
            .map_err(|e| RszError::Serialization(e.to_string()))
    }

    /// Applies a snapshot produced by [`SchemaRegistry::export_resolved`].
    /// Returns the number of fields that were locked.
    pub fn import_resolved(&self, bytes: &[u8]) -> Result<usize> {
        let (entries, _): (Vec<ResolvedField>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| RszError::Serialization(e.to_string()))?;
        let mut applied = 0;
        for entry in entries {
            let Some(field) = self
                .inner
                .by_id
                .get(&entry.type_id)
                .and_then(|c| c.fields.get(entry.field as usize))
            else {
                tracing::warn!(type_id = entry.type_id, field = entry.field, "resolved field not in registry");
                continue;
            };
            if field.declared_type != RszFieldType::Data {
                return Err(RszError::Schema(format!(
                    "snapshot resolves non-ambiguous field {:?}",
                    field.name
                )));
            }
            field.lock_type(entry.ty);
            field.retried.set(entry.retried);
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "0x00001000": {
            "name": "app.Node",
            "crc": "abcd0001",
            "fields": [
                { "name": "id", "type": "S32", "align": 4, "size": 4 },
                { "name": "blob", "type": "Data", "align": 4, "size": 4 },
                { "name": "pos", "type": "Vec3", "align": 16, "size": 16 },
                { "name": "mystery", "type": "SomethingNew", "align": 4, "size": 8 }
            ]
        },
        "2000": { "name": "app.Empty", "crc": 7 }
    }"#;

    #[test]
    fn parses_json_dump() -> Result<()> {
        let registry = SchemaRegistry::from_json_str(SCHEMA)?;
        assert_eq!(registry.len(), 2);
        let node = registry.require_class("app.Node")?;
        assert_eq!(node.type_id, 0x1000);
        assert_eq!(node.crc, 0xabcd_0001);
        assert_eq!(node.fields[2].align, 16);
        assert_eq!(node.fields[3].declared_type, RszFieldType::Undefined);
        assert!(node.fields[1].needs_inference());
        assert_eq!(registry.class_name_by_type_id(0x2000), Some("app.Empty"));
        assert!(registry.class_by_type_id(0).is_some_and(|c| c.is_null()));
        Ok(())
    }

    #[test]
    fn resolved_snapshot_roundtrip() -> Result<()> {
        let registry = SchemaRegistry::from_json_str(SCHEMA)?;
        let node = registry.require_class("app.Node")?;
        node.fields[1].lock_type(RszFieldType::F32);
        let snapshot = registry.export_resolved()?;

        let fresh = SchemaRegistry::from_json_str(SCHEMA)?;
        assert_eq!(fresh.import_resolved(&snapshot)?, 1);
        let class = fresh.require_class("app.Node")?;
        let field = &class.fields[1];
        assert_eq!(field.ty(), RszFieldType::F32);
        assert!(!field.needs_inference());

        fresh.reset_inference();
        assert!(field.needs_inference());
        Ok(())
    }

    #[test]
    fn freeze_is_shared_after_register() -> Result<()> {
        let mut registry = SchemaRegistry::from_json_str(SCHEMA)?;
        let clone = registry.clone();
        registry.register(RszClass::new(0x3000, 9, "app.Late", Vec::new()));
        assert_eq!(clone.len(), 2);
        assert_eq!(registry.len(), 3);

        clone.freeze();
        assert!(registry.is_frozen());
        registry.reset_inference();
        assert!(!clone.is_frozen());
        Ok(())
    }

    #[test]
    fn demotion_is_single_shot() {
        let field = RszField::new("blob", RszFieldType::Data).with_layout(4, 4);
        field.lock_type(RszFieldType::Object);
        assert!(field.is_reference());
        assert!(field.demote_to_int());
        assert_eq!(field.ty(), RszFieldType::S32);
        assert!(!field.demote_to_int());
    }
}
