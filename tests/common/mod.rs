#![allow(dead_code)]

use rszgraph::{InstanceId, Result, RszClass, RszField, RszFieldType, RszGraph, RszOptions, RszRef, RszValue, SchemaRegistry};

pub const SCHEMA_JSON: &str = r#"{
    "0x100": {
        "name": "app.Transform",
        "crc": "11",
        "fields": [
            { "name": "pos", "type": "Vec3", "align": 16, "size": 16 },
            { "name": "scale", "type": "F32", "align": 4, "size": 4 }
        ]
    },
    "0x200": {
        "name": "app.GameObject",
        "crc": "22",
        "fields": [
            { "name": "name", "type": "String", "align": 4, "size": 4 },
            { "name": "transform", "type": "Object", "align": 4, "size": 4 },
            { "name": "children", "type": "Object", "array": true, "align": 4, "size": 4 },
            { "name": "tags", "type": "S32", "array": true, "align": 4, "size": 4 },
            { "name": "settings", "type": "UserData", "align": 4, "size": 4 },
            { "name": "active", "type": "Bool", "align": 1, "size": 1 },
            { "name": "layer", "type": "U8", "align": 1, "size": 1 }
        ]
    },
    "0x300": {
        "name": "app.Settings",
        "crc": "33",
        "fields": [
            { "name": "value", "type": "S32", "align": 4, "size": 4 }
        ]
    },
    "0x400": {
        "name": "app.Probe",
        "crc": "44",
        "fields": [
            { "name": "blob", "type": "Data", "align": 4, "size": 4 },
            { "name": "id", "type": "S32", "align": 4, "size": 4 }
        ]
    }
}"#;

/// A fresh registry: every call gets its own, uninferred field descriptors.
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::from_json_str(SCHEMA_JSON).expect("schema parses");
    registry.register(RszClass::new(
        0x500,
        0x55,
        "app.Point",
        vec![
            RszField::new("x", RszFieldType::F32),
            RszField::new("y", RszFieldType::F32),
            RszField::new("target", RszFieldType::Object),
        ],
    ));
    registry.register(RszClass::new(
        0x600,
        0x66,
        "app.Holder",
        vec![
            RszField::new("point", RszFieldType::Struct).with_original_type("app.Point"),
            RszField::new("points", RszFieldType::Struct)
                .array()
                .with_original_type("app.Point"),
            RszField::new("label", RszFieldType::RuntimeType),
        ],
    ));
    registry
}

pub fn node(id: InstanceId) -> RszValue {
    RszValue::Ref(RszRef::Node(id))
}

pub fn transform(graph: &mut RszGraph, scale: f32) -> Result<InstanceId> {
    let t = graph.create_instance("app.Transform")?;
    let instance = graph.get_mut(t)?;
    instance.set_field("pos", RszValue::Bytes((1..=16).collect()))?;
    instance.set_field("scale", RszValue::F32(scale))?;
    Ok(t)
}

/// Root game object with a child; both share one transform (a diamond).
pub struct Scene {
    pub graph: RszGraph,
    pub root: InstanceId,
    pub child: InstanceId,
    pub transform: InstanceId,
}

pub fn scene(registry: &SchemaRegistry, options: RszOptions) -> Result<Scene> {
    let mut graph = RszGraph::new(registry, options);
    let transform = transform(&mut graph, 1.5)?;

    let child = graph.create_instance("app.GameObject")?;
    {
        let c = graph.get_mut(child)?;
        c.set_field("name", RszValue::String("Child".into()))?;
        c.set_field("transform", node(transform))?;
        c.set_field("layer", RszValue::U8(3))?;
    }

    let root = graph.create_instance("app.GameObject")?;
    {
        let r = graph.get_mut(root)?;
        r.set_field("name", RszValue::String("Root ✓".into()))?;
        r.set_field("transform", node(transform))?;
        r.set_field("children", RszValue::Array(vec![node(child)]))?;
        r.set_field("tags", RszValue::Array(vec![RszValue::S32(7), RszValue::S32(-1)]))?;
        r.set_field("active", RszValue::Bool(true))?;
    }
    graph.add_to_object_table(root)?;
    Ok(Scene {
        graph,
        root,
        child,
        transform,
    })
}
