#![allow(missing_docs)]

mod common;

use common::{registry as schema, transform};
use rszgraph::{
    ByteCursor, ReadOutcome, Result, Rsz, RszError, RszFieldType, RszGraph, RszOptions, RszRef,
    RszValue, SchemaRegistry,
};

/// Two transforms at indices 1 and 2, then one probe per blob value.
fn probes(blobs: &[RszValue]) -> Result<Vec<u8>> {
    let registry = schema();
    let mut graph = RszGraph::new(&registry, RszOptions::default());
    for scale in [1.0, 2.0] {
        let t = transform(&mut graph, scale)?;
        graph.insert_instance(t)?;
    }
    for (i, blob) in blobs.iter().enumerate() {
        let probe = graph.create_instance("app.Probe")?;
        let p = graph.get_mut(probe)?;
        p.set_field("blob", blob.clone())?;
        p.set_field("id", RszValue::S32(i as i32))?;
        graph.add_to_object_table(probe)?;
    }
    Rsz::write_bytes(&mut graph)
}

fn blob_type(registry: &SchemaRegistry) -> RszFieldType {
    registry
        .class_by_name("app.Probe")
        .map(|c| c.fields[0].ty())
        .unwrap_or(RszFieldType::Undefined)
}

fn blob_of(graph: &RszGraph, root: usize) -> Result<RszValue> {
    let id = graph.object_list()[root];
    Ok(graph.get(id)?.field("blob").cloned().unwrap_or(RszValue::Bool(false)))
}

#[test]
fn test_plausible_back_reference_becomes_object() -> Result<()> {
    let bytes = probes(&[RszValue::S32(1)])?;
    let registry = schema();
    for _ in 0..2 {
        let graph = Rsz::read_bytes(&bytes, &registry)?;
        assert_eq!(blob_type(&registry), RszFieldType::Object);
        let blob = blob_of(&graph, 0)?;
        assert_eq!(blob.as_reference(), Some(RszRef::Node(graph.instances()[1])));
    }
    Ok(())
}

#[test]
fn test_implausible_values_stay_scalar() -> Result<()> {
    let as_int = probes(&[RszValue::S32(1000)])?;
    let registry = schema();
    let graph = Rsz::read_bytes(&as_int, &registry)?;
    assert_eq!(blob_type(&registry), RszFieldType::S32);
    assert_eq!(blob_of(&graph, 0)?.as_i32(), Some(1000));

    let as_float = probes(&[RszValue::F32(2.5)])?;
    let registry = schema();
    for _ in 0..2 {
        let graph = Rsz::read_bytes(&as_float, &registry)?;
        assert_eq!(blob_type(&registry), RszFieldType::F32);
        assert_eq!(blob_of(&graph, 0)?.as_f32(), Some(2.5));
    }
    Ok(())
}

#[test]
fn test_locked_type_applies_to_later_files() -> Result<()> {
    let registry = schema();
    Rsz::read_bytes(&probes(&[RszValue::F32(0.5)])?, &registry)?;
    assert_eq!(blob_type(&registry), RszFieldType::F32);

    // The second file would have classified as an integer on its own.
    let graph = Rsz::read_bytes(&probes(&[RszValue::S32(1000)])?, &registry)?;
    assert!(blob_of(&graph, 0)?.as_f32().is_some());

    registry.reset_inference();
    let graph = Rsz::read_bytes(&probes(&[RszValue::S32(1000)])?, &registry)?;
    assert_eq!(blob_of(&graph, 0)?.as_i32(), Some(1000));
    Ok(())
}

#[test]
fn test_misclassified_reference_triggers_retry() -> Result<()> {
    // The first probe (index 3) locks the field as a reference; the second
    // (index 4) holds a value that cannot be one.
    let bytes = probes(&[RszValue::S32(1), RszValue::S32(100)])?;
    let registry = schema();

    let mut cursor = ByteCursor::from_slice(&bytes);
    match RszGraph::try_read(&mut cursor, 0, &registry, RszOptions::default())? {
        ReadOutcome::NeedsSchemaRetry { class, field } => {
            assert_eq!(class, "app.Probe");
            assert_eq!(field, "blob");
        }
        ReadOutcome::Complete(_) => panic!("expected a retry request"),
    }
    assert_eq!(blob_type(&registry), RszFieldType::S32);

    let graph = match RszGraph::try_read(&mut cursor, 0, &registry, RszOptions::default())? {
        ReadOutcome::Complete(graph) => graph,
        ReadOutcome::NeedsSchemaRetry { .. } => panic!("second pass must complete"),
    };
    assert_eq!(blob_of(&graph, 0)?.as_i32(), Some(1));
    assert_eq!(blob_of(&graph, 1)?.as_i32(), Some(100));
    Ok(())
}

#[test]
fn test_read_retries_transparently() -> Result<()> {
    let bytes = probes(&[RszValue::S32(1), RszValue::S32(100)])?;
    let registry = schema();
    let graph = Rsz::read_bytes(&bytes, &registry)?;
    assert_eq!(blob_of(&graph, 1)?.as_i32(), Some(100));

    let exhausted = schema();
    let options = RszOptions {
        max_schema_retries: 0,
        ..RszOptions::default()
    };
    let result = Rsz::read_bytes_with(&bytes, 0, &exhausted, options);
    assert!(matches!(result, Err(RszError::Format(_))));
    Ok(())
}

#[test]
fn test_frozen_registry_does_not_infer() -> Result<()> {
    let bytes = probes(&[RszValue::S32(1)])?;
    let registry = schema();
    registry.freeze();
    let graph = Rsz::read_bytes(&bytes, &registry)?;
    assert_eq!(blob_of(&graph, 0)?.as_i32(), Some(1));
    assert!(registry
        .class_by_name("app.Probe")
        .is_some_and(|c| c.fields[0].needs_inference()));
    Ok(())
}

#[test]
fn test_resolved_types_survive_a_snapshot() -> Result<()> {
    let bytes = probes(&[RszValue::F32(3.0)])?;
    let trained = schema();
    Rsz::read_bytes(&bytes, &trained)?;
    let snapshot = trained.export_resolved()?;

    let fresh = schema();
    assert_eq!(fresh.import_resolved(&snapshot)?, 1);
    assert_eq!(blob_type(&fresh), RszFieldType::F32);
    Ok(())
}
