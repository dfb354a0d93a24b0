#![allow(missing_docs)]

mod common;

use common::{node, registry, scene, transform};
use rszgraph::format::UserDataInfo;
use rszgraph::constants::MAX_EMBEDDED_DEPTH;
use rszgraph::{Result, Rsz, RszError, RszGraph, RszOptions, RszValue, SchemaRegistry, UserData};

#[test]
fn test_external_userdata_roundtrip() -> Result<()> {
    let registry = registry();
    let mut s = scene(&registry, RszOptions::default())?;
    let shared = s.graph.create_user_data("app.Settings", "natives/stm/common.user.2")?;
    let own = s.graph.create_user_data("app.Settings", "natives/stm/root.user.2")?;
    s.graph.get_mut(s.child)?.set_field("settings", node(shared))?;
    s.graph.get_mut(s.root)?.set_field("settings", node(own))?;
    s.graph.rebuild()?;

    let bytes = Rsz::write_bytes(&mut s.graph)?;
    let read = Rsz::read_bytes(&bytes, &registry)?;
    assert!(s.graph.deep_eq(s.root, &read, read.object_list()[0]));

    let paths: Vec<&str> = read
        .userdata_infos()
        .iter()
        .filter_map(|record| match record {
            UserDataInfo::External { path, .. } => Some(path.as_str()),
            UserDataInfo::Embedded { .. } => None,
        })
        .collect();
    assert_eq!(paths.len(), 2);
    assert!(paths.contains(&"natives/stm/common.user.2"));
    assert!(paths.contains(&"natives/stm/root.user.2"));

    // Userdata instances carry no payload in the data section.
    for record in read.userdata_infos() {
        let id = read.instance_at(record.instance_id() as usize).expect("listed");
        let instance = read.get(id)?;
        assert!(instance.is_user_data());
        assert!(instance.values.is_empty());
    }
    Ok(())
}

#[test]
fn test_repeated_paths_share_string_storage() -> Result<()> {
    let registry = registry();
    let mut s = scene(&registry, RszOptions::default())?;
    let mut once = s.graph.clone();
    let a = s.graph.create_user_data("app.Settings", "natives/stm/same.user")?;
    let b = s.graph.create_user_data("app.Settings", "natives/stm/same.user")?;
    s.graph.get_mut(s.root)?.set_field("settings", node(a))?;
    s.graph.get_mut(s.child)?.set_field("settings", node(b))?;
    s.graph.rebuild()?;

    let c = once.create_user_data("app.Settings", "natives/stm/same.user")?;
    let d = once.create_user_data("app.Settings", "natives/stm/diff.user")?;
    once.get_mut(s.root)?.set_field("settings", node(c))?;
    once.get_mut(s.child)?.set_field("settings", node(d))?;
    once.rebuild()?;

    let shared = Rsz::write_bytes(&mut s.graph)?;
    let distinct = Rsz::write_bytes(&mut once)?;
    assert!(shared.len() < distinct.len());

    let read = Rsz::read_bytes(&shared, &registry)?;
    assert_eq!(read.userdata_infos().len(), 2);
    assert!(s.graph.deep_eq(s.root, &read, read.object_list()[0]));
    Ok(())
}

#[test]
fn test_embedded_userdata_roundtrip() -> Result<()> {
    let registry = registry();
    let options = RszOptions::embedded();

    let mut nested = RszGraph::new(&registry, options);
    let inner = transform(&mut nested, 6.0)?;
    nested.add_to_object_table(inner)?;

    let mut s = scene(&registry, options)?;
    let ud = s.graph.create_embedded_user_data("app.Settings", nested)?;
    s.graph.get_mut(s.root)?.set_field("settings", node(ud))?;
    s.graph.rebuild()?;

    let bytes = Rsz::write_bytes(&mut s.graph)?;
    match s.graph.userdata_infos() {
        [UserDataInfo::Embedded {
            data_size,
            rsz_offset,
            ..
        }] => {
            assert!(*data_size > 0);
            assert_eq!(*rsz_offset as usize + *data_size as usize, bytes.len());
            assert_eq!(&bytes[*rsz_offset as usize..*rsz_offset as usize + 4], b"RSZ\0");
        }
        other => panic!("unexpected userdata table {other:?}"),
    }

    let read = Rsz::read_bytes_with(&bytes, 0, &registry, options)?;
    let root = read.object_list()[0];
    assert!(s.graph.deep_eq(s.root, &read, root));

    let settings = read
        .get(root)?
        .field("settings")
        .and_then(RszValue::as_reference)
        .and_then(|r| r.node())
        .expect("settings reference");
    let Some(UserData::Embedded { graph, .. }) = &read.get(settings)?.user_data else {
        panic!("settings must embed a graph");
    };
    assert_eq!(graph.object_list().len(), 1);
    let scale = graph
        .get(graph.object_list()[0])?
        .field("scale")
        .and_then(RszValue::as_f32);
    assert_eq!(scale, Some(6.0));

    // Decoding a second time re-emits the same bytes.
    let mut again = read;
    assert_eq!(Rsz::write_bytes(&mut again)?, bytes);
    Ok(())
}

/// Writes the scene with one embedded userdata block; returns the bytes and the
/// byte offset of that block's userdata record.
fn embedded_scene(registry: &SchemaRegistry) -> Result<(Vec<u8>, usize)> {
    let options = RszOptions::embedded();
    let mut nested = RszGraph::new(registry, options);
    let inner = transform(&mut nested, 6.0)?;
    nested.add_to_object_table(inner)?;

    let mut s = scene(registry, options)?;
    let ud = s.graph.create_embedded_user_data("app.Settings", nested)?;
    s.graph.get_mut(s.root)?.set_field("settings", node(ud))?;
    s.graph.rebuild()?;
    let bytes = Rsz::write_bytes(&mut s.graph)?;
    let userdata_offset = i64::from_le_bytes(bytes[40..48].try_into().expect("8 bytes"));
    Ok((bytes, userdata_offset as usize))
}

#[test]
fn test_embedded_block_pointing_backwards_is_rejected() -> Result<()> {
    let registry = registry();
    let (bytes, record) = embedded_scene(&registry)?;
    assert!(Rsz::read_bytes_with(&bytes, 0, &registry, RszOptions::embedded()).is_ok());

    // The block itself, then an offset before it.
    for rsz_offset in [0i64, -16] {
        let mut corrupt = bytes.clone();
        corrupt[record + 16..record + 24].copy_from_slice(&rsz_offset.to_le_bytes());
        let result = Rsz::read_bytes_with(&corrupt, 0, &registry, RszOptions::embedded());
        assert!(matches!(result, Err(RszError::Format(_))), "rsz_offset {rsz_offset}");
    }

    let mut oversized = bytes.clone();
    oversized[record + 12..record + 16].copy_from_slice(&u32::MAX.to_le_bytes());
    let result = Rsz::read_bytes_with(&oversized, 0, &registry, RszOptions::embedded());
    assert!(matches!(result, Err(RszError::Format(_))));
    Ok(())
}

/// `levels` blocks of game objects, each embedding the next; the innermost
/// block holds a single transform.
fn nested_chain(registry: &SchemaRegistry, levels: usize) -> Result<RszGraph> {
    let options = RszOptions::embedded();
    let mut graph = RszGraph::new(registry, options);
    if levels == 0 {
        let t = transform(&mut graph, 1.0)?;
        graph.add_to_object_table(t)?;
        return Ok(graph);
    }
    let inner = nested_chain(registry, levels - 1)?;
    let ud = graph.create_embedded_user_data("app.Settings", inner)?;
    let root = graph.create_instance("app.GameObject")?;
    graph.get_mut(root)?.set_field("settings", node(ud))?;
    graph.add_to_object_table(root)?;
    graph.rebuild()?;
    Ok(graph)
}

#[test]
fn test_embedded_nesting_depth_is_bounded() -> Result<()> {
    let registry = registry();
    let options = RszOptions::embedded();

    let mut deepest = nested_chain(&registry, MAX_EMBEDDED_DEPTH)?;
    let bytes = Rsz::write_bytes(&mut deepest)?;
    assert!(Rsz::read_bytes_with(&bytes, 0, &registry, options).is_ok());

    let mut too_deep = nested_chain(&registry, MAX_EMBEDDED_DEPTH + 1)?;
    let bytes = Rsz::write_bytes(&mut too_deep)?;
    let result = Rsz::read_bytes_with(&bytes, 0, &registry, options);
    assert!(matches!(result, Err(RszError::Format(_))));
    Ok(())
}
