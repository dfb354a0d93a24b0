//! Tools for inspecting the physical structure of RSZ blocks.
//! Useful for debugging schemas and checking what a writer produced.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::format::{RszHeader, UserDataInfo};
use crate::graph::{InstanceId, RszGraph, RszValue, UserData};
use crate::io::ByteCursor;
use crate::options::RszOptions;
use crate::reader::RszReader;
use crate::schema::SchemaRegistry;

/// A structural report of one RSZ block.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Block size in bytes (the whole buffer for the outermost block).
    pub size: u64,
    /// Layout version.
    pub version: u32,
    /// Raw header counts and offsets.
    pub header: HeaderInfo,
    /// One entry per instance descriptor.
    pub instances: Vec<InstanceSummary>,
    /// Userdata records.
    pub userdata: Vec<UserDataSummary>,
    /// Object-list roots and what they reference.
    pub roots: Vec<NodeInfo>,
}

/// Header fields.
#[derive(Debug, Serialize)]
pub struct HeaderInfo {
    /// Object table length.
    pub object_count: i32,
    /// Instance descriptor count.
    pub instance_count: i32,
    /// Userdata record count.
    pub userdata_count: i64,
    /// Offset of the descriptor table.
    pub instance_offset: i64,
    /// Offset of the data section.
    pub data_offset: i64,
    /// Offset of the userdata table.
    pub userdata_offset: i64,
}

/// One instance descriptor.
#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    /// List index.
    pub index: usize,
    /// Type id.
    pub type_id: u32,
    /// Class name from the registry.
    pub class: String,
}

/// One userdata record.
#[derive(Debug, Serialize)]
pub struct UserDataSummary {
    /// Indirected instance.
    pub instance: i32,
    /// External path, or the path hash of an embedded block.
    pub target: String,
    /// Nested report for embedded blocks.
    pub nested: Option<Box<DebugReport>>,
}

/// A node of the reference tree.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// List index.
    pub index: i32,
    /// Class name.
    pub class: String,
    /// True if the node was already printed higher up in the tree (shared or
    /// cyclic reference); its children are not repeated.
    pub shared: bool,
    /// Referenced nodes, in field order.
    pub children: Vec<NodeInfo>,
}

/// The RSZ Inspector tool.
#[derive(Debug)]
pub struct RszInspector;

impl RszInspector {
    /// Analyzes the block at the start of a file.
    pub fn inspect_file<P: AsRef<Path>>(
        path: P,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<DebugReport> {
        let reader = RszReader::open(path)?;
        Self::inspect_bytes(reader.as_bytes(), registry, options)
    }

    /// Analyzes the block at the start of `bytes`.
    pub fn inspect_bytes(bytes: &[u8], registry: &SchemaRegistry, options: RszOptions) -> Result<DebugReport> {
        let mut cursor = ByteCursor::from_slice(bytes);
        let header = RszHeader::read(&mut cursor)?;
        cursor.seek(0)?;
        let graph = RszGraph::read(&mut cursor, 0, registry, options)?;
        Ok(Self::report(&graph, &header, bytes.len() as u64))
    }

    fn report(graph: &RszGraph, header: &RszHeader, size: u64) -> DebugReport {
        let registry = graph.registry();
        let instances = graph
            .instance_infos()
            .iter()
            .enumerate()
            .map(|(index, info)| InstanceSummary {
                index,
                type_id: info.type_id,
                class: registry
                    .class_name_by_type_id(info.type_id)
                    .unwrap_or("?")
                    .to_string(),
            })
            .collect();

        let userdata = graph
            .userdata_infos()
            .iter()
            .map(|record| {
                let instance = record.instance_id();
                match record {
                    UserDataInfo::External { path, .. } => UserDataSummary {
                        instance,
                        target: path.clone(),
                        nested: None,
                    },
                    UserDataInfo::Embedded {
                        path_hash,
                        data_size,
                        ..
                    } => {
                        let nested = usize::try_from(instance)
                            .ok()
                            .and_then(|i| graph.instance_at(i))
                            .and_then(|id| graph.get(id).ok())
                            .and_then(|node| match &node.user_data {
                                Some(UserData::Embedded { graph: inner, .. }) => {
                                    let mut inner_header = RszHeader::new(inner.version());
                                    inner_header.object_count = inner.object_table().len() as i32;
                                    inner_header.instance_count = inner.instance_infos().len() as i32;
                                    inner_header.userdata_count = inner.userdata_infos().len() as i64;
                                    Some(Box::new(Self::report(inner, &inner_header, u64::from(*data_size))))
                                }
                                _ => None,
                            });
                        UserDataSummary {
                            instance,
                            target: format!("{path_hash:#010x}"),
                            nested,
                        }
                    }
                }
            })
            .collect();

        let mut seen = HashSet::new();
        let roots = graph
            .object_list()
            .iter()
            .map(|id| Self::node(graph, *id, &mut seen))
            .collect();

        DebugReport {
            size,
            version: header.version,
            header: HeaderInfo {
                object_count: header.object_count,
                instance_count: header.instance_count,
                userdata_count: header.userdata_count,
                instance_offset: header.instance_offset,
                data_offset: header.data_offset,
                userdata_offset: header.userdata_offset,
            },
            instances,
            userdata,
            roots,
        }
    }

    fn node(graph: &RszGraph, id: InstanceId, seen: &mut HashSet<InstanceId>) -> NodeInfo {
        let Ok(node) = graph.get(id) else {
            return NodeInfo {
                index: -1,
                class: "<dangling>".to_string(),
                shared: false,
                children: Vec::new(),
            };
        };
        let shared = !seen.insert(id);
        let children = if shared {
            Vec::new()
        } else {
            let mut targets = Vec::new();
            for value in &node.values {
                collect_targets(value, &mut targets);
            }
            targets
                .into_iter()
                .map(|child| Self::node(graph, child, seen))
                .collect()
        };
        NodeInfo {
            index: node.index(),
            class: node.class_name().to_string(),
            shared,
            children,
        }
    }
}

fn collect_targets(value: &RszValue, out: &mut Vec<InstanceId>) {
    value.for_each_ref(&mut |reference| {
        if let Some(id) = reference.node().filter(|id| *id != InstanceId::NULL) {
            out.push(id);
        }
    });
}

impl std::fmt::Display for DebugReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== RSZ INSPECTOR REPORT ===")?;
        writeln!(f, "Version:        {}", self.version)?;
        writeln!(f, "Size:           {}b", self.size)?;
        writeln!(
            f,
            "Tables:         {} objects | {} instances | {} userdata",
            self.header.object_count, self.header.instance_count, self.header.userdata_count
        )?;
        writeln!(
            f,
            "Offsets:        instances @{} | userdata @{} | data @{}",
            self.header.instance_offset, self.header.userdata_offset, self.header.data_offset
        )?;
        if !self.userdata.is_empty() {
            writeln!(f, "\n[USERDATA]")?;
            for record in &self.userdata {
                writeln!(f, "  #{} -> {}", record.instance, record.target)?;
            }
        }
        writeln!(f, "\n[OBJECT TREE]")?;
        for (i, root) in self.roots.iter().enumerate() {
            root.fmt_recursive(f, "", i == self.roots.len() - 1)?;
        }
        Ok(())
    }
}

impl NodeInfo {
    fn fmt_recursive(&self, f: &mut std::fmt::Formatter<'_>, prefix: &str, is_last: bool) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let marker = if self.shared { " (shared)" } else { "" };
        writeln!(f, "{}{}[{}] {}{}", prefix, connector, self.index, self.class, marker)?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == self.children.len() - 1;
            child.fmt_recursive(f, &format!("{}{}", prefix, child_prefix), is_last_child)?;
        }
        Ok(())
    }
}
