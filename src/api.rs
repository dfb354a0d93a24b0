use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::graph::RszGraph;
use crate::io::ByteCursor;
use crate::options::RszOptions;
use crate::reader::RszReader;
use crate::schema::SchemaRegistry;

/// The main entry point for whole-buffer and whole-file operations.
///
/// Every method is a thin wrapper around [`RszGraph::read`] and
/// [`RszGraph::write`] for the common case of one block at offset 0.
#[derive(Debug)]
pub struct Rsz;

impl Rsz {
    /// Decodes a block at the start of `bytes` with default options.
    pub fn read_bytes(bytes: &[u8], registry: &SchemaRegistry) -> Result<RszGraph> {
        Self::read_bytes_with(bytes, 0, registry, RszOptions::default())
    }

    /// Decodes the block at `offset` of `bytes`.
    pub fn read_bytes_with(
        bytes: &[u8],
        offset: u64,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<RszGraph> {
        let mut cursor = ByteCursor::from_slice(bytes);
        RszGraph::read(&mut cursor, offset, registry, options)
    }

    /// Encodes `graph` into a fresh buffer.
    pub fn write_bytes(graph: &mut RszGraph) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new();
        graph.write(&mut cursor, 0)?;
        Ok(cursor.into_inner())
    }

    /// Memory-maps `path` and decodes the block at its start with default
    /// options.
    pub fn load<P: AsRef<Path>>(path: P, registry: &SchemaRegistry) -> Result<RszGraph> {
        Self::load_with(path, registry, RszOptions::default())
    }

    /// Memory-maps `path` and decodes the block at its start.
    pub fn load_with<P: AsRef<Path>>(
        path: P,
        registry: &SchemaRegistry,
        options: RszOptions,
    ) -> Result<RszGraph> {
        let reader = RszReader::open(path)?;
        reader.read_graph(0, registry, options)
    }

    /// Encodes `graph` and writes it to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(path: P, graph: &mut RszGraph) -> Result<()> {
        let bytes = Self::write_bytes(graph)?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}
