//! Persistent node cache: one file per node under `cache/` in the
//! intermediate location, keyed by namespace, type and identifier hash.

use std::io::{Read, Write};

use bytes::{Buf, BufMut};

use forge_common::{BuildPath, Error, Result};
use forge_data::codec::{Decode, Encode};
use forge_data::fourcc;

use crate::node::{DependencyNode, NodeKey};
use crate::vfs::{BuildFileLocation, BuildFileSystem, FileStatus, OutputStream};

pub const CACHE_MAGIC: u32 = fourcc(*b"FGND");
pub const CACHE_FORMAT_VERSION: u32 = 1;

const CACHE_DIR: &str = "cache";

fn fnv1a64(data: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// `cache/n<namespace>_t<type>_<identifier-hash>.node`
pub fn cache_file_path(key: &NodeKey) -> BuildPath {
    let name = format!(
        "{CACHE_DIR}/n{:08x}_t{:08x}_{:016x}.node",
        key.namespace,
        key.node_type,
        fnv1a64(key.identifier.as_str())
    );

    BuildPath::new(&name).expect("cache names are always valid paths")
}

impl Encode for BuildFileLocation {
    fn encode<B>(&self, buf: B)
    where
        B: BufMut,
    {
        self.to_raw().encode(buf);
    }
}

impl Decode for BuildFileLocation {
    fn decode<B>(buf: B) -> Result<Self>
    where
        B: Buf,
    {
        BuildFileLocation::from_raw(u8::decode(buf)?).ok_or(Error::MalformedFile)
    }
}

impl Encode for NodeKey {
    fn encode<B>(&self, mut buf: B)
    where
        B: BufMut,
    {
        self.namespace.encode(&mut buf);
        self.node_type.encode(&mut buf);
        self.location.encode(&mut buf);
        self.identifier.as_str().encode(&mut buf);
    }
}

impl Decode for NodeKey {
    fn decode<B>(mut buf: B) -> Result<Self>
    where
        B: Buf,
    {
        let namespace = u32::decode(&mut buf)?;
        let node_type = u32::decode(&mut buf)?;
        let location = BuildFileLocation::decode(&mut buf)?;
        let identifier = BuildPath::new(&String::decode(&mut buf)?)?;

        Ok(Self {
            namespace,
            node_type,
            location,
            identifier,
        })
    }
}

impl Encode for FileStatus {
    fn encode<B>(&self, mut buf: B)
    where
        B: BufMut,
    {
        self.location.encode(&mut buf);
        self.path.as_str().encode(&mut buf);
        self.size.encode(&mut buf);
        self.mtime.encode(&mut buf);
        self.is_directory.encode(&mut buf);
    }
}

impl Decode for FileStatus {
    fn decode<B>(mut buf: B) -> Result<Self>
    where
        B: Buf,
    {
        let location = BuildFileLocation::decode(&mut buf)?;
        let path = BuildPath::new(&String::decode(&mut buf)?)?;
        let size = u64::decode(&mut buf)?;
        let mtime = u64::decode(&mut buf)?;
        let is_directory = bool::decode(&mut buf)?;

        Ok(Self {
            location,
            path,
            size,
            mtime,
            is_directory,
        })
    }
}

fn encode_list<B: BufMut, T: Encode>(items: &[T], mut buf: B) {
    (items.len() as u32).encode(&mut buf);
    for item in items {
        item.encode(&mut buf);
    }
}

fn decode_list<B: Buf, T: Decode>(mut buf: B) -> Result<Vec<T>> {
    let count = u32::decode(&mut buf)? as usize;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(T::decode(&mut buf)?);
    }
    Ok(items)
}

pub fn encode_node(node: &DependencyNode) -> Vec<u8> {
    let mut buf = Vec::new();

    CACHE_MAGIC.encode(&mut buf);
    CACHE_FORMAT_VERSION.encode(&mut buf);

    node.key.encode(&mut buf);
    node.compiler_version.encode(&mut buf);
    node.compiled.encode(&mut buf);

    encode_list(&node.inputs, &mut buf);
    encode_list(&node.analysis_products, &mut buf);
    encode_list(&node.compile_products, &mut buf);
    encode_list(&node.dependencies, &mut buf);

    node.private_data.encode(&mut buf);

    buf
}

pub fn decode_node(bytes: &[u8]) -> Result<DependencyNode> {
    let mut buf = bytes;

    if u32::decode(&mut buf)? != CACHE_MAGIC {
        return Err(Error::MalformedFile);
    }
    if u32::decode(&mut buf)? != CACHE_FORMAT_VERSION {
        return Err(Error::MalformedFile);
    }

    let key = NodeKey::decode(&mut buf)?;
    let compiler_version = u32::decode(&mut buf)?;
    let compiled = bool::decode(&mut buf)?;

    let inputs = decode_list(&mut buf)?;
    let analysis_products = decode_list(&mut buf)?;
    let compile_products = decode_list(&mut buf)?;
    let dependencies = decode_list(&mut buf)?;

    let private_data = Vec::<u8>::decode(&mut buf)?;

    Ok(DependencyNode {
        key,
        compiler_version,
        compiled,
        inputs,
        analysis_products,
        compile_products,
        dependencies,
        private_data,
        was_compiled: false,
        relevant: false,
    })
}

/// Restores every cached node record. Unreadable records are skipped: a
/// stale or truncated cache only costs a rebuild.
pub fn load_nodes(fs: &mut dyn BuildFileSystem) -> Result<Vec<DependencyNode>> {
    let cache_dir = BuildPath::new(CACHE_DIR).expect("static path");
    let entries = fs.enumerate(BuildFileLocation::IntermediateDir, &cache_dir, true, false)?;

    let mut nodes = Vec::new();

    for entry in entries {
        let Some(mut stream) = fs.open_read(BuildFileLocation::IntermediateDir, &entry.path)?
        else {
            continue;
        };

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;

        match decode_node(&bytes) {
            Ok(node) => nodes.push(node),
            Err(err) => {
                tracing::warn!("discarding unreadable cache record '{}': {}", entry.path, err);
            }
        }
    }

    tracing::debug!("restored {} cached nodes", nodes.len());
    Ok(nodes)
}

pub fn save_node(fs: &mut dyn BuildFileSystem, node: &DependencyNode) -> Result<()> {
    let path = cache_file_path(&node.key);

    let mut stream = fs.open_write(BuildFileLocation::IntermediateDir, &path)?;
    stream.write_all(&encode_node(node)).map_err(Error::IoWrite)?;
    stream.commit()
}

#[cfg(test)]
mod tests {
    use forge_common::BuildPath;

    use crate::node::{DependencyNode, NodeKey};
    use crate::vfs::{BuildFileLocation, FileStatus};

    use super::{cache_file_path, decode_node, encode_node};

    fn sample_node() -> DependencyNode {
        let mut node = DependencyNode::new(NodeKey {
            namespace: 0x1234,
            node_type: 0x5678,
            location: BuildFileLocation::SourceDir,
            identifier: BuildPath::new("pipelines/root.rpl").unwrap(),
        });

        node.compiler_version = 3;
        node.compiled = true;
        node.inputs.push(FileStatus {
            location: BuildFileLocation::SourceDir,
            path: BuildPath::new("pipelines/root.rpl").unwrap(),
            size: 812,
            mtime: 1799,
            is_directory: false,
        });
        node.analysis_products.push(FileStatus {
            location: BuildFileLocation::IntermediateDir,
            path: BuildPath::new("rpll/idx/pipelines/root.rpl").unwrap(),
            size: 16,
            mtime: 1800,
            is_directory: false,
        });
        node.compile_products.push(FileStatus {
            location: BuildFileLocation::IntermediateDir,
            path: BuildPath::new("rpll/out/pipelines/root.rpl").unwrap(),
            size: 200,
            mtime: 1801,
            is_directory: false,
        });
        node.dependencies.push(NodeKey {
            namespace: 0x1234,
            node_type: 0x9abc,
            location: BuildFileLocation::IntermediateDir,
            identifier: BuildPath::new("rpll/g_0/pipelines/root.rpl").unwrap(),
        });
        node.private_data = vec![1, 2, 3];

        node
    }

    #[test]
    fn record_round_trip() {
        let node = sample_node();
        let decoded = decode_node(&encode_node(&node)).unwrap();

        assert_eq!(decoded.key, node.key);
        assert_eq!(decoded.compiler_version, 3);
        assert!(decoded.compiled);
        assert_eq!(decoded.inputs, node.inputs);
        assert_eq!(decoded.analysis_products, node.analysis_products);
        assert_eq!(decoded.compile_products, node.compile_products);
        assert_eq!(decoded.dependencies, node.dependencies);
        assert_eq!(decoded.private_data, vec![1, 2, 3]);
        assert!(!decoded.was_compiled);
    }

    #[test]
    fn truncated_record_fails() {
        let bytes = encode_node(&sample_node());
        assert!(decode_node(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn cache_path_is_stable_per_key() {
        let node = sample_node();
        let a = cache_file_path(&node.key);
        let b = cache_file_path(&node.key);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("cache/n00001234_t00005678_"));
        assert!(a.as_str().ends_with(".node"));
    }
}
