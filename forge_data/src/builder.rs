//! Package builder: accumulates deduplicated object blobs, strings, config
//! keys and binary content, then emits the package container.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use forge_common::{BinaryBlob, Error, Result};

use crate::schema::{IndexableStructType, MainType, ObjectRef, ReflectStruct};
use crate::writer::{self, write_compact_index, write_uint_for_size};
use crate::{PACKAGE_IDENTIFIER, PACKAGE_VERSION};

/// Maps the pool indices stored inside objects back to strings and bytes
/// while a source is serialized.
pub trait StringResolver {
    fn global_string(&self, index: usize) -> Result<&str>;
    fn config_key_name(&self, index: usize) -> Result<&str>;
    fn temp_string(&self, index: usize) -> Result<&str>;
    fn binary_content(&self, index: usize) -> Result<&[u8]>;
}

/// A multi-map of blobs to indices with an optional object-identity cache.
#[derive(Default)]
struct BlobCollection {
    blobs: Vec<Arc<BinaryBlob>>,
    blob_to_index: HashMap<Arc<BinaryBlob>, usize>,
    identity_to_index: HashMap<usize, usize>,
}

impl BlobCollection {
    fn lookup_identity(&self, identity: usize) -> Option<usize> {
        self.identity_to_index.get(&identity).copied()
    }

    fn index_blob(&mut self, blob: BinaryBlob, identity: Option<usize>) -> usize {
        let index = match self.blob_to_index.get(&blob) {
            Some(&index) => index,
            None => {
                let index = self.blobs.len();
                let blob = Arc::new(blob);
                self.blobs.push(Arc::clone(&blob));
                self.blob_to_index.insert(blob, index);
                index
            }
        };

        if let Some(identity) = identity {
            self.identity_to_index.insert(identity, index);
        }

        index
    }

    fn clear_identity_cache(&mut self) {
        self.identity_to_index.clear();
    }

    fn blobs(&self) -> &[Arc<BinaryBlob>] {
        &self.blobs
    }
}

struct ConfigKey {
    string_index: usize,
    main_type: MainType,
}

/// Assembles one package out of any number of sources.
pub struct PackageBuilder {
    identifier: u32,
    version: u32,
    write_temp_strings: bool,

    strings: Vec<String>,
    string_to_index: HashMap<String, usize>,

    config_keys: Vec<ConfigKey>,
    string_to_config_key: HashMap<usize, usize>,

    indexables: Vec<BlobCollection>,
    object_spans: Vec<BlobCollection>,
    binary_content: BlobCollection,

    in_progress: HashSet<usize>,
}

impl PackageBuilder {
    pub fn new(write_temp_strings: bool) -> Self {
        Self {
            identifier: PACKAGE_IDENTIFIER,
            version: PACKAGE_VERSION,
            write_temp_strings,
            strings: Vec::new(),
            string_to_index: HashMap::new(),
            config_keys: Vec::new(),
            string_to_config_key: HashMap::new(),
            indexables: (0..IndexableStructType::COUNT)
                .map(|_| BlobCollection::default())
                .collect(),
            object_spans: (0..IndexableStructType::COUNT)
                .map(|_| BlobCollection::default())
                .collect(),
            binary_content: BlobCollection::default(),
            in_progress: HashSet::new(),
        }
    }

    /// Starts serializing a new source.
    ///
    /// Flushes every object-identity cache so identity from a previous
    /// source can never alias an address reused by this one.
    pub fn begin_source<'a>(&'a mut self, resolver: &'a dyn StringResolver) -> SourceWriter<'a> {
        for collection in &mut self.indexables {
            collection.clear_identity_cache();
        }

        SourceWriter {
            builder: self,
            resolver,
        }
    }

    fn index_string(&mut self, value: &str) -> usize {
        if let Some(&index) = self.string_to_index.get(value) {
            return index;
        }

        let index = self.strings.len();
        self.strings.push(value.to_owned());
        self.string_to_index.insert(value.to_owned(), index);
        index
    }

    fn index_config_key(&mut self, string_index: usize, main_type: MainType) -> Result<usize> {
        if let Some(&index) = self.string_to_config_key.get(&string_index) {
            if self.config_keys[index].main_type != main_type {
                tracing::error!(
                    "config key '{}' was defined as multiple conflicting types",
                    self.strings[string_index]
                );
                return Err(Error::MalformedFile);
            }

            return Ok(index);
        }

        let index = self.config_keys.len();
        self.config_keys.push(ConfigKey {
            string_index,
            main_type,
        });
        self.string_to_config_key.insert(string_index, index);
        Ok(index)
    }

    /// Emits the package; the header identifier is back-patched last so a
    /// zero identifier at byte 0 marks an incomplete write.
    pub fn write_package<W: Write + Seek>(&self, stream: &mut W) -> Result<()> {
        stream.write_all(&0u32.to_le_bytes())?;
        stream.write_all(&self.version.to_le_bytes())?;

        write_compact_index(stream, self.strings.len() as u64)?;
        write_compact_index(stream, self.config_keys.len() as u64)?;
        write_compact_index(stream, self.binary_content.blobs().len() as u64)?;

        for string in &self.strings {
            write_compact_index(stream, string.len() as u64)?;
        }

        for string in &self.strings {
            stream.write_all(string.as_bytes())?;
            stream.write_all(&[0])?;
        }

        for key in &self.config_keys {
            write_compact_index(stream, key.string_index as u64)?;
            write_uint_for_size(stream, key.main_type.to_raw(), MainType::COUNT - 1)?;
        }

        for blob in self.binary_content.blobs() {
            write_compact_index(stream, blob.len() as u64)?;
        }

        for index in 0..IndexableStructType::COUNT {
            write_compact_index(stream, self.object_spans[index].blobs().len() as u64)?;
            write_compact_index(stream, self.indexables[index].blobs().len() as u64)?;
        }

        for collection in &self.object_spans {
            for blob in collection.blobs() {
                stream.write_all(blob.bytes())?;
            }
        }

        for collection in &self.indexables {
            for blob in collection.blobs() {
                stream.write_all(blob.bytes())?;
            }
        }

        for blob in self.binary_content.blobs() {
            stream.write_all(blob.bytes())?;
        }

        stream.seek(SeekFrom::Start(0))?;
        stream.write_all(&self.identifier.to_le_bytes())?;
        stream.flush()?;

        Ok(())
    }
}

/// Write access to the builder scoped to one source's resolver.
pub struct SourceWriter<'a> {
    builder: &'a mut PackageBuilder,
    resolver: &'a dyn StringResolver,
}

impl<'a> SourceWriter<'a> {
    pub fn resolver(&self) -> &'a dyn StringResolver {
        self.resolver
    }

    pub fn writes_temp_strings(&self) -> bool {
        self.builder.write_temp_strings
    }

    /// Serializes `obj` (and transitively every object it references) and
    /// returns its index in the object table of its indexable type.
    ///
    /// With `cached` set, repeated calls for the same in-memory object
    /// within one source short-circuit on the identity cache.
    pub fn index_object<T: ReflectStruct>(&mut self, obj: &Arc<T>, cached: bool) -> Result<usize> {
        self.index_object_ref(ObjectRef::from_arc(obj), cached)
    }

    pub(crate) fn index_object_ref(&mut self, obj: ObjectRef<'_>, cached: bool) -> Result<usize> {
        let slot = obj.ty.indexable.index();

        if cached {
            if let Some(index) = self.builder.indexables[slot].lookup_identity(obj.identity) {
                return Ok(index);
            }
        }

        // Serialized object graphs forbid cycles; detect re-entry into an
        // in-progress object.
        if !self.builder.in_progress.insert(obj.identity) {
            tracing::error!("cyclic reference through object type '{}'", obj.ty.name);
            return Err(Error::OperationFailed("cyclic object reference".into()));
        }

        let mut blob = BinaryBlob::new();
        let result = writer::write_struct(self, obj.ty, obj.obj, &mut blob);
        self.builder.in_progress.remove(&obj.identity);
        result?;

        Ok(self.builder.indexables[slot].index_blob(blob, cached.then_some(obj.identity)))
    }

    pub(crate) fn index_span_blob(&mut self, element: IndexableStructType, blob: BinaryBlob) -> usize {
        self.builder.object_spans[element.index()].index_blob(blob, None)
    }

    pub(crate) fn index_binary_content(&mut self, blob: BinaryBlob) -> usize {
        self.builder.binary_content.index_blob(blob, None)
    }

    pub(crate) fn index_string(&mut self, value: &str) -> usize {
        self.builder.index_string(value)
    }

    pub(crate) fn index_config_key(&mut self, string_index: usize, main_type: MainType) -> Result<usize> {
        self.builder.index_config_key(string_index, main_type)
    }
}
