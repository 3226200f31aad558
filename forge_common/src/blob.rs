use std::io::{self, Write};

/// An owned byte blob with content equality and content hashing.
///
/// Blobs are deduplication keys in the package builder, so they are
/// intentionally not `Clone`; ownership moves into the collection that
/// indexes them.
#[derive(Debug, Default, PartialEq, Eq, Hash)]
pub struct BinaryBlob {
    bytes: Vec<u8>,
}

impl BinaryBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl Write for BinaryBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::BinaryBlob;

    fn hash(blob: &BinaryBlob) -> u64 {
        let mut hasher = DefaultHasher::new();
        blob.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_and_hash_are_content_based() {
        let mut a = BinaryBlob::new();
        a.append(b"hello ");
        a.append(b"world");

        let b = BinaryBlob::from_vec(b"hello world".to_vec());

        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));

        let c = BinaryBlob::from_vec(b"hello worlds".to_vec());
        assert_ne!(a, c);
    }
}
