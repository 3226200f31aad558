//! Read side of the AFS container.

use std::io::{Read, Seek, SeekFrom};

use hashbrown::HashSet;

use forge_common::path;
use forge_common::stream::{DeflateReadStream, RangeReadStream, SeekRead, SharedStream};
use forge_common::{Error, Result};

use crate::format::{FileData, HeaderData, AFS_MAGIC, AFS_VERSION, ENTRY_SIZE, HEADER_SIZE};

struct FileInfo {
    name: String,
    position: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

/// An opened archive.
///
/// The backing stream is wrapped in a mutex so any number of per-entry
/// streams can coexist; each entry stream locks only around a single
/// positional read.
pub struct Archive {
    stream: SharedStream<Box<dyn SeekRead>>,
    files: Vec<FileInfo>,
    directories: HashSet<String>,
}

impl Archive {
    pub fn open(mut stream: Box<dyn SeekRead>) -> Result<Self> {
        let archive_size = stream.seek(SeekFrom::End(0)).map_err(Error::IoSeek)?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        stream.seek(SeekFrom::Start(0)).map_err(Error::IoSeek)?;
        stream.read_exact(&mut header_bytes).map_err(Error::IoRead)?;

        let header = HeaderData::parse(&header_bytes);
        if header.magic != AFS_MAGIC || header.version != AFS_VERSION {
            tracing::error!("AFS file header was invalid");
            return Err(Error::InvalidParameter("bad AFS header"));
        }

        if header.catalog_size as usize % ENTRY_SIZE != 0 {
            tracing::error!("AFS catalog size was invalid");
            return Err(Error::InvalidParameter("bad AFS catalog size"));
        }

        let num_files = header.catalog_size as usize / ENTRY_SIZE;

        stream
            .seek(SeekFrom::Start(header.catalog_location as u64))
            .map_err(Error::IoSeek)?;

        let mut files = Vec::with_capacity(num_files);
        let mut directories = HashSet::new();

        for _ in 0..num_files {
            let mut entry_bytes = [0u8; ENTRY_SIZE];
            stream.read_exact(&mut entry_bytes).map_err(Error::IoRead)?;
            let entry = FileData::parse(&entry_bytes);

            let raw_name =
                std::str::from_utf8(entry.path_bytes()).map_err(|_| Error::InvalidUnicode)?;
            let name = path::normalize(&fix_broken_file_path(raw_name));

            if !path::is_valid_path(&name) {
                tracing::error!("invalid path '{}' in archive catalog", raw_name);
                return Err(Error::MalformedFile);
            }

            let stored_size = match entry.compressed_size {
                0 => entry.uncompressed_size,
                compressed => compressed,
            };

            if entry.location as u64 > archive_size
                || archive_size - (entry.location as u64) < stored_size as u64
            {
                tracing::error!("archive entry '{}' lies outside the archive", name);
                return Err(Error::MalformedFile);
            }

            let mut parent = name.as_str();
            while let Some((head, _)) = parent.rsplit_once('/') {
                directories.insert(head.to_owned());
                parent = head;
            }

            files.push(FileInfo {
                name,
                position: entry.location,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
            });
        }

        Ok(Self {
            stream: SharedStream::new(stream)?,
            files,
            directories,
        })
    }

    pub fn file_count(&self) -> u32 {
        self.files.len() as u32
    }

    pub fn files(&self) -> impl Iterator<Item = FileHandle<'_>> {
        (0..self.files.len() as u32).map(|index| FileHandle {
            archive: self,
            index,
        })
    }

    /// Case-insensitive lookup by archive-relative path.
    pub fn find_file(&self, name: &str) -> Option<FileHandle<'_>> {
        let name = path::normalize(name);

        self.files
            .iter()
            .position(|info| info.name == name)
            .map(|index| FileHandle {
                archive: self,
                index: index as u32,
            })
    }

    /// Whether the synthesized directory tree contains `name`.
    pub fn has_directory(&self, name: &str) -> bool {
        self.directories.contains(&path::normalize(name))
    }

    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.directories.iter().map(String::as_str)
    }

    fn open_by_index(&self, index: u32) -> Result<Box<dyn SeekRead>> {
        let info = &self.files[index as usize];
        let cursor = self.stream.cursor();

        if info.compressed_size > 0 {
            let slice = RangeReadStream::new(
                cursor,
                info.position as u64,
                info.compressed_size as u64,
            )?;

            Ok(Box::new(DeflateReadStream::new(
                slice,
                Some(info.uncompressed_size as u64),
            )))
        } else {
            Ok(Box::new(RangeReadStream::new(
                cursor,
                info.position as u64,
                info.uncompressed_size as u64,
            )?))
        }
    }
}

/// A file entry of an opened archive.
#[derive(Copy, Clone)]
pub struct FileHandle<'a> {
    archive: &'a Archive,
    index: u32,
}

impl FileHandle<'_> {
    pub fn path(&self) -> &str {
        &self.archive.files[self.index as usize].name
    }

    pub fn size(&self) -> u32 {
        self.archive.files[self.index as usize].uncompressed_size
    }

    /// Opens the entry as a normal seekable read stream, stored or
    /// compressed alike.
    pub fn open(&self) -> Result<Box<dyn SeekRead>> {
        self.archive.open_by_index(self.index)
    }
}

/// Collapses the `"/ "` and `"\ "` artifacts some legacy catalogs carry:
/// a space directly after a separator is dropped.
fn fix_broken_file_path(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_separator = false;

    for c in name.chars() {
        // Leave the separator flag set so runs of spaces collapse too.
        if prev_separator && c == ' ' {
            continue;
        }

        prev_separator = c == '/' || c == '\\';
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Seek, SeekFrom};

    use crate::builder::ArchiveBuilder;
    use crate::format::{FileData, HeaderData, AFS_MAGIC, AFS_VERSION, ENTRY_NAME_SIZE, ENTRY_SIZE};

    use super::{fix_broken_file_path, Archive};

    fn raw_archive(entries: &[(&str, u32, u32, u32)], data: &[u8]) -> Vec<u8> {
        // Header, then payload bytes, then the catalog.
        let catalog_location = 24 + data.len() as u32;

        let mut bytes = HeaderData {
            magic: AFS_MAGIC,
            version: AFS_VERSION,
            catalog_location,
            catalog_size: (entries.len() * ENTRY_SIZE) as u32,
        }
        .to_bytes()
        .to_vec();

        bytes.extend_from_slice(data);

        for &(name, location, compressed, uncompressed) in entries {
            let mut path = [0u8; ENTRY_NAME_SIZE];
            path[..name.len()].copy_from_slice(name.as_bytes());

            bytes.extend_from_slice(&FileData {
                path,
                location,
                compressed_size: compressed,
                uncompressed_size: uncompressed,
            }
            .to_bytes());
        }

        bytes
    }

    #[test]
    fn broken_path_artifacts_collapse() {
        assert_eq!(fix_broken_file_path("a\\ b/c.txt"), "a\\b/c.txt");
        assert_eq!(fix_broken_file_path("models/ rock.md2"), "models/rock.md2");
        assert_eq!(fix_broken_file_path("plain/path.txt"), "plain/path.txt");
    }

    #[test]
    fn stored_entry_with_space_artifact() {
        // Payload "xyz" stored at offset 32 inside an 8-byte padded region.
        let mut data = vec![0u8; 11];
        data[8..].copy_from_slice(b"xyz");

        let bytes = raw_archive(&[("a\\ b/c.txt", 32, 0, 3)], &data);
        let archive = Archive::open(Box::new(Cursor::new(bytes))).unwrap();

        let handle = archive.find_file("a/b/c.txt").expect("fixed-up path");
        assert_eq!(handle.path(), "a/b/c.txt");
        assert_eq!(handle.size(), 3);

        let mut stream = handle.open().unwrap();
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 3);
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut contents = Vec::new();
        stream.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"xyz");

        assert!(archive.has_directory("a"));
        assert!(archive.has_directory("a/b"));
        assert!(!archive.has_directory("a/b/c.txt"));
    }

    #[test]
    fn out_of_bounds_entry_is_rejected() {
        let bytes = raw_archive(&[("big.bin", 24, 0, 4096)], &[0u8; 8]);
        assert!(Archive::open(Box::new(Cursor::new(bytes))).is_err());
    }

    #[test]
    fn invalid_catalog_path_is_rejected() {
        let bytes = raw_archive(&[("bad/../escape.txt", 24, 0, 1)], &[0u8; 8]);
        assert!(Archive::open(Box::new(Cursor::new(bytes))).is_err());

        let bytes = raw_archive(&[("nul", 24, 0, 1)], &[0u8; 8]);
        assert!(Archive::open(Box::new(Cursor::new(bytes))).is_err());
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut bytes = raw_archive(&[], &[]);
        bytes[0] = b'X';
        assert!(Archive::open(Box::new(Cursor::new(bytes))).is_err());
    }

    #[test]
    fn compressed_round_trip_through_builder() {
        let payload: Vec<u8> = (0u16..2048).flat_map(|v| v.to_le_bytes()).collect();

        let mut builder = ArchiveBuilder::new();
        builder
            .add_file("Maps/Town.dat", payload.clone(), true)
            .unwrap();
        builder.add_file("readme.txt", b"hello".to_vec(), false).unwrap();

        let mut bytes = Cursor::new(Vec::new());
        builder.write(&mut bytes).unwrap();

        let archive = Archive::open(Box::new(Cursor::new(bytes.into_inner()))).unwrap();
        assert_eq!(archive.file_count(), 2);

        // Lookup is case-insensitive against the normalized catalog.
        let handle = archive.find_file("maps/town.dat").unwrap();
        assert_eq!(handle.size() as usize, payload.len());

        let mut contents = Vec::new();
        handle.open().unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, payload);

        let mut readme = Vec::new();
        archive
            .find_file("README.TXT")
            .unwrap()
            .open()
            .unwrap()
            .read_to_end(&mut readme)
            .unwrap();
        assert_eq!(readme, b"hello");

        // Independent entry streams share one backing stream.
        let mut a = archive.find_file("maps/town.dat").unwrap().open().unwrap();
        let mut b = archive.find_file("readme.txt").unwrap().open().unwrap();

        let mut word = [0u8; 4];
        a.read_exact(&mut word).unwrap();
        assert_eq!(word, payload[..4]);

        let mut hello = [0u8; 5];
        b.read_exact(&mut hello).unwrap();
        assert_eq!(&hello, b"hello");
    }
}
