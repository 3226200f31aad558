//! Archive writer. Produces the same catalog the reader consumes; used by
//! data-packaging tools and the test fixtures.

use std::io::{Seek, SeekFrom, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use forge_common::{path, Error, Result};

use crate::format::{FileData, HeaderData, AFS_MAGIC, AFS_VERSION, ENTRY_NAME_SIZE, HEADER_SIZE};

struct PendingFile {
    name: String,
    data: Vec<u8>,
    compress: bool,
}

#[derive(Default)]
pub struct ArchiveBuilder {
    files: Vec<PendingFile>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: &str, data: Vec<u8>, compress: bool) -> Result<()> {
        let name = path::normalize(name);

        if !path::is_valid_path(&name) || name.len() > ENTRY_NAME_SIZE {
            return Err(Error::InvalidPath(name));
        }

        if data.len() > u32::MAX as usize {
            return Err(Error::IntegerOverflow);
        }

        self.files.push(PendingFile {
            name,
            data,
            compress,
        });

        Ok(())
    }

    pub fn write<W: Write + Seek>(&self, out: &mut W) -> Result<()> {
        out.seek(SeekFrom::Start(0)).map_err(Error::IoSeek)?;
        out.write_all(&[0u8; HEADER_SIZE]).map_err(Error::IoWrite)?;

        let mut entries = Vec::with_capacity(self.files.len());
        let mut cursor = HEADER_SIZE as u32;

        for file in &self.files {
            let (payload, compressed_size) = if file.compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&file.data).map_err(Error::IoWrite)?;
                let payload = encoder.finish().map_err(Error::IoWrite)?;
                let compressed_size = payload.len() as u32;
                (payload, compressed_size)
            } else {
                (file.data.clone(), 0)
            };

            let mut name = [0u8; ENTRY_NAME_SIZE];
            name[..file.name.len()].copy_from_slice(file.name.as_bytes());

            entries.push(FileData {
                path: name,
                location: cursor,
                compressed_size,
                uncompressed_size: file.data.len() as u32,
            });

            out.write_all(&payload).map_err(Error::IoWrite)?;
            cursor += payload.len() as u32;
        }

        let catalog_location = cursor;
        for entry in &entries {
            out.write_all(&entry.to_bytes()).map_err(Error::IoWrite)?;
        }

        let header = HeaderData {
            magic: AFS_MAGIC,
            version: AFS_VERSION,
            catalog_location,
            catalog_size: (entries.len() * crate::format::ENTRY_SIZE) as u32,
        };

        out.seek(SeekFrom::Start(0)).map_err(Error::IoSeek)?;
        out.write_all(&header.to_bytes()).map_err(Error::IoWrite)?;
        out.flush().map_err(Error::IoWrite)?;

        Ok(())
    }
}
