//! Stream capability traits and the adapters used by the archive mounter
//! and the virtual file system.
//!
//! Streams are built directly on `std::io`; the traits here only bundle the
//! capabilities so they can travel as trait objects.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use parking_lot::Mutex;

/// A seekable read stream.
pub trait SeekRead: Read + Seek + Send {}
impl<T: Read + Seek + Send + ?Sized> SeekRead for T {}

/// A seekable write stream.
pub trait SeekWrite: Write + Seek + Send {}
impl<T: Write + Seek + Send + ?Sized> SeekWrite for T {}

fn seek_out_of_range() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "seek out of range")
}

/// Restricts the visible file of an inner seekable reader to
/// `[start, start + len)`.
pub struct RangeReadStream<R> {
    inner: R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> RangeReadStream<R> {
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<R: Read + Seek> Read for RangeReadStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len - self.pos;
        if remaining == 0 {
            return Ok(0);
        }

        let limit = buf.len().min(remaining as usize);
        let count = self.inner.read(&mut buf[..limit])?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for RangeReadStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.pos as i128 + offset as i128,
            SeekFrom::End(offset) => self.len as i128 + offset as i128,
        };

        if target < 0 || target > self.len as i128 {
            return Err(seek_out_of_range());
        }

        self.pos = target as u64;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(self.pos)
    }
}

/// Decompresses a zlib-deflate payload from an inner seekable reader.
///
/// The stream is not naturally seekable: rewinding restarts decompression
/// from offset 0 and forward seeks scrap-read the gap.
pub struct DeflateReadStream<R: Read + Seek> {
    decoder: Option<ZlibDecoder<R>>,
    pos: u64,
    decompressed_size: Option<u64>,
}

impl<R: Read + Seek> DeflateReadStream<R> {
    pub fn new(inner: R, decompressed_size: Option<u64>) -> Self {
        Self {
            decoder: Some(ZlibDecoder::new(inner)),
            pos: 0,
            decompressed_size,
        }
    }

    pub fn decompressed_size(&self) -> Option<u64> {
        self.decompressed_size
    }

    fn restart(&mut self) -> io::Result<()> {
        let decoder = self.decoder.take().expect("decoder always present");
        let mut inner = decoder.into_inner();

        // Reinstall the decoder before reporting a failed rewind so the
        // stream stays usable.
        let seeked = inner.seek(SeekFrom::Start(0));
        self.decoder = Some(ZlibDecoder::new(inner));
        self.pos = 0;

        seeked?;
        Ok(())
    }

    fn skip_forward(&mut self, mut remaining: u64) -> io::Result<()> {
        let mut scrap = [0u8; 2048];

        while remaining > 0 {
            let chunk = remaining.min(scrap.len() as u64) as usize;
            self.read_exact(&mut scrap[..chunk])?;
            remaining -= chunk as u64;
        }

        Ok(())
    }
}

impl<R: Read + Seek> Read for DeflateReadStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.decompressed_size {
            Some(size) => buf.len().min((size - self.pos) as usize),
            None => buf.len(),
        };

        if limit == 0 {
            return Ok(0);
        }

        let decoder = self.decoder.as_mut().expect("decoder always present");
        let count = decoder.read(&mut buf[..limit])?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for DeflateReadStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.pos as i128 + offset as i128,
            SeekFrom::End(offset) => {
                let size = self.decompressed_size.ok_or_else(seek_out_of_range)?;
                size as i128 + offset as i128
            }
        };

        if target < 0 {
            return Err(seek_out_of_range());
        }
        if let Some(size) = self.decompressed_size {
            if target > size as i128 {
                return Err(seek_out_of_range());
            }
        }

        let target = target as u64;

        if target < self.pos {
            self.restart()?;
        }
        if target > self.pos {
            self.skip_forward(target - self.pos)?;
        }

        Ok(self.pos)
    }
}

/// A shared backing stream protected by a mutex.
///
/// Every access goes through positional `read_at`; [`SharedStreamCursor`]s
/// layer normal `Read + Seek` views on top, locking only for the duration
/// of a single transfer.
pub struct SharedStream<R> {
    inner: Arc<Mutex<R>>,
    size: u64,
}

impl<R> Clone for SharedStream<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            size: self.size,
        }
    }
}

impl<R: Read + Seek + Send> SharedStream<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lock, seek, read, unlock.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        guard.seek(SeekFrom::Start(pos))?;
        guard.read(buf)
    }

    /// Spawns an independent cursor view over the shared stream.
    pub fn cursor(&self) -> SharedStreamCursor<R> {
        SharedStreamCursor {
            stream: self.clone(),
            pos: 0,
        }
    }
}

pub struct SharedStreamCursor<R> {
    stream: SharedStream<R>,
    pos: u64,
}

impl<R: Read + Seek + Send> Read for SharedStreamCursor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.stream.read_at(self.pos, buf)?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek + Send> Seek for SharedStreamCursor<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.pos as i128 + offset as i128,
            SeekFrom::End(offset) => self.stream.size() as i128 + offset as i128,
        };

        if target < 0 {
            return Err(seek_out_of_range());
        }

        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::{DeflateReadStream, RangeReadStream, SharedStream};

    #[test]
    fn range_stream_windows_inner() {
        let inner = Cursor::new((0u8..32).collect::<Vec<u8>>());
        let mut stream = RangeReadStream::new(inner, 8, 4).unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, [8, 9, 10, 11]);
    }

    #[test]
    fn range_stream_seeks_within_window() {
        let inner = Cursor::new((0u8..32).collect::<Vec<u8>>());
        let mut stream = RangeReadStream::new(inner, 8, 8).unwrap();

        stream.seek(SeekFrom::End(-2)).unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [14, 15]);

        stream.seek(SeekFrom::Start(1)).unwrap();
        stream.seek(SeekFrom::Current(2)).unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [11]);

        assert!(stream.seek(SeekFrom::Start(9)).is_err());
        assert!(stream.seek(SeekFrom::Current(-100)).is_err());
    }

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn deflate_stream_round_trip() {
        let plain: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();
        let compressed = compress(&plain);

        let mut stream =
            DeflateReadStream::new(Cursor::new(compressed), Some(plain.len() as u64));

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn deflate_stream_rewinds_and_skips() {
        let plain: Vec<u8> = (0u16..512).flat_map(|v| v.to_le_bytes()).collect();
        let compressed = compress(&plain);

        let mut stream =
            DeflateReadStream::new(Cursor::new(compressed), Some(plain.len() as u64));

        stream.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, plain[100..104]);

        // Rewind restarts decompression from scratch.
        stream.seek(SeekFrom::Start(2)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, plain[2..6]);

        stream.seek(SeekFrom::End(-4)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, plain[plain.len() - 4..]);
    }

    #[test]
    fn deflate_stream_rejects_garbage() {
        let mut stream = DeflateReadStream::new(Cursor::new(vec![0xffu8; 64]), Some(64));
        let mut buf = [0u8; 16];
        assert!(stream.read_exact(&mut buf).is_err());
    }

    #[test]
    fn shared_stream_cursors_are_independent() {
        let stream = SharedStream::new(Cursor::new((0u8..16).collect::<Vec<u8>>())).unwrap();

        let mut a = stream.cursor();
        let mut b = stream.cursor();

        let mut buf = [0u8; 4];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);

        b.seek(SeekFrom::Start(8)).unwrap();
        b.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [8, 9, 10, 11]);

        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [4, 5, 6, 7]);
    }
}
