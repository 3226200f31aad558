//! The build-time virtual file system.
//!
//! Three logical locations resolve to concrete search strategies; the
//! source location transparently overlays mounted archive files. The
//! engine never assumes local-disk semantics beyond these operations.

use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use hashbrown::HashMap;
use parking_lot::Mutex;

use forge_afs::Archive;
use forge_common::stream::SeekRead;
use forge_common::{BuildPath, Error, Result};

/// Logical file location; part of every node's identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildFileLocation {
    SourceDir,
    IntermediateDir,
    OutputDir,
}

impl BuildFileLocation {
    pub fn to_raw(self) -> u8 {
        match self {
            BuildFileLocation::SourceDir => 0,
            BuildFileLocation::IntermediateDir => 1,
            BuildFileLocation::OutputDir => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BuildFileLocation::SourceDir),
            1 => Some(BuildFileLocation::IntermediateDir),
            2 => Some(BuildFileLocation::OutputDir),
            _ => None,
        }
    }
}

/// Snapshot of a file's existence and change-detection fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub location: BuildFileLocation,
    pub path: BuildPath,
    pub size: u64,
    pub mtime: u64,
    pub is_directory: bool,
}

impl FileStatus {
    /// Whether `current` still matches this recorded fingerprint.
    pub fn fingerprint_matches(&self, current: &FileStatus) -> bool {
        self.size == current.size
            && self.mtime == current.mtime
            && self.is_directory == current.is_directory
    }
}

/// An output stream that only becomes visible on `commit`.
///
/// Dropping the stream without committing discards the write, so a failed
/// compile never leaves a partial output behind.
pub trait OutputStream: Write + Seek + Send {
    fn commit(self: Box<Self>) -> Result<()>;
}

/// The file operations the build engine is allowed to perform.
pub trait BuildFileSystem: Send {
    fn resolve_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>>;

    fn open_read(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>>;

    fn open_write(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>>;

    fn enumerate(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        list_files: bool,
        list_directories: bool,
    ) -> Result<Vec<FileStatus>>;
}

fn system_mtime(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

struct MountedArchive {
    name: String,
    archive: Archive,
    size: u64,
    mtime: u64,
}

/// Disk-backed file system with archive overlay mounting.
pub struct DiskFileSystem {
    source_dir: PathBuf,
    intermediate_dir: PathBuf,
    output_dir: PathBuf,
    archives: Vec<MountedArchive>,
}

impl DiskFileSystem {
    /// Opens the three roots and mounts every `*.dat` archive found in the
    /// source root under its lowercased file stem.
    pub fn new(
        source_dir: impl Into<PathBuf>,
        intermediate_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source_dir = source_dir.into();
        let mut archives = Vec::new();

        if let Ok(entries) = fs::read_dir(&source_dir) {
            for entry in entries {
                let entry = entry?;
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    continue;
                };

                if name.len() < 5 || !name.to_ascii_lowercase().ends_with(".dat") {
                    continue;
                }

                let metadata = entry.metadata()?;
                if metadata.is_dir() {
                    continue;
                }

                let file = fs::File::open(entry.path())
                    .map_err(|_| Error::FileOpen(name.to_owned()))?;

                let archive_name = name[..name.len() - 4].to_ascii_lowercase();
                tracing::info!("mounting archive '{}'", archive_name);

                archives.push(MountedArchive {
                    name: archive_name,
                    archive: Archive::open(Box::new(file))?,
                    size: metadata.len(),
                    mtime: system_mtime(&metadata),
                });
            }
        }

        Ok(Self {
            source_dir,
            intermediate_dir: intermediate_dir.into(),
            output_dir: output_dir.into(),
            archives,
        })
    }

    fn root(&self, location: BuildFileLocation) -> &Path {
        match location {
            BuildFileLocation::SourceDir => &self.source_dir,
            BuildFileLocation::IntermediateDir => &self.intermediate_dir,
            BuildFileLocation::OutputDir => &self.output_dir,
        }
    }

    fn disk_path(&self, location: BuildFileLocation, path: &BuildPath) -> PathBuf {
        let mut full = self.root(location).to_path_buf();
        for component in path.components() {
            full.push(component);
        }
        full
    }

    /// Any path `A/rest` where `A` matches a mounted archive name resolves
    /// into that archive.
    fn find_in_archive(&self, path: &BuildPath) -> Option<(&MountedArchive, forge_afs::FileHandle<'_>)> {
        let (archive_name, rest) = path.split_first()?;

        let mounted = self.archives.iter().find(|mounted| mounted.name == archive_name)?;
        let handle = mounted.archive.find_file(rest)?;
        Some((mounted, handle))
    }

    fn archive_directory(&self, path: &BuildPath) -> Option<&MountedArchive> {
        match path.split_first() {
            None => self
                .archives
                .iter()
                .find(|mounted| mounted.name == path.as_str()),
            Some((archive_name, rest)) => {
                let mounted = self.archives.iter().find(|mounted| mounted.name == archive_name)?;
                mounted.archive.has_directory(rest).then_some(mounted)
            }
        }
    }

    fn disk_status(
        &self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<FileStatus>> {
        match fs::metadata(self.disk_path(location, path)) {
            Ok(metadata) => Ok(Some(FileStatus {
                location,
                path: path.clone(),
                size: metadata.len(),
                mtime: system_mtime(&metadata),
                is_directory: metadata.is_dir(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

impl BuildFileSystem for DiskFileSystem {
    fn resolve_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>> {
        if location == BuildFileLocation::SourceDir {
            if let Some((mounted, handle)) = self.find_in_archive(path) {
                return Ok(Some(FileStatus {
                    location,
                    path: path.clone(),
                    size: handle.size() as u64,
                    mtime: mounted.mtime,
                    is_directory: false,
                }));
            }

            if allow_directories {
                if let Some(mounted) = self.archive_directory(path) {
                    return Ok(Some(FileStatus {
                        location,
                        path: path.clone(),
                        size: mounted.size,
                        mtime: mounted.mtime,
                        is_directory: true,
                    }));
                }
            }
        }

        let status = self.disk_status(location, path)?;

        Ok(status.filter(|status| !status.is_directory || allow_directories))
    }

    fn open_read(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>> {
        if location == BuildFileLocation::SourceDir {
            if let Some((_, handle)) = self.find_in_archive(path) {
                return Ok(Some(handle.open()?));
            }
        }

        match fs::File::open(self.disk_path(location, path)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn open_write(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>> {
        if location == BuildFileLocation::SourceDir {
            return Err(Error::InvalidParameter("source location is read-only"));
        }

        let final_path = self.disk_path(location, path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp_path = final_path.clone();
        let mut temp_name = final_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        temp_name.push(".tmp");
        temp_path.set_file_name(temp_name);

        let file = fs::File::create(&temp_path)?;

        Ok(Box::new(DiskOutputStream {
            file: Some(file),
            temp_path,
            final_path,
        }))
    }

    fn enumerate(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        list_files: bool,
        list_directories: bool,
    ) -> Result<Vec<FileStatus>> {
        let mut out = Vec::new();

        if !list_files && !list_directories {
            return Ok(out);
        }

        if location == BuildFileLocation::SourceDir {
            if let Some(mounted) = self
                .archives
                .iter()
                .find(|mounted| mounted.name == path.as_str() || path.as_str().starts_with(&format!("{}/", mounted.name)))
            {
                let prefix = if path.as_str() == mounted.name {
                    String::new()
                } else {
                    format!("{}/", &path.as_str()[mounted.name.len() + 1..])
                };

                if list_files {
                    for handle in mounted.archive.files() {
                        let entry = handle.path();
                        let Some(rest) = entry.strip_prefix(&prefix) else {
                            continue;
                        };
                        if rest.is_empty() || rest.contains('/') {
                            continue;
                        }

                        out.push(FileStatus {
                            location,
                            path: BuildPath::new(&format!("{}/{}", path, rest))?,
                            size: handle.size() as u64,
                            mtime: mounted.mtime,
                            is_directory: false,
                        });
                    }
                }

                if list_directories {
                    for dir in mounted.archive.directories() {
                        let Some(rest) = dir.strip_prefix(&prefix) else {
                            continue;
                        };
                        if rest.is_empty() || rest.contains('/') {
                            continue;
                        }

                        out.push(FileStatus {
                            location,
                            path: BuildPath::new(&format!("{}/{}", path, rest))?,
                            size: 0,
                            mtime: mounted.mtime,
                            is_directory: true,
                        });
                    }
                }

                return Ok(out);
            }
        }

        let dir_path = self.disk_path(location, path);
        let entries = match fs::read_dir(dir_path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(Error::Io(err)),
        };

        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;

            if metadata.is_dir() && !list_directories {
                continue;
            }
            if !metadata.is_dir() && !list_files {
                continue;
            }

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Ok(entry_path) = path.join_str(name) else {
                continue;
            };

            out.push(FileStatus {
                location,
                path: entry_path,
                size: metadata.len(),
                mtime: system_mtime(&metadata),
                is_directory: metadata.is_dir(),
            });
        }

        Ok(out)
    }
}

struct DiskOutputStream {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl Write for DiskOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.as_mut().expect("stream open").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_mut().expect("stream open").flush()
    }
}

impl Seek for DiskOutputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.as_mut().expect("stream open").seek(pos)
    }
}

impl OutputStream for DiskOutputStream {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let file = self.file.take().expect("stream open");
        file.sync_all().map_err(Error::IoWrite)?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path).map_err(Error::IoWrite)?;
        Ok(())
    }
}

impl Drop for DiskOutputStream {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            fs::remove_file(&self.temp_path).ok();
        }
    }
}

#[derive(Clone, Debug)]
struct MemoryFile {
    data: Arc<Vec<u8>>,
    mtime: u64,
}

#[derive(Debug, Default)]
struct MemoryFsInner {
    files: HashMap<(BuildFileLocation, BuildPath), MemoryFile>,
    clock: u64,
}

/// In-memory file system for hermetic builds and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileSystem {
    inner: Arc<Mutex<MemoryFsInner>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: BuildFileLocation, path: &str, data: impl Into<Vec<u8>>) {
        let path = BuildPath::new(path).expect("valid test path");
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let mtime = inner.clock;
        inner.files.insert(
            (location, path),
            MemoryFile {
                data: Arc::new(data.into()),
                mtime,
            },
        );
    }

    /// Bumps the mtime without changing contents.
    pub fn touch(&self, location: BuildFileLocation, path: &str) {
        let path = BuildPath::new(path).expect("valid test path");
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let mtime = inner.clock;
        if let Some(file) = inner.files.get_mut(&(location, path)) {
            file.mtime = mtime;
        }
    }

    pub fn remove(&self, location: BuildFileLocation, path: &str) {
        let path = BuildPath::new(path).expect("valid test path");
        self.inner.lock().files.remove(&(location, path));
    }

    pub fn get(&self, location: BuildFileLocation, path: &str) -> Option<Vec<u8>> {
        let path = BuildPath::new(path).ok()?;
        self.inner
            .lock()
            .files
            .get(&(location, path))
            .map(|file| file.data.as_ref().clone())
    }

    pub fn contains(&self, location: BuildFileLocation, path: &str) -> bool {
        self.get(location, path).is_some()
    }

    pub fn paths(&self, location: BuildFileLocation) -> Vec<BuildPath> {
        self.inner
            .lock()
            .files
            .keys()
            .filter(|(loc, _)| *loc == location)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

impl BuildFileSystem for MemoryFileSystem {
    fn resolve_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>> {
        let inner = self.inner.lock();

        if let Some(file) = inner.files.get(&(location, path.clone())) {
            return Ok(Some(FileStatus {
                location,
                path: path.clone(),
                size: file.data.len() as u64,
                mtime: file.mtime,
                is_directory: false,
            }));
        }

        if allow_directories {
            let prefix = format!("{path}/");
            let is_directory = inner
                .files
                .keys()
                .any(|(loc, entry)| *loc == location && entry.as_str().starts_with(&prefix));

            if is_directory {
                return Ok(Some(FileStatus {
                    location,
                    path: path.clone(),
                    size: 0,
                    mtime: 0,
                    is_directory: true,
                }));
            }
        }

        Ok(None)
    }

    fn open_read(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>> {
        let inner = self.inner.lock();

        match inner.files.get(&(location, path.clone())) {
            Some(file) => Ok(Some(Box::new(io::Cursor::new(file.data.as_ref().clone())))),
            None => Ok(None),
        }
    }

    fn open_write(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>> {
        if location == BuildFileLocation::SourceDir {
            return Err(Error::InvalidParameter("source location is read-only"));
        }

        Ok(Box::new(MemoryOutputStream {
            fs: self.clone(),
            location,
            path: path.clone(),
            buffer: io::Cursor::new(Vec::new()),
        }))
    }

    fn enumerate(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        list_files: bool,
        list_directories: bool,
    ) -> Result<Vec<FileStatus>> {
        let inner = self.inner.lock();
        let prefix = format!("{path}/");

        let mut out = Vec::new();
        let mut seen_dirs = Vec::new();

        for ((loc, entry), file) in &inner.files {
            if *loc != location {
                continue;
            }

            let Some(rest) = entry.as_str().strip_prefix(&prefix) else {
                continue;
            };

            match rest.split_once('/') {
                None => {
                    if list_files {
                        out.push(FileStatus {
                            location,
                            path: entry.clone(),
                            size: file.data.len() as u64,
                            mtime: file.mtime,
                            is_directory: false,
                        });
                    }
                }
                Some((dir, _)) => {
                    if list_directories && !seen_dirs.iter().any(|seen| seen == dir) {
                        seen_dirs.push(dir.to_owned());
                        out.push(FileStatus {
                            location,
                            path: path.join_str(dir)?,
                            size: 0,
                            mtime: 0,
                            is_directory: true,
                        });
                    }
                }
            }
        }

        Ok(out)
    }
}

struct MemoryOutputStream {
    fs: MemoryFileSystem,
    location: BuildFileLocation,
    path: BuildPath,
    buffer: io::Cursor<Vec<u8>>,
}

impl Write for MemoryOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl OutputStream for MemoryOutputStream {
    fn commit(self: Box<Self>) -> Result<()> {
        self.fs
            .insert(self.location, self.path.as_str(), self.buffer.into_inner());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use forge_common::BuildPath;

    use super::{BuildFileLocation, BuildFileSystem, MemoryFileSystem};

    #[test]
    fn memory_fs_status_and_read() {
        let mut fs = MemoryFileSystem::new();
        fs.insert(BuildFileLocation::SourceDir, "maps/town.rpl", b"x".to_vec());

        let path = BuildPath::new("maps/town.rpl").unwrap();
        let status = fs
            .resolve_status(BuildFileLocation::SourceDir, &path, false)
            .unwrap()
            .unwrap();
        assert_eq!(status.size, 1);
        assert!(!status.is_directory);

        let dir = BuildPath::new("maps").unwrap();
        assert!(fs
            .resolve_status(BuildFileLocation::SourceDir, &dir, false)
            .unwrap()
            .is_none());
        let status = fs
            .resolve_status(BuildFileLocation::SourceDir, &dir, true)
            .unwrap()
            .unwrap();
        assert!(status.is_directory);

        let mut contents = Vec::new();
        fs.open_read(BuildFileLocation::SourceDir, &path)
            .unwrap()
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"x");
    }

    #[test]
    fn memory_fs_writes_are_invisible_until_commit() {
        let mut fs = MemoryFileSystem::new();
        let path = BuildPath::new("out/pkg.rkp").unwrap();

        let mut stream = fs
            .open_write(BuildFileLocation::IntermediateDir, &path)
            .unwrap();
        stream.write_all(b"partial").unwrap();
        assert!(!fs.contains(BuildFileLocation::IntermediateDir, "out/pkg.rkp"));

        stream.commit().unwrap();
        assert_eq!(
            fs.get(BuildFileLocation::IntermediateDir, "out/pkg.rkp").unwrap(),
            b"partial"
        );

        // Dropping without commit discards the write.
        let mut stream = fs
            .open_write(BuildFileLocation::IntermediateDir, &path)
            .unwrap();
        stream.write_all(b"discarded").unwrap();
        drop(stream);
        assert_eq!(
            fs.get(BuildFileLocation::IntermediateDir, "out/pkg.rkp").unwrap(),
            b"partial"
        );
    }

    #[test]
    fn memory_fs_enumerates_files_and_directories() {
        let mut fs = MemoryFileSystem::new();
        fs.insert(BuildFileLocation::IntermediateDir, "cache/a.node", b"a".to_vec());
        fs.insert(BuildFileLocation::IntermediateDir, "cache/b.node", b"b".to_vec());
        fs.insert(BuildFileLocation::IntermediateDir, "cache/sub/c.node", b"c".to_vec());

        let dir = BuildPath::new("cache").unwrap();
        let mut files = fs
            .enumerate(BuildFileLocation::IntermediateDir, &dir, true, false)
            .unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path.as_str(), "cache/a.node");
        assert_eq!(files[1].path.as_str(), "cache/b.node");

        let dirs = fs
            .enumerate(BuildFileLocation::IntermediateDir, &dir, false, true)
            .unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path.as_str(), "cache/sub");
        assert!(dirs[0].is_directory);
    }
}
