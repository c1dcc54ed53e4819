//! Fixed-size chunking over an assembled bag
//!
//! A bag is an ordered list of files under one root directory. Chunks are
//! cut as if every file were concatenated in index order, so a chunk may
//! end inside one file and continue into the next. All chunks but the last
//! are exactly `chunk_size` bytes.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Take};
use std::path::{Path, PathBuf};

/// Default chunk size: 4 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Chunker error type
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("File {path} has {actual} bytes, declared {expected}")]
    ShortFile {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),
}

impl ChunkError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ChunkError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A file inside a bag, as declared by the storage node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagFile {
    pub index: u32,
    pub name: String,
    pub size: u64,
}

/// On-disk layout of an assembled bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagLayout {
    /// Directory the file names are relative to
    pub root: PathBuf,
    /// Files in index order
    pub files: Vec<BagFile>,
}

impl BagLayout {
    /// Create a layout, ordering files by their declared index
    pub fn new(root: impl Into<PathBuf>, mut files: Vec<BagFile>) -> Self {
        files.sort_by_key(|f| f.index);
        Self {
            root: root.into(),
            files,
        }
    }

    /// Layout for one local file, sized from its metadata
    pub fn single_file(path: &Path) -> Result<Self, ChunkError> {
        let meta = std::fs::metadata(path).map_err(|e| ChunkError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ChunkError::io(path, std::io::Error::new(ErrorKind::InvalidInput, "not a file path"))
            })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self::new(
            root,
            vec![BagFile {
                index: 0,
                name,
                size: meta.len(),
            }],
        ))
    }

    /// Layout for every regular file directly inside `dir`, ordered by name
    pub fn from_dir(dir: &Path) -> Result<Self, ChunkError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| ChunkError::io(dir, e))? {
            let entry = entry.map_err(|e| ChunkError::io(dir, e))?;
            let meta = entry.metadata().map_err(|e| ChunkError::io(&entry.path(), e))?;
            if meta.is_file() {
                entries.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }
        entries.sort();

        let files = entries
            .into_iter()
            .enumerate()
            .map(|(i, (name, size))| BagFile {
                index: i as u32,
                name,
                size,
            })
            .collect();
        Ok(Self::new(dir, files))
    }

    /// Sum of declared file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Number of chunks the layout splits into
    pub fn chunk_count(&self, chunk_size: usize) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        self.total_size().div_ceil(chunk_size as u64)
    }

    /// Absolute path of a declared file
    pub fn file_path(&self, file: &BagFile) -> PathBuf {
        self.root.join(&file.name)
    }
}

/// Open file currently being drained
struct OpenFile {
    path: PathBuf,
    declared: u64,
    reader: Take<BufReader<File>>,
}

/// Lazy, ordered chunk sequence over a bag layout
///
/// Reads exactly the declared size of every file, even if the file on disk
/// is longer. Iteration stops after the first error.
pub struct ChunkReader {
    chunk_size: usize,
    files: Vec<(PathBuf, u64)>,
    next_file: usize,
    current: Option<OpenFile>,
    remaining: u64,
    total_size: u64,
    failed: bool,
}

impl ChunkReader {
    /// Validate the layout against the filesystem and prepare to read
    pub fn open(layout: &BagLayout, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize(chunk_size));
        }

        let mut files = Vec::with_capacity(layout.files.len());
        for file in &layout.files {
            let path = layout.file_path(file);
            let meta = std::fs::metadata(&path).map_err(|e| ChunkError::io(&path, e))?;
            if meta.len() < file.size {
                return Err(ChunkError::ShortFile {
                    path,
                    expected: file.size,
                    actual: meta.len(),
                });
            }
            files.push((path, file.size));
        }

        let total_size = layout.total_size();
        Ok(Self {
            chunk_size,
            files,
            next_file: 0,
            current: None,
            remaining: total_size,
            total_size,
            failed: false,
        })
    }

    /// Total bytes the reader will yield
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks the reader will yield
    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size as u64)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn open_next(&mut self) -> Result<bool, ChunkError> {
        while self.next_file < self.files.len() {
            let (path, declared) = self.files[self.next_file].clone();
            self.next_file += 1;
            if declared == 0 {
                continue;
            }
            let file = File::open(&path).map_err(|e| ChunkError::io(&path, e))?;
            self.current = Some(OpenFile {
                path,
                declared,
                reader: BufReader::new(file).take(declared),
            });
            return Ok(true);
        }
        Ok(false)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, ChunkError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.current.is_none() && !self.open_next()? {
                break;
            }
            let Some(open) = self.current.as_mut() else {
                break;
            };
            match open.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    let missing = open.reader.limit();
                    if missing > 0 {
                        // File shrank after open() checked it
                        return Err(ChunkError::ShortFile {
                            path: open.path.clone(),
                            expected: open.declared,
                            actual: open.declared - missing,
                        });
                    }
                    self.current = None;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChunkError::io(&open.path, e)),
            }
        }
        Ok(filled)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Vec<u8>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        match self.fill(&mut buf) {
            Ok(n) if n == want => {
                self.remaining -= n as u64;
                Some(Ok(buf))
            }
            Ok(n) => {
                // Declared sizes promised more than the files delivered
                self.failed = true;
                let path = self
                    .files
                    .last()
                    .map(|(p, _)| p.clone())
                    .unwrap_or_default();
                Some(Err(ChunkError::ShortFile {
                    path,
                    expected: self.total_size,
                    actual: self.total_size - self.remaining + n as u64,
                }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Split in-memory data with the same boundary rule as `ChunkReader`
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Result<Vec<&[u8]>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize(chunk_size));
    }
    Ok(data.chunks(chunk_size).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, data: &[u8]) {
        std::fs::write(dir.join(name), data).unwrap();
    }

    fn read_all(reader: ChunkReader) -> Vec<Vec<u8>> {
        reader.map(|c| c.unwrap()).collect()
    }

    #[test]
    fn test_chunk_bytes_lengths() {
        for len in [1usize, 3, 4, 5, 10, 64, 1000] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let chunks = chunk_bytes(&data, 4).unwrap();
            let (last, rest) = chunks.split_last().unwrap();
            assert!(rest.iter().all(|c| c.len() == 4));
            assert!(!last.is_empty() && last.len() <= 4);
            assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), len);
        }
    }

    #[test]
    fn test_chunk_bytes_zero_size() {
        assert!(matches!(chunk_bytes(b"abc", 0), Err(ChunkError::InvalidChunkSize(0))));
    }

    #[test]
    fn test_single_file_ten_bytes() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.bin", b"0123456789");

        let layout = BagLayout::single_file(&temp.path().join("a.bin")).unwrap();
        assert_eq!(layout.total_size(), 10);
        assert_eq!(layout.chunk_count(4), 3);

        let chunks = read_all(ChunkReader::open(&layout, 4).unwrap());
        assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    }

    #[test]
    fn test_chunks_span_file_boundaries() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "first", b"abcde");
        write(temp.path(), "second", b"fgh");
        write(temp.path(), "third", b"ijklmn");

        // Declared out of order; index decides concatenation order
        let layout = BagLayout::new(
            temp.path(),
            vec![
                BagFile { index: 2, name: "third".into(), size: 6 },
                BagFile { index: 0, name: "first".into(), size: 5 },
                BagFile { index: 1, name: "second".into(), size: 3 },
            ],
        );

        let chunks = read_all(ChunkReader::open(&layout, 4).unwrap());
        assert_eq!(
            chunks,
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ijkl".to_vec(), b"mn".to_vec()]
        );
    }

    #[test]
    fn test_reads_only_declared_size() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "f", b"0123456789");
        let layout = BagLayout::new(
            temp.path(),
            vec![BagFile { index: 0, name: "f".into(), size: 6 }],
        );

        let chunks = read_all(ChunkReader::open(&layout, 4).unwrap());
        assert_eq!(chunks, vec![b"0123".to_vec(), b"45".to_vec()]);
    }

    #[test]
    fn test_empty_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "empty", b"");
        write(temp.path(), "data", b"xyz");
        let layout = BagLayout::new(
            temp.path(),
            vec![
                BagFile { index: 0, name: "empty".into(), size: 0 },
                BagFile { index: 1, name: "data".into(), size: 3 },
            ],
        );

        let chunks = read_all(ChunkReader::open(&layout, 2).unwrap());
        assert_eq!(chunks, vec![b"xy".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let layout = BagLayout::new(
            temp.path(),
            vec![BagFile { index: 0, name: "nope".into(), size: 1 }],
        );
        assert!(matches!(ChunkReader::open(&layout, 4), Err(ChunkError::Io { .. })));
    }

    #[test]
    fn test_short_file_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "short", b"abc");
        let layout = BagLayout::new(
            temp.path(),
            vec![BagFile { index: 0, name: "short".into(), size: 10 }],
        );
        match ChunkReader::open(&layout, 4) {
            Err(ChunkError::ShortFile { expected, actual, .. }) => {
                assert_eq!(expected, 10);
                assert_eq!(actual, 3);
            }
            other => panic!("expected ShortFile, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_from_dir_orders_by_name() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "b", b"22");
        write(temp.path(), "a", b"1");
        std::fs::create_dir(temp.path().join("sub")).unwrap();

        let layout = BagLayout::from_dir(temp.path()).unwrap();
        let names: Vec<_> = layout.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(layout.total_size(), 3);
    }

    #[test]
    fn test_reader_counts() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "f", &[7u8; 9000]);
        let layout = BagLayout::single_file(&temp.path().join("f")).unwrap();
        let reader = ChunkReader::open(&layout, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(reader.total_size(), 9000);
        assert_eq!(reader.chunk_count(), 3);
        assert_eq!(read_all(reader).len(), 3);
    }
}
