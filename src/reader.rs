//! Bounded byte access over parse inputs.
//!
//! Everything downstream of the parser reads through [`ByteRead`]: a
//! positionless `read(offset, length)` that returns a short slice only at end
//! of input and never fails. Inputs are never modified.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

/// Read-only random access over a byte stream.
pub trait ByteRead {
    /// Total input size in bytes.
    fn size(&self) -> u64;

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// The returned slice is shorter than `length` only when the requested
    /// range runs past end of input. Reads never fail.
    fn read(&self, offset: u64, length: usize) -> &[u8];
}

fn clamp(data: &[u8], offset: u64, length: usize) -> &[u8] {
    if offset >= data.len() as u64 {
        return &[];
    }
    let start = offset as usize;
    let end = start.saturating_add(length).min(data.len());
    &data[start..end]
}

/// In-memory reader over a borrowed slice.
#[derive(Debug, Clone, Copy)]
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceReader { data }
    }
}

impl ByteRead for SliceReader<'_> {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, length: usize) -> &[u8] {
        clamp(self.data, offset, length)
    }
}

/// Memory-mapped reader over a file on disk.
///
/// The map is read-only. Zero-length files cannot be mapped and fall back to
/// an empty buffer.
#[derive(Debug)]
pub struct MmapReader {
    map: Option<Mmap>,
    path: PathBuf,
}

impl MmapReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the map is read-only and the file is opened read-only.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(MmapReader { map, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteRead for MmapReader {
    fn size(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }

    fn read(&self, offset: u64, length: usize) -> &[u8] {
        match &self.map {
            Some(m) => clamp(m, offset, length),
            None => &[],
        }
    }
}
