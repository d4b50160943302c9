//! Resource locations - where a channel pulls raw bytes from
//!
//! A location is registered alongside a resource when it is linked and is
//! only ever read from channel threads.

use crate::error::{LoadError, LoadResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of a resource's raw bytes
pub trait ResourceLocation: Send + Sync {
    /// Number of bytes `fetch_data` writes. Must not change while linked.
    fn data_size(&self) -> usize;

    /// Fill `buffer` (exactly `data_size()` bytes long) with the resource's bytes.
    ///
    /// May block. Called from a channel thread.
    fn fetch_data(&self, buffer: &mut [u8]) -> LoadResult<()>;
}

/// Location backed by bytes already in memory
#[derive(Clone, Debug)]
pub struct MemoryLocation {
    data: Arc<[u8]>,
}

impl MemoryLocation {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ResourceLocation for MemoryLocation {
    fn data_size(&self) -> usize {
        self.data.len()
    }

    fn fetch_data(&self, buffer: &mut [u8]) -> LoadResult<()> {
        if buffer.len() != self.data.len() {
            return Err(LoadError::SizeMismatch {
                expected: buffer.len(),
                actual: self.data.len(),
            });
        }
        buffer.copy_from_slice(&self.data);
        Ok(())
    }
}

/// Location backed by a byte range of a file, such as an entry in an archive image
#[derive(Clone, Debug)]
pub struct FileLocation {
    path: PathBuf,
    offset: u64,
    size: usize,
}

impl FileLocation {
    /// Range `[offset, offset + size)` of the file at `path`
    pub fn new(path: impl Into<PathBuf>, offset: u64, size: usize) -> Self {
        Self {
            path: path.into(),
            offset,
            size,
        }
    }

    /// Whole file, sized from its current metadata
    pub fn whole_file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = addressable_size(&path, std::fs::metadata(&path)?.len())?;
        Ok(Self::new(path, 0, size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// File length as a `usize`, failing where it does not fit (32-bit targets)
fn addressable_size(path: &Path, len: u64) -> std::io::Result<usize> {
    usize::try_from(len).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} is too large to address ({} bytes)", path.display(), len),
        )
    })
}

impl ResourceLocation for FileLocation {
    fn data_size(&self) -> usize {
        self.size
    }

    fn fetch_data(&self, buffer: &mut [u8]) -> LoadResult<()> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;

        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..])? {
                0 => {
                    return Err(LoadError::SizeMismatch {
                        expected: buffer.len(),
                        actual: filled,
                    })
                }
                n => filled += n,
            }
        }
        Ok(())
    }
}
