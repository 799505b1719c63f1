//! Append-only trajectory store.
//!
//! A `Universe` is one file: header, slice bodies back to back, then the
//! offset index. The index is kept in memory for O(1) slice lookup and is
//! rewritten in full after every append, directly behind the new slice body.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::simulation::states::{Particle, Slice};
use crate::storage::format::{
    self, Header, SlicePrefix, HEADER_SIZE, INDEX_ENTRY_SIZE, PARTICLE_SIZE, SLICE_PREFIX_SIZE,
};

#[derive(Debug)]
pub struct Universe {
    path: PathBuf,
    file: Option<File>, // None once closed
    index: Vec<i64>,    // byte offset of every slice body
}

impl Universe {
    /// Create a new, empty trajectory. Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&Header::new(0).encode())?;
        file.flush()?;
        debug!("created universe {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            index: Vec::new(),
        })
    }

    /// Open an existing trajectory for reading and appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    /// Open an existing trajectory without write access
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(writable).open(path)?;

        let mut raw = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut raw).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                Error::Format(format!("{} is too short for a header", path.display()))
            }
            _ => Error::Io(e),
        })?;
        let header = Header::decode(&raw)?;

        let index_len = header
            .slice_count
            .checked_mul(INDEX_ENTRY_SIZE)
            .ok_or_else(|| Error::Format("slice count overflows the index".into()))?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE + index_len {
            return Err(Error::Format(format!(
                "{} holds {} bytes, too few for {} slices",
                path.display(),
                file_len,
                header.slice_count
            )));
        }

        let mut raw_index = Vec::new();
        raw_index
            .try_reserve_exact(index_len as usize)
            .map_err(|e| Error::Allocation(format!("index of {} slices: {e}", header.slice_count)))?;
        raw_index.resize(index_len as usize, 0);
        file.seek(SeekFrom::End(-(index_len as i64)))?;
        file.read_exact(&mut raw_index)?;

        debug!(
            "opened universe {} with {} slices",
            path.display(),
            header.slice_count
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            index: format::decode_index(&raw_index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Number of committed slices
    pub fn len(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::Closed)
    }

    /// Read slice `n` back from disk
    pub fn get_slice(&mut self, n: u64) -> Result<Slice> {
        let count = self.len();
        if n >= count {
            return Err(Error::SliceOutOfRange { index: n, count });
        }
        let offset = self.index[n as usize];
        if offset < 0 {
            return Err(Error::Format(format!("slice {n} has negative offset {offset}")));
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut raw = [0u8; SLICE_PREFIX_SIZE as usize];
        file.read_exact(&mut raw)?;
        let prefix = SlicePrefix::decode(&raw);

        let body_len = prefix
            .nbody
            .checked_mul(PARTICLE_SIZE)
            .ok_or_else(|| Error::Format(format!("slice {n} body count overflows")))?;
        let mut raw_bodies = Vec::new();
        raw_bodies
            .try_reserve_exact(body_len as usize)
            .map_err(|e| Error::Allocation(format!("slice {n} with {} bodies: {e}", prefix.nbody)))?;
        raw_bodies.resize(body_len as usize, 0);
        file.read_exact(&mut raw_bodies)?;

        let mut bodies: Vec<Particle> = Vec::new();
        bodies
            .try_reserve_exact(prefix.nbody as usize)
            .map_err(|e| Error::Allocation(format!("slice {n} with {} bodies: {e}", prefix.nbody)))?;
        format::decode_particles(&raw_bodies, &mut bodies);

        Ok(Slice::new(prefix.time, prefix.bound_min, prefix.bound_max, bodies))
    }

    pub fn get_first_slice(&mut self) -> Result<Slice> {
        self.get_slice(0)
    }

    pub fn get_last_slice(&mut self) -> Result<Slice> {
        match self.len() {
            0 => Err(Error::SliceOutOfRange { index: 0, count: 0 }),
            n => self.get_slice(n - 1),
        }
    }

    /// Commit `s` as the next slice.
    ///
    /// Rewrites the header, writes the body where the old index began and
    /// writes the whole grown index after it.
    pub fn append_slice(&mut self, s: &Slice) -> Result<()> {
        let new_count = self.len() + 1;
        let old_index_len = self.len() * INDEX_ENTRY_SIZE;
        let body = format::encode_slice(s);

        let file = self.file.as_mut().ok_or(Error::Closed)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&Header::new(new_count).encode())?;

        let end = file.seek(SeekFrom::End(0))?;
        let offset = end
            .checked_sub(old_index_len)
            .filter(|&o| o >= HEADER_SIZE)
            .ok_or_else(|| Error::Format("index extends past the header".into()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&body)?;

        self.index.push(offset as i64);
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        file.write_all(&format::encode_index(&self.index))?;
        file.flush()?;
        Ok(())
    }

    /// Flush and release the file handle; later reads and appends fail
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for Universe {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing {} failed: {e}", self.path.display());
        }
    }
}
