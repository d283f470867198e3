//! File-backed occupancy cells, one per track segment.
//!
//! Each segment `MA<id>` is a file `<root>/MA<id>.txt` whose first byte is
//! `'0'` (free) or `'1'` (occupied). The files are the source of truth the
//! authority server cross-checks its own beliefs against.

use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};

const FREE: u8 = b'0';
const OCCUPIED: u8 = b'1';

/// Handle to the segment cells under one directory.
///
/// Clones share a lock that serializes every read and write, so
/// [`SegmentStore::try_occupy`] is an atomic test-and-set for all holders of
/// the same store.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl SegmentStore {
    /// Store rooted at `root`. Nothing is created until [`initialize`](Self::initialize).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding the cells.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing file of segment `id`.
    pub fn cell_path(&self, id: u32) -> PathBuf {
        self.root.join(format!("MA{id}.txt"))
    }

    /// Create (or truncate) the cell for `id` and mark it free.
    pub fn initialize(&self, id: u32) -> ControlResult<()> {
        let _held = self.guard.lock();
        let path = self.cell_path(id);
        fs::write(&path, [FREE]).map_err(|source| write_error(id, &path, source))?;
        debug!(segment = id, path = %path.display(), "Segment initialized");
        Ok(())
    }

    /// Whether segment `id` is currently free.
    pub fn is_free(&self, id: u32) -> ControlResult<bool> {
        let _held = self.guard.lock();
        self.read_cell(id)
    }

    /// Mark segment `id` occupied or free. The cell must already exist.
    pub fn set_occupied(&self, id: u32, occupied: bool) -> ControlResult<()> {
        let _held = self.guard.lock();
        self.write_cell(id, occupied)
    }

    /// Occupy segment `id` if and only if it is free, as one step.
    ///
    /// Returns `false` without touching the cell when it is already occupied.
    pub fn try_occupy(&self, id: u32) -> ControlResult<bool> {
        let _held = self.guard.lock();
        if !self.read_cell(id)? {
            return Ok(false);
        }
        self.write_cell(id, true)?;
        Ok(true)
    }

    /// Remove the cell for `id`. A cell that is already gone is not an error.
    pub fn destroy(&self, id: u32) -> ControlResult<()> {
        let _held = self.guard.lock();
        let path = self.cell_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(segment = id, "Segment cell already removed");
                Ok(())
            }
            Err(source) => Err(write_error(id, &path, source)),
        }
    }

    fn read_cell(&self, id: u32) -> ControlResult<bool> {
        let path = self.cell_path(id);
        let mut byte = [0u8; 1];
        let read = fs::File::open(&path)
            .and_then(|mut file| file.read(&mut byte))
            .map_err(|source| ControlError::ResourceRead {
                segment: id,
                path: path.clone(),
                reason: source.to_string(),
                source: Some(source),
            })?;
        match (read, byte[0]) {
            (1, FREE) => Ok(true),
            (1, OCCUPIED) => Ok(false),
            (_, other) => Err(ControlError::ResourceRead {
                segment: id,
                path,
                reason: if read == 0 {
                    "cell is empty".to_string()
                } else {
                    format!("unexpected cell content {:?}", other as char)
                },
                source: None,
            }),
        }
    }

    fn write_cell(&self, id: u32, occupied: bool) -> ControlResult<()> {
        let path = self.cell_path(id);
        let value = if occupied { OCCUPIED } else { FREE };
        OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut file| file.write_all(&[value]))
            .map_err(|source| write_error(id, &path, source))
    }
}

fn write_error(segment: u32, path: &Path, source: io::Error) -> ControlError {
    ControlError::ResourceWrite {
        segment,
        path: path.to_path_buf(),
        source,
    }
}
