//! A filesystem tile pyramid layout for the `tilestack` crate.
//!
//! Tiles are addressed by `(zoom, row, col)` and stored below a root directory either as
//! - one file per tile: `<root>/<zoom>/<row>/<col>.<ext>` ([`TileLayout::SingleFile`]), or
//! - one directory per tile holding one file per layer: `<root>/<zoom>/<row>/<col>/<index>.<ext>` ([`TileLayout::Directory`]).
//!
//! Files are always written through a temporary file in the target directory followed by a rename, so readers never observe a partially written tile.
//!
//! ## Licence
//! `tilestack_filesystem` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use derive_more::Display;
use itertools::Itertools;
use parking_lot::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

/// The address of a tile in a pyramid.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{zoom}/{row}/{col}")]
pub struct TileAddress {
    /// The zoom level.
    pub zoom: u32,
    /// The row.
    pub row: u64,
    /// The column.
    pub col: u64,
}

impl TileAddress {
    /// Create a new tile address.
    #[must_use]
    pub const fn new(zoom: u32, row: u64, col: u64) -> Self {
        Self { zoom, row, col }
    }
}

impl From<(u32, u64, u64)> for TileAddress {
    fn from((zoom, row, col): (u32, u64, u64)) -> Self {
        Self::new(zoom, row, col)
    }
}

/// How the layers of a tile are laid out on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileLayout {
    /// All layers of a tile in a single file.
    #[default]
    SingleFile,
    /// A directory per tile with one sequentially numbered file per layer.
    Directory,
}

/// Maps tile addresses to filesystem paths and performs the filesystem operations of a tile store.
#[derive(Debug)]
pub struct TilePathResolver {
    root: PathBuf,
    extension: String,
    layout: TileLayout,
    locks: Mutex<HashMap<TileAddress, Arc<Mutex<()>>>>,
}

impl TilePathResolver {
    /// Create a new resolver for tiles below `root` with file extension `extension` (without the leading dot).
    ///
    /// The root directory is not created until the first tile is written.
    ///
    /// # Errors
    /// Returns [`FilesystemError::InvalidBasePath`] if `root` is not valid UTF-8 or points to an existing file.
    pub fn new<P: AsRef<Path>>(
        root: P,
        extension: &str,
        layout: TileLayout,
    ) -> Result<Self, FilesystemError> {
        let root = root.as_ref().to_path_buf();
        if root.to_str().is_none() || root.is_file() {
            return Err(FilesystemError::InvalidBasePath(root));
        }
        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
            layout,
            locks: Mutex::default(),
        })
    }

    /// Return the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the file extension.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Return the layout.
    #[must_use]
    pub const fn layout(&self) -> TileLayout {
        self.layout
    }

    fn row_dir(&self, address: &TileAddress) -> PathBuf {
        let mut path = self.root.clone();
        path.push(address.zoom.to_string());
        path.push(address.row.to_string());
        path
    }

    /// Maps a [`TileAddress`] to the path of its file (single file layout) or directory (directory layout).
    #[must_use]
    pub fn path_for(&self, address: &TileAddress) -> PathBuf {
        let mut path = self.row_dir(address);
        match self.layout {
            TileLayout::SingleFile => path.push(format!("{}.{}", address.col, self.extension)),
            TileLayout::Directory => path.push(address.col.to_string()),
        }
        path
    }

    /// Maps layer `index` of a tile in the directory layout to a file path.
    #[must_use]
    pub fn layer_path(&self, address: &TileAddress, index: usize) -> PathBuf {
        let mut path = self.row_dir(address);
        path.push(address.col.to_string());
        path.push(format!("{index}.{}", self.extension));
        path
    }

    /// Create the directories needed to write the tile at `address`.
    ///
    /// Directories that already exist, including ones created concurrently by another writer, are not an error.
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if a directory cannot be created for any other reason.
    pub fn ensure_directories(&self, address: &TileAddress) -> Result<(), FilesystemError> {
        let dir = match self.layout {
            TileLayout::SingleFile => self.row_dir(address),
            TileLayout::Directory => self.path_for(address),
        };
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns true if the tile file (single file layout) or tile directory (directory layout) exists.
    #[must_use]
    pub fn exists(&self, address: &TileAddress) -> bool {
        let path = self.path_for(address);
        match self.layout {
            TileLayout::SingleFile => path.is_file(),
            TileLayout::Directory => path.is_dir(),
        }
    }

    /// Return the layer indices present in a tile directory in increasing order.
    ///
    /// Files that are not named `<index>.<ext>` are ignored. A missing directory has no layers.
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if the directory exists but cannot be read.
    pub fn layer_indices(&self, address: &TileAddress) -> Result<Vec<usize>, FilesystemError> {
        let dir = match std::fs::read_dir(self.path_for(address)) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let mut indices = Vec::new();
        for entry in dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let index = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(&self.extension))
                .and_then(|stem| stem.strip_suffix('.'))
                .and_then(|stem| stem.parse::<usize>().ok());
            if let Some(index) = index {
                indices.push(index);
            }
        }
        Ok(indices.into_iter().sorted_unstable().collect())
    }

    /// Return the index of the next layer to append to a tile directory.
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if the directory exists but cannot be read.
    pub fn next_layer_index(&self, address: &TileAddress) -> Result<usize, FilesystemError> {
        Ok(self
            .layer_indices(address)?
            .last()
            .map_or(0, |index| index + 1))
    }

    /// Read the file at `path`.
    ///
    /// Returns [`None`] if the file does not exist.
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if the file exists but cannot be read.
    pub fn read(&self, path: &Path) -> Result<Option<Bytes>, FilesystemError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the file at `path` with `value`.
    ///
    /// The parent directory must exist, see [`ensure_directories`](TilePathResolver::ensure_directories).
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if the temporary file cannot be written or renamed.
    pub fn write(&self, path: &Path, value: &[u8]) -> Result<(), FilesystemError> {
        let parent = path
            .parent()
            .ok_or_else(|| FilesystemError::InvalidPath(path.to_path_buf()))?;
        let mut file = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)?;
        file.write_all(value)?;
        file.persist(path).map_err(|err| err.error)?;
        log::trace!("wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    /// Remove the tile at `address`.
    ///
    /// Succeeds if the tile does not exist.
    ///
    /// # Errors
    /// Returns a [`FilesystemError`] if the tile exists but cannot be removed.
    pub fn erase(&self, address: &TileAddress) -> Result<(), FilesystemError> {
        let lock = self.tile_lock(address);
        let _lock = lock.lock();

        let path = self.path_for(address);
        let result = match self.layout {
            TileLayout::SingleFile => std::fs::remove_file(path),
            TileLayout::Directory => std::fs::remove_dir_all(path),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Return the in-process lock guarding read-modify-write cycles of the tile at `address`.
    ///
    /// The lock only serialises writers sharing this resolver. Writers in other processes are not excluded.
    #[must_use]
    pub fn tile_lock(&self, address: &TileAddress) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(*address)
            .or_insert_with(|| Arc::new(Mutex::default()))
            .clone()
    }

    /// List the addresses of stored tiles, optionally restricted to one zoom level, in sorted order.
    #[must_use]
    pub fn list_tiles(&self, zoom: Option<u32>) -> Vec<TileAddress> {
        let (start, depth) = match zoom {
            Some(zoom) => (self.root.join(zoom.to_string()), 2),
            None => (self.root.clone(), 3),
        };
        WalkDir::new(&start)
            .min_depth(depth)
            .max_depth(depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| match self.layout {
                TileLayout::SingleFile => entry.file_type().is_file(),
                TileLayout::Directory => entry.file_type().is_dir(),
            })
            .filter_map(|entry| self.fspath_to_address(entry.path()))
            .sorted()
            .collect()
    }

    /// Maps a tile path below the root back to a [`TileAddress`].
    fn fspath_to_address(&self, path: &Path) -> Option<TileAddress> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let (zoom, row, col) = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .collect_tuple()?;
        let col = match self.layout {
            TileLayout::SingleFile => col.strip_suffix(&self.extension)?.strip_suffix('.')?,
            TileLayout::Directory => col,
        };
        Some(TileAddress::new(
            zoom.parse().ok()?,
            row.parse().ok()?,
            col.parse().ok()?,
        ))
    }
}

/// A filesystem error.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The base path is not valid on this system.
    #[error("base path {0} is not valid")]
    InvalidBasePath(PathBuf),
    /// The path has no parent directory.
    #[error("path {0} has no parent directory")]
    InvalidPath(PathBuf),
}
