//! Read access to stored output tiles.

use std::path::PathBuf;

use ndarray::ArrayD;
use tilestack_codec::Element;
use tilestack_filesystem::{TileAddress, TileLayout};

use crate::{MaskedArray, OutputStore, StoreError, Tile, ValidationError};

/// The decoded content of a tile.
#[derive(Debug)]
enum Cache<T> {
    /// Nothing is stored for the tile.
    NoData(MaskedArray<T>),
    /// The stored array and its masked view.
    Data {
        raw: ArrayD<T>,
        masked: MaskedArray<T>,
    },
}

/// Read access to a stored output tile, created by [`OutputStore::open`].
///
/// The tile is read and decoded on the first [`read`](InputTile::read) and cached.
/// The cache is released by [`clear_cache`](InputTile::clear_cache) and when the reader is dropped.
#[derive(Debug)]
pub struct InputTile<'a, T, G> {
    store: &'a OutputStore<G>,
    tile: Tile,
    nodata: T,
    cache: Option<Cache<T>>,
}

impl<'a, T: Element, G> InputTile<'a, T, G> {
    pub(crate) fn new(store: &'a OutputStore<G>, tile: Tile) -> Result<Self, ValidationError> {
        let nodata = store.config().nodata_value::<T>()?;
        Ok(Self {
            store,
            tile,
            nodata,
            cache: None,
        })
    }

    /// Return the tile.
    #[must_use]
    pub const fn tile(&self) -> &Tile {
        &self.tile
    }

    /// Return the tile address.
    #[must_use]
    pub const fn address(&self) -> TileAddress {
        self.tile.address()
    }

    /// Return the path of the tile file or directory.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.store.path(&self.tile.address())
    }

    /// Returns true if the tile has been read and not released since.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Read the tile as a stack of layers, with elements equal to the nodata value marked invalid.
    ///
    /// A tile that is not stored reads as a single layer holding the [`empty`](OutputStore::empty) array.
    /// In directory mode the layer files are stacked in index order and layers that are missing or cannot be decoded are skipped with a warning.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if a single file tile cannot be decoded or there is an underlying filesystem error.
    pub fn read(&mut self) -> Result<&MaskedArray<T>, StoreError> {
        match self.cached()? {
            Cache::NoData(empty) => Ok(empty),
            Cache::Data { masked, .. } => Ok(masked),
        }
    }

    /// Read the stored array without a mask.
    ///
    /// Returns [`None`] if the tile is not stored.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if a single file tile cannot be decoded or there is an underlying filesystem error.
    pub fn read_raw(&mut self) -> Result<Option<&ArrayD<T>>, StoreError> {
        match self.cached()? {
            Cache::NoData(_) => Ok(None),
            Cache::Data { raw, .. } => Ok(Some(raw)),
        }
    }

    /// Returns true if the tile is not stored or holds no valid element.
    ///
    /// A tile that cannot be read is empty. The error is logged.
    pub fn is_empty(&mut self) -> bool {
        if !self.store.resolver().exists(&self.tile.address()) && self.cache.is_none() {
            return true;
        }
        match self.read() {
            Ok(array) => array.is_fully_masked(),
            Err(err) => {
                log::warn!("treating tile {} as empty: {err}", self.tile.address());
                true
            }
        }
    }

    /// Release the cached tile.
    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn cached(&mut self) -> Result<&Cache<T>, StoreError> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => self.load()?,
        };
        Ok(self.cache.insert(cache))
    }

    fn load(&self) -> Result<Cache<T>, StoreError> {
        let address = self.tile.address();
        let stored = match self.store.resolver().layout() {
            TileLayout::SingleFile => self.store.read_stack(address, self.nodata)?,
            TileLayout::Directory => self.store.read_layers(address, self.nodata)?,
        };
        match stored {
            Some(stored) => {
                log::debug!("read {} layers of tile {address}", stored.num_layers());
                Ok(Cache::Data {
                    raw: stored.data().clone(),
                    masked: stored.mask_nodata(self.nodata),
                })
            }
            None => Ok(Cache::NoData(self.store.empty(&self.tile)?.insert_axis(0))),
        }
    }
}

impl<T, G> Drop for InputTile<'_, T, G> {
    fn drop(&mut self) {
        self.cache = None;
    }
}
