//! The output store.
//!
//! Writes are validated against the [`OutputConfig`], split into the output tiles intersecting the process tile and merged into the stored stacks.

use std::{path::PathBuf, sync::Arc, thread::JoinHandle};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde_json::Value;
use tilestack_codec::{Element, PackedCodec, TileCodec};
use tilestack_filesystem::{FilesystemError, TileAddress, TileLayout, TilePathResolver};

use crate::{
    ConfigError, InputTile, MaskedArray, OutputConfig, RasterExtract, StackError, StoreError, Tile,
    TileData, TilePyramid, ValidationError, merge_layers,
};

/// A tile store persisting temporal stacks of masked arrays in a tile pyramid below a root directory.
///
/// Each [`write`](OutputStore::write) splits a process tile into the output tiles it intersects and merges each part into the stack stored for that tile.
/// Stacks are stored as a single file per tile, newest layer first, or as a directory per tile with one numbered file per layer in write order.
///
/// Writers sharing a store are serialised per tile address.
/// Writers in other processes are not: the last complete write of a tile wins.
#[derive(Debug)]
pub struct OutputStore<G> {
    config: OutputConfig,
    geometry: G,
    resolver: TilePathResolver,
    codec: TileCodec,
}

impl<G> OutputStore<G> {
    /// Create a new output store with the [`PackedCodec`] and the configured compression.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the configuration is invalid or the root path is not a usable directory.
    pub fn new(config: OutputConfig, geometry: G) -> Result<Self, StoreError> {
        let codec = PackedCodec::new(config.compression()).map_err(|err| {
            ConfigError::InvalidValue {
                key: "compression",
                reason: err.to_string(),
            }
        })?;
        Self::new_with_codec(config, geometry, TileCodec::new(codec))
    }

    /// Create a new output store with a custom codec.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the configuration is invalid or the root path is not a usable directory.
    pub fn new_with_codec(
        config: OutputConfig,
        geometry: G,
        codec: TileCodec,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let layout = if config.single_file() {
            TileLayout::SingleFile
        } else {
            TileLayout::Directory
        };
        let resolver = TilePathResolver::new(config.path(), codec.file_extension(), layout)?;
        Ok(Self {
            config,
            geometry,
            resolver,
            codec,
        })
    }

    /// Validate an output parameter map.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] identifying the first missing or malformed key.
    pub fn is_valid_configuration(value: &Value) -> Result<bool, ConfigError> {
        OutputConfig::from_value(value).map(|_| true)
    }

    /// Return the configuration.
    #[must_use]
    pub const fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Return the tile geometry.
    #[must_use]
    pub const fn geometry(&self) -> &G {
        &self.geometry
    }

    pub(crate) const fn resolver(&self) -> &TilePathResolver {
        &self.resolver
    }

    /// Return the path of the file (single file) or directory (directory mode) of the tile at `address`.
    #[must_use]
    pub fn path(&self, address: &TileAddress) -> PathBuf {
        self.resolver.path_for(address)
    }

    /// List the addresses of stored tiles, optionally restricted to one zoom level.
    #[must_use]
    pub fn stored_tiles(&self, zoom: Option<u32>) -> Vec<TileAddress> {
        self.resolver.list_tiles(zoom)
    }

    /// Return a fully invalid tile array for `tile` filled with nodata.
    ///
    /// Its shape is `[bands, rows, cols]` with leading axes of length one added up to `ndim` axes.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if `T` does not match the configured data type.
    pub fn empty<T: Element>(&self, tile: &Tile) -> Result<MaskedArray<T>, ValidationError> {
        let nodata = self.config.nodata_value::<T>()?;
        Ok(MaskedArray::fully_masked(&self.config.slice_shape(tile), nodata))
    }

    /// Validate `data` for `tile` and convert it to a newest first stack of layers.
    ///
    /// `data` is a tile array, a tile array missing its leading axis, or a stack of tile arrays.
    ///
    /// Returns [`None`] if every element is invalid.
    fn prepare<T: Element>(
        &self,
        tile: &Tile,
        data: TileData<T>,
    ) -> Result<Option<MaskedArray<T>>, ValidationError> {
        let nodata = self.config.nodata_value::<T>()?;
        let expected = self.config.slice_shape(tile);
        let layer_ndim = expected.len();
        let got = data.ndim();
        let layers = if got == layer_ndim + 1 {
            data.into_masked(nodata)
        } else if got == layer_ndim {
            data.into_masked(nodata).insert_axis(0)
        } else if got + 1 == layer_ndim {
            data.into_masked(nodata).insert_axis(0).insert_axis(0)
        } else {
            return Err(ValidationError::Dimensionality {
                got,
                ndim: self.config.ndim(),
            });
        };
        if layers.shape()[1..] != expected[..] {
            return Err(ValidationError::Shape {
                expected,
                got: layers.shape()[1..].to_vec(),
            });
        }

        if layers.is_fully_masked() {
            log::debug!("skipping write of tile {}: no valid data", tile.address());
            Ok(None)
        } else {
            Ok(Some(layers))
        }
    }

    fn decode_stack<T: Element>(
        &self,
        address: TileAddress,
        encoded: &[u8],
        nodata: T,
    ) -> Result<MaskedArray<T>, StoreError> {
        self.codec
            .decode(encoded)
            .and_then(|array_bytes| MaskedArray::from_array_bytes(array_bytes, nodata))
            .map_err(|source| StoreError::Decode { address, source })
    }

    fn encode_stack<T: Element>(
        &self,
        address: TileAddress,
        stack: &MaskedArray<T>,
        store_mask: bool,
    ) -> Result<Vec<u8>, StoreError> {
        stack
            .to_array_bytes(store_mask)
            .and_then(|array_bytes| self.codec.encode(&array_bytes))
            .map_err(|source| StoreError::Encode { address, source })
    }

    /// Read the stack stored in the single file layout.
    pub(crate) fn read_stack<T: Element>(
        &self,
        address: TileAddress,
        nodata: T,
    ) -> Result<Option<MaskedArray<T>>, StoreError> {
        self.resolver
            .read(&self.resolver.path_for(&address))?
            .map(|encoded| self.decode_stack(address, &encoded, nodata))
            .transpose()
    }

    /// Read the layer files stored in the directory layout in index order.
    ///
    /// Absent or undecodable layers are skipped with a warning.
    pub(crate) fn read_layers<T: Element>(
        &self,
        address: TileAddress,
        nodata: T,
    ) -> Result<Option<MaskedArray<T>>, StoreError> {
        let mut layers: Vec<MaskedArray<T>> = Vec::new();
        for index in self.resolver.layer_indices(&address)? {
            let path = self.resolver.layer_path(&address, index);
            let Some(encoded) = self.resolver.read(&path)? else {
                log::warn!("skipping layer {index} of tile {address}: {} is missing", path.display());
                continue;
            };
            match self.decode_stack(address, &encoded, nodata) {
                Ok(layer) => match layers.first() {
                    Some(first) if first.shape() != layer.shape() => log::warn!(
                        "skipping layer {index} of tile {address}: shape {:?} does not match {:?}",
                        layer.shape(),
                        first.shape()
                    ),
                    _ => layers.push(layer),
                },
                Err(err) => log::warn!("skipping layer {index} of tile {address}: {err}"),
            }
        }
        if layers.is_empty() {
            return Ok(None);
        }
        Ok(Some(MaskedArray::stack(&layers).map_err(StackError::from)?))
    }

    /// Merge `window`, newest layer first, into the tile at `address`.
    ///
    /// Returns [`None`] if nothing was written.
    fn write_tile<T: Element>(
        &self,
        address: TileAddress,
        window: &MaskedArray<T>,
        nodata: T,
    ) -> Result<Option<TileAddress>, StoreError> {
        if window.is_fully_masked() {
            log::debug!("skipping write of tile {address}: no valid data");
            return Ok(None);
        }

        let lock = self.resolver.tile_lock(&address);
        let _lock = lock.lock();
        match self.resolver.layout() {
            TileLayout::SingleFile => {
                let path = self.resolver.path_for(&address);
                let existing = self.read_stack(address, nodata)?;
                let stack = merge_layers(existing, window, nodata, self.config.close_gaps())?;
                let encoded = self.encode_stack(address, &stack, true)?;
                self.resolver.ensure_directories(&address)?;
                self.resolver.write(&path, &encoded)?;
                log::debug!("wrote {} layers to tile {address}", stack.num_layers());
            }
            TileLayout::Directory => {
                self.resolver.ensure_directories(&address)?;
                let mut index = self.resolver.next_layer_index(&address)?;
                // oldest first
                for layer in (0..window.num_layers()).rev().map(|i| window.layer(i)) {
                    if layer.is_fully_masked() {
                        continue;
                    }
                    let layer = MaskedArray::valid(layer.filled(nodata));
                    let encoded = self.encode_stack(address, &layer, false)?;
                    self.resolver
                        .write(&self.resolver.layer_path(&address, index), &encoded)?;
                    log::debug!("wrote layer {index} of tile {address}");
                    index += 1;
                }
            }
        }
        Ok(Some(address))
    }
}

impl<G: TilePyramid + RasterExtract + Sync> OutputStore<G> {
    /// Extract the part of `layers` covering each output tile intersecting `tile`.
    fn extract<T: Element>(
        &self,
        tile: &Tile,
        layers: &MaskedArray<T>,
    ) -> Result<Vec<(TileAddress, MaskedArray<T>)>, StoreError> {
        self.geometry
            .intersecting(tile)
            .iter()
            .map(|destination| {
                let window = self.geometry.extract_from_tile(tile, layers, destination)?;
                Ok((destination.address(), window))
            })
            .collect()
    }

    /// Write `data` computed for the process tile `tile`.
    ///
    /// `data` is a plain or masked tile array of `ndim` dimensions, or of one fewer to which a leading axis of length one is added.
    /// Data with one more dimension is a stack of tile arrays, newest first.
    /// Elements equal to the nodata value are invalid.
    /// Data without any valid element is not written.
    ///
    /// Destination tiles are written in parallel if `parallel_writes` is configured.
    ///
    /// Returns the addresses of the output tiles written.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if
    ///  - `data` does not match the configured data type, dimensionality or the tile shape (before anything is written),
    ///  - a stored stack cannot be decoded or is incompatible with `data`, or
    ///  - there is an underlying filesystem error.
    pub fn write<T: Element>(
        &self,
        tile: &Tile,
        data: impl Into<TileData<T>>,
    ) -> Result<Vec<TileAddress>, StoreError> {
        let Some(layers) = self.prepare(tile, data.into())? else {
            return Ok(vec![]);
        };
        let nodata = self.config.nodata_value::<T>()?;
        let windows = self.extract(tile, &layers)?;
        let results: Vec<_> = if self.config.parallel_writes() {
            windows
                .into_par_iter()
                .map(|(address, window)| self.write_tile(address, &window, nodata))
                .collect()
        } else {
            windows
                .into_iter()
                .map(|(address, window)| self.write_tile(address, &window, nodata))
                .collect()
        };
        results.into_iter().filter_map(Result::transpose).collect()
    }

    /// Returns true if every output tile intersecting `tile` is stored.
    ///
    /// Only existence is checked, not content.
    #[must_use]
    pub fn tiles_exist(&self, tile: &Tile) -> bool {
        self.geometry
            .intersecting(tile)
            .iter()
            .all(|destination| self.resolver.exists(&destination.address()))
    }

    /// Open the output tile at `address` for reading.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if `T` does not match the configured data type.
    pub fn open<T: Element>(&self, address: TileAddress) -> Result<InputTile<'_, T, G>, ValidationError> {
        let tile = self.geometry.tile(address);
        InputTile::new(self, tile)
    }

    /// Open the output tile at `address` and pass it to `f`.
    ///
    /// The read cache is released when `f` returns or unwinds.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if `T` does not match the configured data type.
    pub fn with_input<T: Element, R>(
        &self,
        address: TileAddress,
        f: impl FnOnce(&mut InputTile<'_, T, G>) -> R,
    ) -> Result<R, ValidationError> {
        let mut input = self.open(address)?;
        Ok(f(&mut input))
    }
}

impl<G: TilePyramid + RasterExtract + Send + Sync + 'static> OutputStore<G> {
    /// Write `data` like [`write`](OutputStore::write), persisting each destination tile on its own thread.
    ///
    /// Validation happens before this returns.
    /// Dropping the returned [`PendingWrites`] detaches the writes; [`PendingWrites::wait`] blocks until they complete.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if `data` is invalid or a thread cannot be spawned.
    pub fn write_detached<T: Element>(
        self: &Arc<Self>,
        tile: &Tile,
        data: impl Into<TileData<T>>,
    ) -> Result<PendingWrites, StoreError> {
        let Some(layers) = self.prepare(tile, data.into())? else {
            return Ok(PendingWrites::default());
        };
        let nodata = self.config.nodata_value::<T>()?;
        let mut handles = Vec::new();
        for (address, window) in self.extract(tile, &layers)? {
            let store = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("tilestack-write-{address}"))
                .spawn(move || store.write_tile(address, &window, nodata))
                .map_err(FilesystemError::from)?;
            handles.push((address, handle));
        }
        Ok(PendingWrites { handles })
    }
}

/// The tile writes dispatched by [`OutputStore::write_detached`].
///
/// Dropping it leaves the writes running.
#[derive(Debug, Default)]
#[must_use = "dropping detaches the writes, call `wait` to observe their results"]
pub struct PendingWrites {
    handles: Vec<(TileAddress, JoinHandle<Result<Option<TileAddress>, StoreError>>)>,
}

impl PendingWrites {
    /// Return the number of dispatched tile writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no tile writes were dispatched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every dispatched write and return its result per tile.
    ///
    /// A result is `Ok(true)` if the tile was written.
    pub fn wait(self) -> Vec<(TileAddress, Result<bool, StoreError>)> {
        self.handles
            .into_iter()
            .map(|(address, handle)| {
                let result = handle
                    .join()
                    .map_err(|_| StoreError::WorkerPanicked(address))
                    .and_then(|result| result.map(|written| written.is_some()));
                (address, result)
            })
            .collect()
    }

    /// Wait for every dispatched write and return the addresses of the tiles written.
    ///
    /// # Errors
    /// Returns the first [`StoreError`] in dispatch order after all writes have completed.
    pub fn wait_all(self) -> Result<Vec<TileAddress>, StoreError> {
        let mut written = Vec::new();
        for (address, result) in self.wait() {
            if result? {
                written.push(address);
            }
        }
        Ok(written)
    }
}
