//! `tilestack` is a tiled masked-raster stack store.
//!
//! It persists n-dimensional raster tiles computed by a tile processing pipeline into a spatial pyramid on the filesystem.
//! Successive writes to a tile are merged into a temporal stack, newest layer first, and pixels that are masked or equal to the nodata value are treated as absent.
//!
//! - [`OutputStore`] validates and splits process tiles into output tiles and merges them into the stored stacks.
//! - [`InputTile`] reads a stored tile back with lazy, cached decoding.
//! - [`merge_layer`] is the stack merge, with optional gap closing.
//! - [`TilePyramid`] and [`RasterExtract`] are the geometry collaborators. [`MetatilingPyramid`] implements both for a same-CRS pyramid.
//!
//! The tile file format is provided by [`tilestack_codec`] and the filesystem layout by [`tilestack_filesystem`].
//!
//! ## Example
//! ```rust
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use ndarray::ArrayD;
//! use tilestack::{MetatilingPyramid, OutputConfig, OutputStore, TileAddress};
//! use tilestack_codec::DataType;
//!
//! let dir = tempfile::TempDir::new()?;
//! let config = OutputConfig::new(dir.path(), DataType::UInt8, 3, 3)?;
//! let pyramid = MetatilingPyramid::new(256, 1, 0);
//! let store = OutputStore::new(config, pyramid)?;
//!
//! let tile = pyramid.process_tile(TileAddress::new(5, 1, 1));
//! let written = store.write(&tile, ArrayD::<u8>::ones(vec![3, 256, 256]))?;
//! assert_eq!(written, vec![TileAddress::new(5, 1, 1)]);
//!
//! let mut input = store.open::<u8>(TileAddress::new(5, 1, 1))?;
//! assert_eq!(input.read()?.shape(), &[1, 3, 256, 256]);
//! assert!(!input.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//! `tilestack` logs through the [`log`](https://docs.rs/log) facade and installs no logger.
//! Writes and skipped writes are logged at `debug`, skipped layers and swallowed decode errors at `warn`.
//!
//! ## Licence
//! `tilestack` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.

mod config;
mod error;
mod input;
mod masked_array;
mod output;
mod stack;
mod tile;

pub use config::OutputConfig;
pub use error::{ConfigError, StoreError, ValidationError};
pub use input::InputTile;
pub use masked_array::{Mask, MaskShapeError, MaskedArray, TileData};
pub use output::{OutputStore, PendingWrites};
pub use stack::{StackError, merge_layer, merge_layers};
pub use tile::{ExtractError, MetatilingPyramid, RasterExtract, Tile, TilePyramid};

pub use tilestack_codec::{DataType, Element};
pub use tilestack_filesystem::TileAddress;
