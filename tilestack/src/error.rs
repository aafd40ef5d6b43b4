use std::sync::Arc;

use thiserror::Error;
use tilestack_codec::{CodecError, DataType, ElementError};
use tilestack_filesystem::{FilesystemError, TileAddress};

use crate::{ExtractError, StackError};

/// An output configuration error.
#[derive(Clone, Debug, Error)]
pub enum ConfigError {
    /// The configuration is not a JSON object.
    #[error("the output configuration must be an object")]
    NotAnObject,
    /// A required key is missing.
    #[error("missing required configuration key `{_0}`")]
    MissingKey(&'static str),
    /// A key has an invalid value.
    #[error("invalid value for configuration key `{key}`: {reason}")]
    InvalidValue {
        /// The key.
        key: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
    /// The configuration is not valid JSON.
    #[error("invalid output configuration: {_0}")]
    InvalidJson(String),
    /// An IO error reading a configuration file.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

/// Data handed to a write does not match the output configuration.
#[derive(Clone, Debug, Error)]
pub enum ValidationError {
    /// The element type does not match the configured data type.
    #[error(transparent)]
    DataType(#[from] ElementError),
    /// The nodata value cannot be held by the data type.
    #[error("nodata {nodata} is not representable as {data_type}")]
    Nodata {
        /// The configured nodata value.
        nodata: f64,
        /// The configured data type.
        data_type: DataType,
    },
    /// The data is neither a tile array, a tile array without its leading axis, nor a stack of tile arrays.
    #[error("data has {got} dimensions, which does not fit tile arrays of {ndim} dimensions")]
    Dimensionality {
        /// The number of dimensions of the data.
        got: usize,
        /// The configured number of dimensions.
        ndim: usize,
    },
    /// The per-layer shape of the data does not match the tile.
    #[error("data slices of shape {got:?} do not match the tile slice shape {expected:?}")]
    Shape {
        /// The slice shape of the tile.
        expected: Vec<usize>,
        /// The slice shape of the data.
        got: Vec<usize>,
    },
}

/// An [`OutputStore`](crate::OutputStore) or [`InputTile`](crate::InputTile) error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A validation error.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A stored tile is present but cannot be decoded.
    #[error("failed to decode tile {address}: {source}")]
    Decode {
        /// The tile address.
        address: TileAddress,
        /// The codec error.
        source: CodecError,
    },
    /// A tile cannot be encoded.
    #[error("failed to encode tile {address}: {source}")]
    Encode {
        /// The tile address.
        address: TileAddress,
        /// The codec error.
        source: CodecError,
    },
    /// A filesystem error.
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    /// A raster extraction error.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// A stack merge error.
    #[error(transparent)]
    Stack(#[from] StackError),
    /// A detached write worker panicked.
    #[error("the write worker for tile {_0} panicked")]
    WorkerPanicked(TileAddress),
}
