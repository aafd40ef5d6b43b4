//! The tile serialisation codec API for the `tilestack` crate.
//!
//! A codec packs a type-erased masked array ([`ArrayBytes`]) into a byte blob and unpacks it again.
//! Packing must round-trip the data type, shape, element values and validity mask exactly.
//!
//! [`PackedCodec`] is the default implementation: a shape-prefixed little-endian buffer with optional [`Compression`] and a `crc32c` checksum.
//!
//! ## Licence
//! `tilestack_codec` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.

mod array_bytes;
pub mod compression;
mod data_type;
mod element;
mod packed;

use std::sync::Arc;

use derive_more::From;
use thiserror::Error;

pub use array_bytes::{ArrayBytes, ArrayBytesError, MaskBytes};
pub use compression::{Compression, CompressionLevelError};
pub use data_type::{DataType, UnknownDataTypeError, UnknownDataTypeIdError};
pub use element::{Element, ElementError, bytes_to_elements, elements_to_bytes};
pub use packed::PackedCodec;

/// Tile codec traits.
pub trait TileCodecTraits: core::fmt::Debug + Send + Sync {
    /// The file extension (without the leading dot) of files written with this codec.
    fn file_extension(&self) -> &str;

    /// Encode an array.
    ///
    /// # Errors
    /// Returns [`CodecError`] if the array cannot be encoded.
    fn encode(&self, array: &ArrayBytes) -> Result<Vec<u8>, CodecError>;

    /// Decode an array.
    ///
    /// # Errors
    /// Returns [`CodecError`] if `encoded_value` is not a valid encoding (e.g. it is corrupt or truncated).
    fn decode(&self, encoded_value: &[u8]) -> Result<ArrayBytes, CodecError>;
}

/// A shared tile codec.
#[derive(Debug, Clone, From)]
pub struct TileCodec(Arc<dyn TileCodecTraits>);

impl TileCodec {
    /// Create a tile codec.
    pub fn new<T: TileCodecTraits + 'static>(codec: T) -> Self {
        let codec: Arc<dyn TileCodecTraits> = Arc::new(codec);
        codec.into()
    }
}

impl Default for TileCodec {
    fn default() -> Self {
        Self::new(PackedCodec::default())
    }
}

impl std::ops::Deref for TileCodec {
    type Target = dyn TileCodecTraits;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// A codec error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
    /// The encoded value does not start with the expected magic bytes.
    #[error("the encoded value is not a packed tile")]
    InvalidMagic,
    /// The format version is not supported.
    #[error("unsupported packed tile format version {_0}")]
    UnsupportedVersion(u8),
    /// An unknown data type identifier.
    #[error(transparent)]
    UnknownDataType(#[from] UnknownDataTypeIdError),
    /// An unknown compression identifier.
    #[error("unknown compression identifier {_0}")]
    UnknownCompression(u8),
    /// An unknown mask kind identifier.
    #[error("unknown mask kind {_0}")]
    UnknownMaskKind(u8),
    /// The encoded value ended early.
    #[error("the encoded value is truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// The offset of the section.
        offset: usize,
        /// The size of the section.
        needed: usize,
        /// The number of bytes available from `offset`.
        available: usize,
    },
    /// Bytes follow the last section.
    #[error("{_0} unexpected trailing bytes")]
    TrailingBytes(usize),
    /// An embedded checksum does not match the decoded value.
    #[error("the checksum is invalid")]
    InvalidChecksum,
    /// The decoded data or mask does not match the shape.
    #[error(transparent)]
    InvalidArrayBytes(#[from] ArrayBytesError),
    /// An element type does not match the encoded data type.
    #[error(transparent)]
    ElementError(#[from] ElementError),
    /// The compression level is not supported.
    #[error(transparent)]
    CompressionLevel(#[from] CompressionLevelError),
    /// Other
    #[error("{_0}")]
    Other(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}
