//! Block compression applied to the data and mask sections of a packed tile.
//!
//! ### Configuration Examples
//! ```rust
//! # use tilestack_codec::Compression;
//! let none: Compression = serde_json::from_str(r#"{ "name": "none" }"#).unwrap();
//! let gzip: Compression = serde_json::from_str(r#"{ "name": "gzip", "level": 5 }"#).unwrap();
//! let zstd: Compression = serde_json::from_str(r#"{ "name": "zstd", "level": 3 }"#).unwrap();
//! # assert_eq!(zstd, Compression::default());
//! ```

use std::io::{Cursor, Read};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CodecError;

/// A block compression method.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Display, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "lowercase", deny_unknown_fields)]
pub enum Compression {
    /// Store bytes as they are.
    #[display("none")]
    None,
    /// [gzip](https://datatracker.ietf.org/doc/html/rfc1952) with a level in `0..=9`.
    #[display("gzip({level})")]
    Gzip {
        /// The compression level.
        level: u32,
    },
    /// [Zstandard](https://datatracker.ietf.org/doc/html/rfc8878) with a level in `-7..=22`.
    #[display("zstd({level})")]
    Zstd {
        /// The compression level.
        level: i32,
    },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

/// An invalid compression level.
#[derive(Clone, Debug, Error)]
#[error("invalid compression level {level} for {method}")]
pub struct CompressionLevelError {
    method: &'static str,
    level: i64,
}

impl Compression {
    /// Check that the compression level is supported by the method.
    ///
    /// # Errors
    /// Returns [`CompressionLevelError`] if the level is out of range.
    pub fn validate(&self) -> Result<(), CompressionLevelError> {
        match *self {
            Self::None => Ok(()),
            Self::Gzip { level } if level <= 9 => Ok(()),
            Self::Gzip { level } => Err(CompressionLevelError {
                method: "gzip",
                level: level.into(),
            }),
            Self::Zstd { level } if (-7..=22).contains(&level) => Ok(()),
            Self::Zstd { level } => Err(CompressionLevelError {
                method: "zstd",
                level: level.into(),
            }),
        }
    }

    /// The identifier of the compression method in the packed tile format.
    #[must_use]
    pub const fn id(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip { .. } => 1,
            Self::Zstd { .. } => 2,
        }
    }

    /// Compress `decoded_value`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the compressor fails.
    pub fn compress(&self, decoded_value: &[u8]) -> Result<Vec<u8>, CodecError> {
        match *self {
            Self::None => Ok(decoded_value.to_vec()),
            Self::Gzip { level } => {
                let mut encoder = flate2::bufread::GzEncoder::new(
                    Cursor::new(decoded_value),
                    flate2::Compression::new(level),
                );
                let mut out: Vec<u8> = Vec::new();
                encoder.read_to_end(&mut out)?;
                Ok(out)
            }
            Self::Zstd { level } => Ok(zstd::encode_all(Cursor::new(decoded_value), level)?),
        }
    }

    /// Decompress `encoded_value` produced by the method with identifier `id`.
    ///
    /// The level does not affect decompression, so only the identifier is needed.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if `id` is unknown or the bytes are not a valid stream.
    pub fn decompress(id: u8, encoded_value: &[u8]) -> Result<Vec<u8>, CodecError> {
        match id {
            0 => Ok(encoded_value.to_vec()),
            1 => {
                let mut decoder = flate2::bufread::GzDecoder::new(Cursor::new(encoded_value));
                let mut out: Vec<u8> = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            2 => Ok(zstd::decode_all(Cursor::new(encoded_value))?),
            _ => Err(CodecError::UnknownCompression(id)),
        }
    }
}
