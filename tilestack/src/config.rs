//! Output configuration.
//!
//! An [`OutputConfig`] is read from the output parameter map of a process configuration.
//! Keys other than the ones below are ignored.
//!
//! | key               | type    | default                 |
//! |-------------------|---------|-------------------------|
//! | `bands`           | integer | required, positive      |
//! | `path`            | string  | required                |
//! | `dtype`           | string  | required                |
//! | `ndim`            | integer | required, at least 2    |
//! | `nodata`          | number  | `0`                     |
//! | `single_file`     | bool    | `true`                  |
//! | `close_gaps`      | bool    | `false`                 |
//! | `compression`     | object  | `{"name": "zstd", "level": 3}` |
//! | `parallel_writes` | bool    | `false`                 |
//!
//! ### Example
//! ```rust
//! # use tilestack::OutputConfig;
//! let config = OutputConfig::from_json_str(r#"{
//!     "format": "tilestack",
//!     "bands": 3,
//!     "path": "/data/out",
//!     "dtype": "uint16",
//!     "ndim": 3,
//!     "nodata": 0
//! }"#).unwrap();
//! assert!(config.single_file());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tilestack_codec::{Compression, DataType, Element};

use crate::{ConfigError, Tile, ValidationError};

/// The configuration of an [`OutputStore`](crate::OutputStore).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutputConfig {
    bands: usize,
    path: PathBuf,
    dtype: DataType,
    ndim: usize,
    #[serde(default)]
    nodata: f64,
    #[serde(default = "default_single_file")]
    single_file: bool,
    #[serde(default)]
    close_gaps: bool,
    #[serde(default)]
    compression: Compression,
    #[serde(default)]
    parallel_writes: bool,
}

const fn default_single_file() -> bool {
    true
}

impl OutputConfig {
    /// Create a new configuration with default optional values.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the configuration is invalid, see [`validate`](OutputConfig::validate).
    pub fn new(
        path: impl Into<PathBuf>,
        dtype: DataType,
        bands: usize,
        ndim: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            bands,
            path: path.into(),
            dtype,
            ndim,
            nodata: 0.0,
            single_file: true,
            close_gaps: false,
            compression: Compression::default(),
            parallel_writes: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the nodata value.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `nodata` is not representable in the data type.
    pub fn with_nodata(mut self, nodata: f64) -> Result<Self, ConfigError> {
        self.nodata = nodata;
        self.validate()?;
        Ok(self)
    }

    /// Store each tile as a single file (`true`) or as a directory of layer files (`false`).
    #[must_use]
    pub const fn with_single_file(mut self, single_file: bool) -> Self {
        self.single_file = single_file;
        self
    }

    /// Enable or disable gap closing.
    #[must_use]
    pub const fn with_close_gaps(mut self, close_gaps: bool) -> Self {
        self.close_gaps = close_gaps;
        self
    }

    /// Set the compression.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the compression level is out of range.
    pub fn with_compression(mut self, compression: Compression) -> Result<Self, ConfigError> {
        self.compression = compression;
        self.validate()?;
        Ok(self)
    }

    /// Enable or disable writing destination tiles in parallel.
    #[must_use]
    pub const fn with_parallel_writes(mut self, parallel_writes: bool) -> Self {
        self.parallel_writes = parallel_writes;
        self
    }

    /// Create a configuration from an output parameter map.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] identifying the first missing or malformed key.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value.as_object().ok_or(ConfigError::NotAnObject)?;
        check_keys(map)?;
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|err| ConfigError::InvalidJson(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `json` is not valid JSON or the configuration is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|err| ConfigError::InvalidJson(err.to_string()))?;
        Self::from_value(&value)
    }

    /// Read a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or the configuration is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if
    ///  - `bands` is zero,
    ///  - `ndim` is less than 2,
    ///  - `nodata` is not representable in `dtype`, or
    ///  - the compression level is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bands == 0 {
            return Err(ConfigError::InvalidValue {
                key: "bands",
                reason: "expected a positive integer".to_string(),
            });
        }
        if self.ndim < 2 {
            return Err(ConfigError::InvalidValue {
                key: "ndim",
                reason: "expected an integer of at least 2".to_string(),
            });
        }
        if !self.dtype.can_represent(self.nodata) {
            return Err(ConfigError::InvalidValue {
                key: "nodata",
                reason: format!("{} is not representable as {}", self.nodata, self.dtype),
            });
        }
        self.compression
            .validate()
            .map_err(|err| ConfigError::InvalidValue {
                key: "compression",
                reason: err.to_string(),
            })
    }

    /// Return the number of bands.
    #[must_use]
    pub const fn bands(&self) -> usize {
        self.bands
    }

    /// Return the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the data type.
    #[must_use]
    pub const fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Return the number of dimensions of a tile array.
    ///
    /// Stored stacks have one more, their leading layer axis.
    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.ndim
    }

    /// Return the nodata value.
    #[must_use]
    pub const fn nodata(&self) -> f64 {
        self.nodata
    }

    /// Returns true if each tile is stored as a single file.
    #[must_use]
    pub const fn single_file(&self) -> bool {
        self.single_file
    }

    /// Returns true if gap closing is enabled.
    #[must_use]
    pub const fn close_gaps(&self) -> bool {
        self.close_gaps
    }

    /// Return the compression.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Returns true if destination tiles are written in parallel.
    #[must_use]
    pub const fn parallel_writes(&self) -> bool {
        self.parallel_writes
    }

    /// Return the nodata value as an element of type `T`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if `T` does not match the configured data type or cannot hold the nodata value.
    pub fn nodata_value<T: Element>(&self) -> Result<T, ValidationError> {
        T::validate_data_type(self.dtype)?;
        T::from_nodata(self.nodata).ok_or(ValidationError::Nodata {
            nodata: self.nodata,
            data_type: self.dtype,
        })
    }

    /// Return the shape of one layer of `tile`: `[bands, rows, cols]` with leading axes of length one added up to `ndim` axes.
    #[must_use]
    pub fn slice_shape(&self, tile: &Tile) -> Vec<usize> {
        let (rows, cols) = tile.shape();
        let mut shape = vec![1; self.ndim.saturating_sub(3)];
        shape.extend([self.bands, rows, cols]);
        shape
    }
}

fn check_keys(map: &Map<String, Value>) -> Result<(), ConfigError> {
    let required = |key: &'static str| map.get(key).ok_or(ConfigError::MissingKey(key));
    let invalid = |key: &'static str, reason: &str| ConfigError::InvalidValue {
        key,
        reason: reason.to_string(),
    };

    if !required("bands")?.as_u64().is_some_and(|bands| bands > 0) {
        return Err(invalid("bands", "expected a positive integer"));
    }
    if !required("path")?.is_string() {
        return Err(invalid("path", "expected a string"));
    }
    match required("dtype")?.as_str() {
        Some(dtype) => {
            DataType::from_str(dtype).map_err(|err| invalid("dtype", &err.to_string()))?;
        }
        None => return Err(invalid("dtype", "expected a data type name")),
    }
    if !required("ndim")?.as_u64().is_some_and(|ndim| ndim >= 2) {
        return Err(invalid("ndim", "expected an integer of at least 2"));
    }

    if map.get("nodata").is_some_and(|nodata| !nodata.is_number()) {
        return Err(invalid("nodata", "expected a number"));
    }
    for key in ["single_file", "close_gaps", "parallel_writes"] {
        if map.get(key).is_some_and(|value| !value.is_boolean()) {
            return Err(invalid(key, "expected a boolean"));
        }
    }
    if let Some(compression) = map.get("compression") {
        Compression::deserialize(compression)
            .map_err(|err| invalid("compression", &err.to_string()))?;
    }
    Ok(())
}
